//! Pretrained per-language label model
//!
//! Linear scorer over line tokens with a softmax output. One label is the
//! language itself (a generic line); the others are library identifiers.
//! Loaded once from `<models_dir>/<language>.json` and read-only afterwards.

use crate::error::{CrawlError, CrawlResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Labels scoring above this fraction of the best label are considered active
pub const ACTIVE_LABEL_RATIO: f32 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelModel {
    /// Language this model classifies; also the generic-line label
    language: String,
    /// Output labels
    labels: Vec<String>,
    /// Per-label bias [labels]
    bias: Vec<f32>,
    /// Token -> per-label weight [labels]
    #[serde(default)]
    weights: HashMap<String, Vec<f32>>,
}

impl LabelModel {
    /// Create a model from pretrained parts, checking its shape.
    pub fn new(
        language: impl Into<String>,
        labels: Vec<String>,
        bias: Vec<f32>,
        weights: HashMap<String, Vec<f32>>,
    ) -> CrawlResult<Self> {
        let model = Self {
            language: language.into(),
            labels,
            bias,
            weights,
        };
        model.validate()?;
        Ok(model)
    }

    /// Artifact location for a language
    pub fn path_for(language: &str, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{language}.json"))
    }

    /// Load the pretrained model for `language` from `models_dir`.
    pub fn load(language: &str, models_dir: &Path) -> CrawlResult<Self> {
        let path = Self::path_for(language, models_dir);
        let content = std::fs::read_to_string(&path).map_err(|source| CrawlError::ModelUnavailable {
            language: language.to_string(),
            path: path.clone(),
            source,
        })?;
        let model: Self = serde_json::from_str(&content).map_err(|e| CrawlError::ModelInvalid {
            language: language.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        if model.language != language {
            return Err(CrawlError::ModelInvalid {
                language: language.to_string(),
                reason: format!("{} is a model for '{}'", path.display(), model.language),
            });
        }
        model.validate()?;
        debug!(
            "Loaded {} model with {} labels, {} tokens",
            language,
            model.labels.len(),
            model.weights.len()
        );
        Ok(model)
    }

    fn validate(&self) -> CrawlResult<()> {
        let invalid = |reason: String| CrawlError::ModelInvalid {
            language: self.language.clone(),
            reason,
        };
        if !self.labels.iter().any(|l| *l == self.language) {
            return Err(invalid("labels do not include the language itself".into()));
        }
        if self.bias.len() != self.labels.len() {
            return Err(invalid(format!(
                "bias has {} entries for {} labels",
                self.bias.len(),
                self.labels.len()
            )));
        }
        if let Some((token, row)) = self.weights.iter().find(|(_, row)| row.len() != self.labels.len()) {
            return Err(invalid(format!(
                "token '{}' has {} weights for {} labels",
                token,
                row.len(),
                self.labels.len()
            )));
        }
        Ok(())
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Probability distribution over labels for a token sequence
    pub fn predict(&self, tokens: &[String]) -> Vec<f32> {
        let mut logits = self.bias.clone();
        for row in tokens.iter().filter_map(|t| self.weights.get(t)) {
            for (logit, w) in logits.iter_mut().zip(row) {
                *logit += w;
            }
        }

        // Softmax
        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    }

    /// Library labels active on a line.
    ///
    /// Empty when the language label wins (a generic line) or when the
    /// distribution is degenerate.
    pub fn active_labels(&self, tokens: &[String]) -> Vec<&str> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let probs = self.predict(tokens);
        if probs.iter().any(|p| !p.is_finite()) {
            return Vec::new();
        }

        let Some((best, &max_prob)) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            return Vec::new();
        };
        if self.labels[best] == self.language {
            return Vec::new();
        }

        self.labels
            .iter()
            .zip(&probs)
            .filter(|(label, &p)| p > ACTIVE_LABEL_RATIO * max_prob && **label != self.language)
            .map(|(label, _)| label.as_str())
            .collect()
    }
}
