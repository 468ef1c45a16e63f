//! Python extractor backed by a pretrained label model

use super::{split_tokens, Extractor, LabelModel};
use crate::error::{CrawlError, CrawlResult};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

pub const LANGUAGE_NAME: &str = "python";
const FILE_EXTS: &[&str] = &["py", "py3"];

static FROM_IMPORT: OnceLock<Regex> = OnceLock::new();
static PLAIN_IMPORT: OnceLock<Regex> = OnceLock::new();
static STRING_LITERAL: OnceLock<Regex> = OnceLock::new();
static MODULE_NAME: OnceLock<Regex> = OnceLock::new();

fn from_import() -> &'static Regex {
    FROM_IMPORT.get_or_init(|| Regex::new(r"^\s*from\s+(\w+)[\w.]*\s+import\b").expect("valid regex"))
}

fn plain_import() -> &'static Regex {
    PLAIN_IMPORT.get_or_init(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid regex"))
}

fn string_literal() -> &'static Regex {
    STRING_LITERAL.get_or_init(|| {
        Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("valid regex")
    })
}

fn module_name() -> &'static Regex {
    MODULE_NAME.get_or_init(|| Regex::new(r"^\w+$").expect("valid regex"))
}

pub struct PythonExtractor {
    model: LabelModel,
}

impl PythonExtractor {
    /// Load the Python model from `models_dir`.
    pub fn load(models_dir: &Path) -> CrawlResult<Self> {
        Self::with_model(LabelModel::load(LANGUAGE_NAME, models_dir)?)
    }

    pub fn with_model(model: LabelModel) -> CrawlResult<Self> {
        if model.language() != LANGUAGE_NAME {
            return Err(CrawlError::ModelInvalid {
                language: LANGUAGE_NAME.to_string(),
                reason: format!("got a model for '{}'", model.language()),
            });
        }
        Ok(Self { model })
    }

    /// Modules named by one import statement, top-level package only
    fn modules_in(line: &str) -> Vec<String> {
        if let Some(caps) = from_import().captures(line) {
            return vec![caps[1].to_string()];
        }
        let Some(caps) = plain_import().captures(line) else {
            return Vec::new();
        };
        let body = caps[1].split('#').next().unwrap_or("");
        body.split(',')
            .filter_map(|part| {
                let name = part.split_whitespace().next()?;
                let top = name.split('.').next()?;
                module_name().is_match(top).then(|| top.to_string())
            })
            .collect()
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> &str {
        LANGUAGE_NAME
    }

    fn extensions(&self) -> &[&str] {
        FILE_EXTS
    }

    fn tokenize(&self, line: &str) -> Vec<String> {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ")
            || trimmed.starts_with("from ")
            || trimmed.starts_with("\"\"\"")
            || trimmed.starts_with("'''")
            || trimmed.starts_with('#')
        {
            return Vec::new();
        }
        let code = string_literal().replace_all(line, " ");
        let code = code.split('#').next().unwrap_or("");
        split_tokens(code)
    }

    fn extract_imports(&self, content: &[String]) -> BTreeSet<String> {
        content.iter().flat_map(|line| Self::modules_in(line)).collect()
    }

    fn classify_line(&self, tokens: &[String], file_libraries: &BTreeSet<String>) -> BTreeSet<String> {
        self.model
            .active_labels(tokens)
            .into_iter()
            .filter(|label| file_libraries.contains(*label))
            .map(str::to_string)
            .collect()
    }
}
