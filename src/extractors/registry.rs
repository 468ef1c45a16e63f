//! Extension-keyed registry of extractor variants
//!
//! Built once at startup and shared read-only for the whole crawl. Any
//! extension without a registered variant routes to nothing: such files get
//! no language and contribute no statistics.

use super::{Extractor, PythonExtractor};
use crate::error::CrawlResult;
use crate::models::extension_of;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
    by_language: HashMap<String, Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut extensions: Vec<_> = self.by_extension.keys().collect();
        extensions.sort();
        f.debug_struct("ExtractorRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

impl ExtractorRegistry {
    /// Empty registry; every file routes to nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in variant, loading their models from
    /// `models_dir`. A model that fails to load fails construction.
    pub fn with_defaults(models_dir: &Path) -> CrawlResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(PythonExtractor::load(models_dir)?));
        Ok(registry)
    }

    /// Route the variant's own extensions to it.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            self.by_extension
                .insert(ext.to_ascii_lowercase(), Arc::clone(&extractor));
        }
        debug!("Registered {} extractor", extractor.language());
        self.by_language
            .insert(extractor.language().to_string(), extractor);
    }

    /// Route an extra extension to an already registered language.
    ///
    /// Returns `false`, and logs, when the language is unknown.
    pub fn map_extension(&mut self, ext: &str, language: &str) -> bool {
        let Some(extractor) = self.by_language.get(language) else {
            warn!("Cannot route .{} files: no '{}' extractor registered", ext, language);
            return false;
        };
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.by_extension.insert(ext, Arc::clone(extractor));
        true
    }

    pub fn extractor_for_extension(&self, ext: &str) -> Option<&Arc<dyn Extractor>> {
        self.by_extension.get(&ext.to_ascii_lowercase())
    }

    /// Variant for a repository path, by its extension
    pub fn extractor_for_path(&self, path: &str) -> Option<&Arc<dyn Extractor>> {
        extension_of(path).and_then(|ext| self.extractor_for_extension(ext))
    }

    /// Registered language names, sorted
    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.by_language.keys().map(String::as_str).collect();
        languages.sort_unstable();
        languages
    }
}
