//! Precomputed handler index.
//!
//! The index lists every built-in handler with the source of its URL
//! patterns. Loading it lets the registry recognize URLs without building a
//! single handler; the real handler is only constructed when it is asked to
//! extract something.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::extractors::{
    builtin, BuiltinHandler, ExtractContext, ExtractError, ExtractResult, SiteHandler,
    BUILTIN_HANDLERS, FALLBACK_HANDLER,
};

#[derive(Debug, Error)]
pub enum LazyIndexError {
    #[error("handler index disabled")]
    Disabled,

    #[error("no handler index location configured")]
    NoPath,

    #[error("handler index {0} not found")]
    NotFound(PathBuf),

    #[error("failed to read handler index: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed handler index: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("handler index was generated by version {found}, this is {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("handler index names unknown handler {0}")]
    UnknownHandler(String),

    #[error("handler index lacks built-in handler {0}")]
    MissingHandler(&'static str),

    #[error("handler index pattern for {handler} is invalid: {source}")]
    BadPattern {
        handler: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LazyIndex {
    /// Crate version that generated the index
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub handlers: Vec<IndexEntry>,
}

impl LazyIndex {
    /// Build the index by instantiating every built-in handler once
    pub fn generate() -> Self {
        let handlers = BUILTIN_HANDLERS
            .iter()
            .map(|entry| {
                let handler = (entry.build)();
                IndexEntry {
                    name: entry.name.to_string(),
                    patterns: handler
                        .url_patterns()
                        .iter()
                        .map(|p| p.as_str().to_string())
                        .collect(),
                }
            })
            .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            handlers,
        }
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs_err::write(path, content)?;
        tracing::info!("Wrote handler index with {} entries to {}", self.handlers.len(), path.display());
        Ok(())
    }

    /// Read an index and check it was produced by this build
    pub fn load(path: &Path) -> Result<Self, LazyIndexError> {
        if !path.exists() {
            return Err(LazyIndexError::NotFound(path.to_path_buf()));
        }

        let content = fs_err::read_to_string(path)?;
        let index: LazyIndex = serde_json::from_str(&content)?;

        let expected = env!("CARGO_PKG_VERSION");
        if index.version != expected {
            return Err(LazyIndexError::VersionMismatch {
                found: index.version,
                expected: expected.to_string(),
            });
        }

        Ok(index)
    }

    /// Turn the index into deferred handlers, fallback last
    pub fn into_handlers(self) -> Result<Vec<Arc<dyn SiteHandler>>, LazyIndexError> {
        if let Some(missing) = BUILTIN_HANDLERS
            .iter()
            .find(|entry| !self.handlers.iter().any(|h| h.name == entry.name))
        {
            return Err(LazyIndexError::MissingHandler(missing.name));
        }

        let mut handlers: Vec<Arc<dyn SiteHandler>> = Vec::with_capacity(self.handlers.len());
        let mut fallback = None;

        for entry in self.handlers {
            let builtin = builtin(&entry.name)
                .ok_or_else(|| LazyIndexError::UnknownHandler(entry.name.clone()))?;
            let patterns = entry
                .patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| LazyIndexError::BadPattern {
                    handler: entry.name.clone(),
                    source,
                })?;

            let handler = Arc::new(LazyHandler::new(builtin, patterns));
            if builtin.name == FALLBACK_HANDLER {
                fallback = Some(handler);
            } else {
                handlers.push(handler);
            }
        }

        handlers.extend(fallback.map(|h| h as Arc<dyn SiteHandler>));
        Ok(handlers)
    }
}

/// Stand-in that recognizes with indexed patterns and builds the real
/// handler on first extraction
pub struct LazyHandler {
    builtin: &'static BuiltinHandler,
    patterns: Vec<Regex>,
    real: OnceLock<Box<dyn SiteHandler>>,
}

impl LazyHandler {
    pub fn new(builtin: &'static BuiltinHandler, patterns: Vec<Regex>) -> Self {
        Self {
            builtin,
            patterns,
            real: OnceLock::new(),
        }
    }

    /// Whether the real handler has been constructed yet
    pub fn is_loaded(&self) -> bool {
        self.real.get().is_some()
    }

    fn real(&self) -> &dyn SiteHandler {
        self.real
            .get_or_init(|| {
                tracing::debug!("Loading handler {}", self.builtin.name);
                (self.builtin.build)()
            })
            .as_ref()
    }
}

#[async_trait]
impl SiteHandler for LazyHandler {
    fn name(&self) -> &str {
        self.builtin.name
    }

    fn url_patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn extract(&self, url: &str, ctx: &ExtractContext) -> Result<ExtractResult, ExtractError> {
        self.real().extract(url, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(handlers: &[Arc<dyn SiteHandler>]) -> Vec<String> {
        handlers.iter().map(|h| h.name().to_string()).collect()
    }

    #[test]
    fn test_generate_write_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("handlers.index.json");

        LazyIndex::generate().write(&path).unwrap();
        let handlers = LazyIndex::load(&path).unwrap().into_handlers().unwrap();

        let expected: Vec<String> = BUILTIN_HANDLERS.iter().map(|b| b.name.to_string()).collect();
        assert_eq!(names(&handlers), expected);
        assert!(handlers[0].supports_url("https://example.com/clip.mp4"));
        assert!(handlers.last().unwrap().supports_url("https://example.com/"));
    }

    #[test]
    fn test_fallback_forced_last() {
        let mut index = LazyIndex::generate();
        index.handlers.rotate_right(1);
        assert_eq!(index.handlers[0].name, FALLBACK_HANDLER);

        let handlers = index.into_handlers().unwrap();
        assert_eq!(handlers.last().unwrap().name(), FALLBACK_HANDLER);
        assert_eq!(handlers.len(), BUILTIN_HANDLERS.len());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handlers.index.json");

        let mut index = LazyIndex::generate();
        index.version = "0.0.0-stale".into();
        index.write(&path).unwrap();

        assert!(matches!(
            LazyIndex::load(&path),
            Err(LazyIndexError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_structural_failures() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(LazyIndex::load(&missing), Err(LazyIndexError::NotFound(_))));

        let garbage = dir.path().join("garbage.json");
        fs_err::write(&garbage, "[1, 2").unwrap();
        assert!(matches!(LazyIndex::load(&garbage), Err(LazyIndexError::Malformed(_))));

        let mut index = LazyIndex::generate();
        index.handlers.push(IndexEntry {
            name: "Vanished".into(),
            patterns: vec![],
        });
        assert!(matches!(index.into_handlers(), Err(LazyIndexError::UnknownHandler(_))));

        let mut index = LazyIndex::generate();
        index.handlers.remove(0);
        assert!(matches!(index.into_handlers(), Err(LazyIndexError::MissingHandler("Direct"))));

        let mut index = LazyIndex::generate();
        index.handlers[0].patterns = vec!["(unclosed".into()];
        assert!(matches!(index.into_handlers(), Err(LazyIndexError::BadPattern { .. })));
    }

    #[test]
    fn test_lazy_handler_defers_construction() {
        let entry = builtin("Direct").unwrap();
        let handler = LazyHandler::new(entry, vec![Regex::new(r"\.mp4$").unwrap()]);

        assert!(handler.supports_url("https://example.com/a.mp4"));
        assert!(!handler.is_loaded());

        assert_eq!(handler.real().name(), "Direct");
        assert!(handler.is_loaded());
    }
}
