//! Persistent on-disk cache for data that site handlers are expensive to
//! recompute (decryption keys, API metadata, ...).
//!
//! Entries live at `<root>/<namespace>/<key>.json`. They never expire; they
//! are replaced by a later [`Cache::store`] or dropped together by
//! [`Cache::remove`]. Cache trouble never aborts an extraction: failed writes
//! and corrupt entries are reported as warnings and treated as misses.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::config::{CacheConfig, CacheDir};
use crate::output::reporter::Reporter;
use crate::utils::{expand_path, format_file_size};

/// Subdirectory appended to the base cache location
pub const PRODUCT_NAME: &str = "mediadl";

/// Serialization used for every entry
pub const FORMAT_TAG: &str = "json";

static SAFE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").unwrap());

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache namespace {0:?}")]
    InvalidNamespace(String),

    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    #[error("not removing directory {} - this does not look like a cache dir", .0.display())]
    UnsafeRemoval(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Cache {
    config: CacheConfig,
    reporter: Arc<dyn Reporter>,
}

impl Cache {
    pub fn new(config: CacheConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self { config, reporter }
    }

    /// Caching is on unless the configuration explicitly says `false`
    pub fn enabled(&self) -> bool {
        !matches!(self.config.dir, Some(CacheDir::Enabled(false)))
    }

    /// Root directory holding every namespace
    pub fn root_dir(&self) -> PathBuf {
        let raw = match &self.config.dir {
            Some(CacheDir::Path(path)) => path.clone(),
            _ => {
                let base = std::env::var_os("XDG_CACHE_HOME")
                    .filter(|value| !value.is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("~/.cache"));
                base.join(PRODUCT_NAME)
            }
        };
        expand_path(&raw)
    }

    fn entry_path(&self, namespace: &str, key: &str) -> Result<PathBuf, CacheError> {
        if !SAFE_NAME.is_match(namespace) {
            return Err(CacheError::InvalidNamespace(namespace.to_string()));
        }
        if !SAFE_NAME.is_match(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self
            .root_dir()
            .join(namespace)
            .join(format!("{}.{}", key, FORMAT_TAG)))
    }

    /// Persist `payload` under `(namespace, key)`, replacing any earlier entry.
    ///
    /// Only malformed identifiers are returned as errors. A failed write is
    /// reported as a warning and the entry is simply not stored.
    pub fn store<T>(&self, namespace: &str, key: &str, payload: &T) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let path = self.entry_path(namespace, key)?;
        if !self.enabled() {
            return Ok(());
        }

        self.reporter
            .debug(&format!("Saving {}.{} to cache", namespace, key));
        if let Err(err) = write_entry(&path, payload) {
            self.reporter.warning(&format!(
                "Writing cache to {} failed: {:#}",
                path.display(),
                err
            ));
        }
        Ok(())
    }

    /// Read the entry stored under `(namespace, key)`.
    ///
    /// Returns `Ok(None)` when caching is disabled, the entry is missing or
    /// unreadable, or its contents cannot be parsed as `T` (the last case
    /// also emits one warning).
    pub fn load<T>(&self, namespace: &str, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        let path = self.entry_path(namespace, key)?;
        if !self.enabled() {
            return Ok(None);
        }

        let file = match fs_err::File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                tracing::trace!("Cache miss for {}.{}: {}", namespace, key, err);
                return Ok(None);
            }
        };

        self.reporter
            .debug(&format!("Loading {}.{} from cache", namespace, key));
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_io() => {
                tracing::trace!("Cache read of {} failed: {}", path.display(), err);
                Ok(None)
            }
            Err(_) => {
                let size = match fs_err::metadata(&path) {
                    Ok(meta) => format_file_size(meta.len()),
                    Err(err) => err.to_string(),
                };
                self.reporter.warning(&format!(
                    "Cache retrieval from {} failed ({})",
                    path.display(),
                    size
                ));
                Ok(None)
            }
        }
    }

    /// [`Cache::load`], falling back to `default`
    pub fn load_or<T>(&self, namespace: &str, key: &str, default: T) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        Ok(self.load(namespace, key)?.unwrap_or(default))
    }

    /// Delete the whole cache directory.
    ///
    /// Refuses to touch a root whose path mentions neither `cache` nor `tmp`.
    /// This is a textual heuristic: `/home/cache-backup/important` passes it.
    pub fn remove(&self) -> Result<(), CacheError> {
        if !self.enabled() {
            self.reporter.to_screen(
                "Cache is disabled (Did you combine --no-cache-dir and cache rm?)",
                true,
            );
            return Ok(());
        }

        let root = self.root_dir();
        let text = root.to_string_lossy();
        if !["cache", "tmp"].iter().any(|term| text.contains(term)) {
            return Err(CacheError::UnsafeRemoval(root));
        }

        self.reporter
            .to_screen(&format!("Removing cache dir {} .", root.display()), false);
        if root.exists() {
            self.reporter.to_screen(".", false);
            fs_err::remove_dir_all(&root)?;
        }
        self.reporter.to_screen(".", true);

        tracing::info!("Removed cache dir {}", root.display());
        Ok(())
    }
}

fn write_entry<T>(path: &Path, payload: &T) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
{
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("cache entry has no parent directory"))?;
    fs_err::create_dir_all(dir)?;

    // Write beside the target and rename so readers never see half an entry
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, payload)?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::reporter::CollectingReporter;
    use serde_json::{json, Value};

    fn cache_in(root: &Path) -> (Cache, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let cache = Cache::new(CacheConfig::at(root), reporter.clone());
        (cache, reporter)
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, reporter) = cache_in(dir.path());

        let payload = json!({
            "player": "abc.js",
            "steps": [1, -2, 3.5],
            "nested": {"ok": true, "none": null}
        });
        cache.store("youtube-sigfuncs", "js_abc.123", &payload).unwrap();

        let loaded: Option<Value> = cache.load("youtube-sigfuncs", "js_abc.123").unwrap();
        assert_eq!(loaded, Some(payload));
        assert!(dir.path().join("youtube-sigfuncs").join("js_abc.123.json").is_file());
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn test_store_overwrites_previous_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());

        cache.store("ns", "key", &json!([1, 2])).unwrap();
        cache.store("ns", "key", &json!({"v": 2})).unwrap();

        let loaded: Value = cache.load_or("ns", "key", Value::Null).unwrap();
        assert_eq!(loaded, json!({"v": 2}));
    }

    #[test]
    fn test_invalid_identifiers_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let (cache, _) = cache_in(&root);

        for bad in ["", "a/b", "a b", "../x", "ключ", "a:b"] {
            assert!(matches!(
                cache.store(bad, "key", &1),
                Err(CacheError::InvalidNamespace(_))
            ));
            assert!(matches!(
                cache.load::<Value>("ns", bad),
                Err(CacheError::InvalidKey(_))
            ));
        }
        assert!(!root.exists());
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let reporter = Arc::new(CollectingReporter::new());
        let cache = Cache::new(CacheConfig::disabled(), reporter.clone());

        assert!(!cache.enabled());
        cache.store("ns", "key", &json!({"a": 1})).unwrap();
        assert_eq!(cache.load_or("ns", "key", json!("fallback")).unwrap(), json!("fallback"));

        cache.remove().unwrap();
        assert!(reporter.screen().contains("Cache is disabled"));
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn test_missing_entry_returns_default_silently() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, reporter) = cache_in(dir.path());

        let value = cache.load_or("never", "written", 42u32).unwrap();
        assert_eq!(value, 42);
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn test_corrupt_entry_warns_once() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, reporter) = cache_in(dir.path());

        let ns_dir = dir.path().join("ns");
        fs_err::create_dir_all(&ns_dir).unwrap();
        fs_err::write(ns_dir.join("key.json"), "{not json").unwrap();

        let value = cache.load_or("ns", "key", json!("default")).unwrap();
        assert_eq!(value, json!("default"));

        let warnings = reporter.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Cache retrieval from"));
        assert!(warnings[0].contains("9 B"));
    }

    #[test]
    fn test_shape_mismatch_is_treated_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, reporter) = cache_in(dir.path());

        cache.store("ns", "key", &json!({"a": 1})).unwrap();
        let value: Vec<u32> = cache.load_or("ns", "key", vec![7]).unwrap();
        assert_eq!(value, vec![7]);
        assert_eq!(reporter.warnings().len(), 1);
    }

    #[test]
    fn test_failed_write_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("cache-file");
        fs_err::write(&blocker, "not a directory").unwrap();
        let (cache, reporter) = cache_in(&blocker);

        cache.store("ns", "key", &json!(1)).unwrap();
        let warnings = reporter.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Writing cache to"));
    }

    #[test]
    fn test_remove_refuses_unsafe_root() {
        let reporter = Arc::new(CollectingReporter::new());
        let cache = Cache::new(CacheConfig::at("/home/user/data"), reporter.clone());

        assert!(matches!(cache.remove(), Err(CacheError::UnsafeRemoval(_))));
        assert!(reporter.screen().is_empty());
    }

    #[test]
    fn test_remove_deletes_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".cache").join("product");
        let (cache, reporter) = cache_in(&root);

        cache.store("a", "one", &json!(1)).unwrap();
        cache.store("b", "two", &json!(2)).unwrap();
        assert!(root.join("a").join("one.json").exists());

        cache.remove().unwrap();
        assert!(!root.exists());
        assert!(dir.path().join(".cache").exists());
        assert_eq!(
            reporter.screen(),
            format!("Removing cache dir {} ...\n", root.display())
        );
    }

    #[test]
    fn test_remove_missing_root_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, reporter) = cache_in(&dir.path().join("cache"));

        cache.remove().unwrap();
        assert!(reporter.screen().ends_with(" ..\n"));
    }
}
