//! Ordered collection of every available site handler.
//!
//! The order is `[plugin handlers] + [built-in handlers] + [Generic]`:
//! plugins can shadow built-ins with overlapping patterns, and the catch-all
//! fallback never shadows anything.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

pub mod lazy;
pub mod plugins;

use crate::config::Config;
use crate::extractors::{SiteHandler, BUILTIN_HANDLERS, FALLBACK_HANDLER};
use crate::output::reporter::Reporter;

pub use lazy::{LazyIndex, LazyIndexError};
pub use plugins::{LoadedPlugin, PluginError, PluginHandler};

static GLOBAL: OnceLock<HandlerRegistry> = OnceLock::new();

/// Where a registered handler came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerSource {
    Plugin(String),
    Builtin,
    /// Built-in known only through the handler index so far
    Lazy,
}

#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn SiteHandler>,
    pub source: HandlerSource,
}

/// Inputs of registry construction
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub no_lazy: bool,
    pub lazy_index: Option<PathBuf>,
    pub no_plugins: bool,
    pub plugin_dirs: Vec<PathBuf>,
}

impl RegistryOptions {
    pub fn from_config(config: &Config) -> Self {
        let plugin_dirs = if config.registry.plugin_dirs.is_empty() {
            plugins::default_plugin_dirs()
        } else {
            config.registry.plugin_dirs.clone()
        };

        Self {
            no_lazy: config.registry.no_lazy_handlers,
            lazy_index: config.lazy_index_path(),
            no_plugins: config.registry.no_plugins,
            plugin_dirs,
        }
    }
}

/// Registry of site handlers
pub struct HandlerRegistry {
    entries: Vec<RegisteredHandler>,
    lazy: bool,
}

impl HandlerRegistry {
    /// Assemble a registry from plugin and built-in handlers.
    ///
    /// Any built-in named like the fallback is moved to the very end.
    pub fn new(plugins: Vec<RegisteredHandler>, builtins: Vec<RegisteredHandler>, lazy: bool) -> Self {
        let (fallback, specific): (Vec<_>, Vec<_>) = builtins
            .into_iter()
            .partition(|entry| entry.handler.name() == FALLBACK_HANDLER);

        let mut entries = plugins;
        entries.extend(specific);
        entries.extend(fallback);

        Self { entries, lazy }
    }

    /// Build the registry: handler index if possible, full registration
    /// otherwise, plugins in front.
    pub fn build(options: &RegistryOptions, reporter: &dyn Reporter) -> Self {
        let (builtins, lazy) = match Self::lazy_builtins(options) {
            Ok(handlers) => {
                tracing::debug!("Using handler index with {} entries", handlers.len());
                (handlers, true)
            }
            Err(err) => {
                tracing::debug!("Handler index unavailable ({}), registering all handlers", err);
                (full_registration(), false)
            }
        };

        let plugins = if options.no_plugins {
            Vec::new()
        } else {
            plugins::discover(&options.plugin_dirs, reporter)
                .into_iter()
                .flat_map(|plugin| {
                    let name = plugin.name;
                    plugin.handlers.into_iter().map(move |handler| RegisteredHandler {
                        handler: Arc::new(handler),
                        source: HandlerSource::Plugin(name.clone()),
                    })
                })
                .collect()
        };

        let registry = Self::new(plugins, builtins, lazy);
        tracing::info!(
            "Registered {} handlers ({} from plugins, lazy index: {})",
            registry.len(),
            registry.plugin_count(),
            registry.is_lazy()
        );
        registry
    }

    fn lazy_builtins(options: &RegistryOptions) -> Result<Vec<RegisteredHandler>, LazyIndexError> {
        if options.no_lazy {
            return Err(LazyIndexError::Disabled);
        }
        let path = options.lazy_index.as_deref().ok_or(LazyIndexError::NoPath)?;
        let handlers = LazyIndex::load(path)?.into_handlers()?;
        Ok(handlers
            .into_iter()
            .map(|handler| RegisteredHandler {
                handler,
                source: HandlerSource::Lazy,
            })
            .collect())
    }

    /// Find the first handler claiming `url`
    pub fn find_handler(&self, url: &str) -> Option<&Arc<dyn SiteHandler>> {
        self.entries
            .iter()
            .map(|entry| &entry.handler)
            .find(|handler| handler.supports_url(url))
    }

    /// Look a handler up by name, first registration wins
    pub fn get(&self, name: &str) -> Option<&Arc<dyn SiteHandler>> {
        self.entries
            .iter()
            .map(|entry| &entry.handler)
            .find(|handler| handler.name() == name)
    }

    pub fn entries(&self) -> &[RegisteredHandler] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.handler.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether built-ins came from the handler index
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn plugin_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.source, HandlerSource::Plugin(_)))
            .count()
    }
}

/// Instantiate every built-in handler, fallback last
pub fn full_registration() -> Vec<RegisteredHandler> {
    BUILTIN_HANDLERS
        .iter()
        .filter(|entry| entry.name != FALLBACK_HANDLER)
        .chain(BUILTIN_HANDLERS.iter().filter(|entry| entry.name == FALLBACK_HANDLER))
        .map(|entry| RegisteredHandler {
            handler: Arc::from((entry.build)()),
            source: HandlerSource::Builtin,
        })
        .collect()
}

/// Build the process-wide registry on first call and return it afterwards
pub fn init(options: &RegistryOptions, reporter: &dyn Reporter) -> &'static HandlerRegistry {
    GLOBAL.get_or_init(|| HandlerRegistry::build(options, reporter))
}

/// The process-wide registry, if [`init`] has run
pub fn global() -> Option<&'static HandlerRegistry> {
    GLOBAL.get()
}
