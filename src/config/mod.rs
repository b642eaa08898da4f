use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment toggle forcing full handler registration
pub const NO_LAZY_HANDLERS_ENV: &str = "MEDIADL_NO_LAZY_HANDLERS";

/// Environment toggle disabling plugin discovery
pub const NO_PLUGINS_ENV: &str = "MEDIADL_NO_PLUGINS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent cache settings
    pub cache: CacheConfig,

    /// Handler registry settings
    pub registry: RegistryConfig,

    /// HTTP settings handed to site handlers
    pub network: NetworkConfig,

    /// Application settings
    pub app: AppConfig,
}

/// Cache directory setting as written in the config file.
///
/// `true` or absent uses the default location, `false` disables caching,
/// a string is an explicit root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheDir {
    Enabled(bool),
    Path(PathBuf),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<CacheDir>,
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            dir: Some(CacheDir::Enabled(false)),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(CacheDir::Path(path.into())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directories scanned for plugins. Empty means the default locations.
    pub plugin_dirs: Vec<PathBuf>,

    /// Skip plugin discovery entirely
    pub no_plugins: bool,

    /// Location of the precomputed handler index
    pub lazy_index: Option<PathBuf>,

    /// Always instantiate every built-in handler
    pub no_lazy_handlers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("mediadl/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How many URL references the dispatcher follows before giving up
    pub max_resolve_depth: usize,

    /// Default output format
    pub default_output_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_resolve_depth: 8,
            default_output_format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the default location, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            tracing::debug!("Loaded configuration from {}", config_path.display());
            config
        } else if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("mediadl").join("config.yaml"))
    }

    /// Default location of the precomputed handler index
    pub fn default_lazy_index_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mediadl").join("handlers.index.json"))
    }

    /// Effective handler index location
    pub fn lazy_index_path(&self) -> Option<PathBuf> {
        self.registry
            .lazy_index
            .clone()
            .or_else(Self::default_lazy_index_path)
    }

    fn apply_env_overrides(&mut self) {
        if env_flag(NO_LAZY_HANDLERS_ENV) {
            self.registry.no_lazy_handlers = true;
        }
        if env_flag(NO_PLUGINS_ENV) {
            self.registry.no_plugins = true;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app.max_resolve_depth == 0 {
            anyhow::bail!("app.max_resolve_depth must be at least 1");
        }

        if self.network.timeout_secs == 0 {
            anyhow::bail!("network.timeout_secs must be at least 1");
        }

        if let Some(CacheDir::Path(path)) = &self.cache.dir {
            if path.as_os_str().is_empty() {
                anyhow::bail!("cache.dir must not be an empty path");
            }
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        match &self.cache.dir {
            Some(CacheDir::Enabled(false)) => println!("  Cache: disabled"),
            Some(CacheDir::Path(path)) => println!("  Cache Dir: {}", path.display()),
            _ => println!("  Cache Dir: default"),
        }
        if self.registry.plugin_dirs.is_empty() {
            println!("  Plugin Dirs: default");
        } else {
            for dir in &self.registry.plugin_dirs {
                println!("  Plugin Dir: {}", dir.display());
            }
        }
        println!("  Plugins Enabled: {}", !self.registry.no_plugins);
        println!("  Lazy Handlers: {}", !self.registry.no_lazy_handlers);
        if let Some(index) = self.lazy_index_path() {
            println!("  Handler Index: {}", index.display());
        }
        println!("  User Agent: {}", self.network.user_agent);
        println!("  Max Resolve Depth: {}", self.app.max_resolve_depth);
        println!("  Default Format: {}", self.app.default_output_format);
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty())
}
