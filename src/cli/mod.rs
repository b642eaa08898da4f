use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mediadl",
    about = "Extract media information from web pages through pluggable site handlers",
    version,
    long_about = "Resolves a URL to media metadata by dispatching it to the first site handler that claims it. Handlers come from the built-in set and from plugin directories; extraction results can be cached on disk."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(long, global = true, value_name = "FILE", env = "MEDIADL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Location of the filesystem cache
    #[arg(long, global = true, value_name = "DIR", conflicts_with = "no_cache_dir")]
    pub cache_dir: Option<PathBuf>,

    /// Disable filesystem caching
    #[arg(long, global = true)]
    pub no_cache_dir: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators and status lines
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract media information from a URL
    Extract {
        /// Page or media URL
        #[arg(value_name = "URL")]
        url: String,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Do not follow references returned by the handler
        #[arg(long)]
        flat: bool,
    },

    /// List registered site handlers in matching order
    Handlers {
        /// Show each handler's origin and URL patterns
        #[arg(short, long)]
        verbose: bool,
    },

    /// Manage the filesystem cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the precomputed handler index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Show or write the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Delete the whole cache directory
    Rm,
    /// Print the cache directory
    Dir,
}

#[derive(Subcommand)]
pub enum IndexAction {
    /// Generate the handler index from the built-in handlers
    Build {
        /// Where to write the index (defaults to the configured location)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable summary
    Text,
    /// Full result as JSON
    Json,
    /// One media URL per line
    Urls,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Urls => write!(f, "urls"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true).map_err(|_| anyhow::anyhow!("Unknown output format: {}", s))
    }
}
