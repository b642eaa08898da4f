//! mediadl - extract media information from web pages through pluggable site handlers
//!
//! The library is organised around three pieces: a persistent filesystem
//! [`cache`], a [`registry`] of site handlers (built-in, indexed for lazy
//! loading, or discovered from plugin directories) and the [`dispatch`]er
//! that routes a URL to the first handler claiming it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod extractors;
pub mod output;
pub mod registry;
pub mod utils;

pub use cache::{Cache, CacheError};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use dispatch::{DispatchError, Dispatcher};
pub use extractors::{ExtractContext, ExtractError, ExtractResult, MediaInfo, SiteHandler};
pub use registry::{HandlerRegistry, RegistryOptions};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
