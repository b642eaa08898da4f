use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediadl::cache::Cache;
use mediadl::cli::{CacheAction, Cli, Commands, IndexAction, OutputFormat};
use mediadl::config::{CacheConfig, Config};
use mediadl::dispatch::Dispatcher;
use mediadl::extractors::ExtractContext;
use mediadl::output::{
    self,
    reporter::{ConsoleReporter, Reporter},
};
use mediadl::registry::{self, HandlerSource, LazyIndex, RegistryOptions};
use mediadl::utils;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("mediadl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "mediadl=info".into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.cache_dir {
        config.cache = CacheConfig::at(dir);
    }
    if cli.no_cache_dir {
        config.cache = CacheConfig::disabled();
    }

    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new(cli.quiet));

    match cli.command {
        Commands::Extract {
            url,
            format,
            output,
            flat,
        } => {
            let url = utils::validate_and_normalize_url(&url)?;
            let format = match format {
                Some(format) => format,
                None => config.app.default_output_format.parse::<OutputFormat>()?,
            };

            let registry = registry::init(&RegistryOptions::from_config(&config), reporter.as_ref());
            let ctx = ExtractContext::new(&config, reporter.clone())?;
            let dispatcher = Dispatcher::new(registry, ctx).with_max_depth(config.app.max_resolve_depth);

            let progress = if cli.quiet {
                ProgressBar::hidden()
            } else {
                ProgressBar::new_spinner()
            };
            progress.set_style(
                ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
            );
            progress.set_message(format!("Extracting {}", url));
            progress.enable_steady_tick(Duration::from_millis(100));

            let result = if flat {
                dispatcher.extract(&url).await
            } else {
                dispatcher.resolve(&url).await
            };
            progress.finish_and_clear();

            let result = match result {
                Ok(result) => result,
                // Content problems are reported as they are; anything else gets a hint
                Err(err) if err.is_expected() => return Err(err.into()),
                Err(err) => {
                    return Err(anyhow::Error::new(err).context(format!(
                        "Extraction of {} failed; rerun with --verbose for details",
                        url
                    )))
                }
            };
            tracing::debug!(
                "Extracted {} with {}",
                result.title().unwrap_or("untitled result"),
                result.extractor().unwrap_or("an unresolved reference")
            );

            match output {
                Some(path) => {
                    output::save_to_file(&result, &path, &format).await?;
                    println!(
                        "{} saved to: {}",
                        result.title().unwrap_or("Result"),
                        path.display()
                    );
                }
                None => {
                    output::print_to_console(&result, &format)?;
                }
            }
        }
        Commands::Handlers { verbose } => {
            let registry = registry::init(&RegistryOptions::from_config(&config), reporter.as_ref());
            for entry in registry.entries() {
                if !verbose {
                    println!("{}", entry.handler.name());
                    continue;
                }

                let source = match &entry.source {
                    HandlerSource::Plugin(plugin) => format!("plugin {}", plugin),
                    HandlerSource::Builtin => "built-in".to_string(),
                    HandlerSource::Lazy => "built-in, indexed".to_string(),
                };
                println!("{} ({})", entry.handler.name(), source);
                for pattern in entry.handler.url_patterns() {
                    println!("    {}", pattern.as_str());
                }
            }
        }
        Commands::Cache { action } => {
            let cache = Cache::new(config.cache.clone(), reporter.clone());
            match action {
                CacheAction::Rm => cache.remove()?,
                CacheAction::Dir => {
                    if cache.enabled() {
                        println!("{}", cache.root_dir().display());
                    } else {
                        println!("Cache is disabled");
                    }
                }
            }
        }
        Commands::Index { action } => match action {
            IndexAction::Build { output } => {
                let path = output
                    .or_else(|| config.lazy_index_path())
                    .context("Could not determine handler index location")?;
                let index = LazyIndex::generate();
                index.write(&path)?;
                println!(
                    "Handler index with {} entries written to: {}",
                    index.handlers.len(),
                    path.display()
                );
            }
        },
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::config_path()?,
                };
                if path.exists() {
                    println!("Configuration already exists at: {}", path.display());
                } else {
                    config.save(&path)?;
                    println!("Configuration written to: {}", path.display());
                }
            }
        }
    }

    Ok(())
}
