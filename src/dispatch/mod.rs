//! URL dispatch: pick the first handler claiming a URL and run it.
//!
//! [`Dispatcher::resolve`] additionally follows `url` results until only
//! videos and playlists of videos remain.

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use thiserror::Error;

use crate::extractors::{ExtractContext, ExtractError, ExtractResult, SiteHandler, UrlRef};
use crate::registry::HandlerRegistry;
use crate::utils::{unsmuggle_url, SmuggledData};

/// Default limit of chained `url` results
pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No handler accepts {0}; is the generic handler registered?")]
    NoHandler(String),

    #[error("Unknown handler {0}")]
    UnknownHandler(String),

    #[error("Gave up resolving {url} after {depth} redirections")]
    TooDeep { url: String, depth: usize },

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl DispatchError {
    /// Failures caused by the content rather than by a bug or the setup
    pub fn is_expected(&self) -> bool {
        matches!(self, DispatchError::Extract(err) if err.is_expected())
    }
}

pub struct Dispatcher<'a> {
    registry: &'a HandlerRegistry,
    ctx: ExtractContext,
    max_depth: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a HandlerRegistry, ctx: ExtractContext) -> Self {
        Self {
            registry,
            ctx,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// First handler in registry order whose patterns match `url`
    pub fn select(&self, url: &str) -> Result<&'a Arc<dyn SiteHandler>, DispatchError> {
        let (clean, _) = unsmuggle_url(url);
        self.registry
            .find_handler(&clean)
            .ok_or(DispatchError::NoHandler(clean))
    }

    /// Run the selected handler once and return whatever it produced
    pub async fn extract(&self, url: &str) -> Result<ExtractResult, DispatchError> {
        let (clean, smuggled) = unsmuggle_url(url);
        let handler = self.select(&clean)?;
        let ctx = self.ctx.with_smuggled(smuggled.unwrap_or_default());

        tracing::info!("[{}] Extracting {}", handler.name(), clean);
        Ok(handler.extract(&clean, &ctx).await?)
    }

    /// Extract `url` and follow every reference it leads to
    pub async fn resolve(&self, url: &str) -> Result<ExtractResult, DispatchError> {
        self.resolve_ref(UrlRef::new(url), SmuggledData::new(), 0).await
    }

    fn resolve_ref<'s>(
        &'s self,
        reference: UrlRef,
        inherited: SmuggledData,
        depth: usize,
    ) -> BoxFuture<'s, Result<ExtractResult, DispatchError>> {
        async move {
            if depth > self.max_depth {
                return Err(DispatchError::TooDeep {
                    url: reference.url,
                    depth,
                });
            }

            let (clean, own) = unsmuggle_url(&reference.url);
            let mut smuggled = inherited;
            smuggled.extend(own.unwrap_or_default());

            let handler = match reference.handler.as_deref() {
                Some(name) => self
                    .registry
                    .get(name)
                    .ok_or_else(|| DispatchError::UnknownHandler(name.to_string()))?,
                None => self.select(&clean)?,
            };

            tracing::info!("[{}] Extracting {}", handler.name(), clean);
            let ctx = self.ctx.with_smuggled(smuggled.clone());
            let result = handler.extract(&clean, &ctx).await?;
            let mut resolved = self.resolve_result(result, smuggled, depth).await?;

            if let Some(title) = reference.title {
                match &mut resolved {
                    ExtractResult::Video(info) if reference.transparent => info.title = title,
                    ExtractResult::Playlist(playlist) if reference.transparent || playlist.title.is_none() => {
                        playlist.title = Some(title)
                    }
                    _ => {}
                }
            }

            Ok(resolved)
        }
        .boxed()
    }

    fn resolve_result<'s>(
        &'s self,
        result: ExtractResult,
        smuggled: SmuggledData,
        depth: usize,
    ) -> BoxFuture<'s, Result<ExtractResult, DispatchError>> {
        async move {
            match result {
                ExtractResult::Video(info) => Ok(ExtractResult::Video(info)),
                ExtractResult::Url(reference) => self.resolve_ref(reference, smuggled, depth + 1).await,
                ExtractResult::Playlist(mut playlist) => {
                    tracing::debug!(
                        "Resolving {} playlist entries of {}",
                        playlist.entries.len(),
                        playlist.webpage_url
                    );
                    let total = playlist.entries.len();
                    let mut entries = Vec::with_capacity(total);
                    let mut first_error = None;
                    for (index, entry) in playlist.entries.into_iter().enumerate() {
                        match self.resolve_result(entry, smuggled.clone(), depth).await {
                            Ok(resolved) => entries.push(resolved),
                            Err(err) => {
                                self.ctx.reporter.warning(&format!(
                                    "Skipping entry {} of {} in {}: {}",
                                    index + 1,
                                    total,
                                    playlist.webpage_url,
                                    err
                                ));
                                first_error.get_or_insert(err);
                            }
                        }
                    }

                    // Only a playlist that lost every entry is a failure
                    if entries.is_empty() {
                        if let Some(err) = first_error {
                            return Err(err);
                        }
                    }
                    playlist.entries = entries;
                    Ok(ExtractResult::Playlist(playlist))
                }
            }
        }
        .boxed()
    }
}
