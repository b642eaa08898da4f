use async_trait::async_trait;
use regex::Regex;
use reqwest::Method;
use std::path::Path;
use std::sync::LazyLock;
use url::Url;

use super::{ExtractContext, ExtractError, ExtractResult, Format, MediaContainer, MediaInfo, SiteHandler};

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![Regex::new(
        r"(?i)^https?://[^?#]+\.(?:mp3|m4a|aac|wav|flac|ogg|oga|opus|mp4|m4v|webm|mkv|mov|avi)(?:[?#]|$)",
    )
    .unwrap()]
});

/// Handler for links pointing straight at audio or video files
#[derive(Default)]
pub struct DirectHandler;

impl DirectHandler {
    pub fn new() -> Self {
        Self
    }

    /// Determine the container from URL or content type
    fn determine_container(&self, url: &Url, content_type: Option<&str>) -> Option<MediaContainer> {
        // Try to determine from URL extension first
        let from_extension = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|filename| Path::new(filename).extension())
            .and_then(|ext| MediaContainer::from_extension(&ext.to_string_lossy()));

        from_extension.or_else(|| content_type.and_then(MediaContainer::from_content_type))
    }

    /// Get content information via HEAD request
    async fn get_content_info(
        &self,
        url: &str,
        ctx: &ExtractContext,
    ) -> Result<(Option<String>, Option<u64>), ExtractError> {
        let response = ctx.request(Method::HEAD, url).send().await?;

        if !response.status().is_success() {
            return Err(ExtractError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.to_string());

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok());

        Ok((content_type, content_length))
    }
}

/// File stem of the last path segment, percent-decoded
pub(crate) fn file_stem(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|filename| !filename.is_empty())
        .map(|filename| {
            let name = filename
                .rfind('.')
                .filter(|pos| *pos > 0)
                .map_or(filename, |pos| &filename[..pos]);
            urlencoding::decode(name)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| name.to_string())
        })
}

#[async_trait]
impl SiteHandler for DirectHandler {
    fn name(&self) -> &str {
        "Direct"
    }

    fn url_patterns(&self) -> &[Regex] {
        &PATTERNS
    }

    async fn extract(&self, url: &str, ctx: &ExtractContext) -> Result<ExtractResult, ExtractError> {
        let parsed_url = Url::parse(url).map_err(|err| ExtractError::Parse {
            what: "URL".to_string(),
            reason: err.to_string(),
        })?;

        let (content_type, filesize) = self.get_content_info(url, ctx).await?;
        let container = self.determine_container(&parsed_url, content_type.as_deref());

        let stem = file_stem(&parsed_url).unwrap_or_else(|| "media".to_string());
        let title = stem.replace(['_', '-'], " ");

        let ext = container.map(|c| c.as_str().to_string());
        let format = Format {
            format_id: ext.clone().unwrap_or_else(|| "direct".to_string()),
            url: url.to_string(),
            mime_type: content_type.or_else(|| container.map(|c| c.mime_type().to_string())),
            ext,
            filesize,
            protocol: parsed_url.scheme().to_string(),
        };

        tracing::debug!("Direct media {} ({:?})", url, format.mime_type);

        Ok(ExtractResult::Video(MediaInfo {
            id: stem,
            title,
            formats: vec![format],
            thumbnail: None,
            description: None,
            uploader: None,
            duration: None,
            webpage_url: url.to_string(),
            extractor: self.name().to_string(),
            http_headers: ctx.http_headers(),
        }))
    }
}
