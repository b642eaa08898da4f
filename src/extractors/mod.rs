use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod direct;
pub mod generic;
pub mod oembed;
pub mod playlist;

use crate::cache::Cache;
use crate::config::Config;
use crate::output::reporter::Reporter;
use crate::utils::SmuggledData;

/// Name of the catch-all handler that must stay last in every registry
pub const FALLBACK_HANDLER: &str = "Generic";

/// A single downloadable rendition of a media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub format_id: String,

    /// Direct URL of the media bytes
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Size in bytes if the server told us
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,

    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "https".to_string()
}

/// Normalized description of one media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub formats: Vec<Format>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,

    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    pub webpage_url: String,

    /// Name of the handler that produced this record
    #[serde(default)]
    pub extractor: String,

    /// Headers a downloader must send along with the format URLs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub entries: Vec<ExtractResult>,

    pub webpage_url: String,

    #[serde(default)]
    pub extractor: String,
}

/// Reference to another URL that has to be dispatched again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRef {
    /// Target URL, possibly carrying smuggled data
    pub url: String,

    /// Force a handler by name instead of matching the URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Fields set here take precedence over the resolved record
    #[serde(default)]
    pub transparent: bool,
}

impl UrlRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handler: None,
            title: None,
            transparent: false,
        }
    }

    pub fn transparent(url: impl Into<String>, title: Option<String>) -> Self {
        Self {
            title,
            transparent: true,
            ..Self::new(url)
        }
    }
}

/// What a handler hands back to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum ExtractResult {
    Video(MediaInfo),
    Playlist(Playlist),
    Url(UrlRef),
}

impl ExtractResult {
    pub fn title(&self) -> Option<&str> {
        match self {
            ExtractResult::Video(info) => Some(&info.title),
            ExtractResult::Playlist(playlist) => playlist.title.as_deref(),
            ExtractResult::Url(url_ref) => url_ref.title.as_deref(),
        }
    }

    /// Name of the handler that produced this record, if known
    pub fn extractor(&self) -> Option<&str> {
        match self {
            ExtractResult::Video(info) => Some(&info.extractor),
            ExtractResult::Playlist(playlist) => Some(&playlist.extractor),
            ExtractResult::Url(_) => None,
        }
    }
}

/// Typed extraction failures; the dispatcher passes them through unchanged
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported URL: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Expected(String),

    #[error("This content is not available from your location: {0}")]
    GeoRestricted(String),

    #[error("Login required to access {0}")]
    LoginRequired(String),

    #[error("HTTP {status} while fetching {url}")]
    Http { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Plugin handler {handler} failed: {reason}")]
    Plugin { handler: String, reason: String },
}

impl ExtractError {
    /// Failures caused by the content rather than by a bug or the network
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ExtractError::Unsupported(_)
                | ExtractError::Expected(_)
                | ExtractError::GeoRestricted(_)
                | ExtractError::LoginRequired(_)
        )
    }
}

/// Everything a handler may use while extracting
#[derive(Clone)]
pub struct ExtractContext {
    pub client: Client,
    pub cache: Cache,
    pub reporter: Arc<dyn Reporter>,

    /// Data smuggled in by whoever dispatched this URL
    pub smuggled: SmuggledData,
}

impl ExtractContext {
    pub fn new(config: &Config, reporter: Arc<dyn Reporter>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.network.user_agent.as_str())
            .timeout(Duration::from_secs(config.network.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            cache: Cache::new(config.cache.clone(), reporter.clone()),
            reporter,
            smuggled: SmuggledData::new(),
        })
    }

    pub fn with_smuggled(&self, smuggled: SmuggledData) -> Self {
        Self {
            smuggled,
            ..self.clone()
        }
    }

    /// Extra request headers passed down through `http_headers`
    pub fn http_headers(&self) -> BTreeMap<String, String> {
        self.smuggled
            .get("http_headers")
            .and_then(|value| value.as_object())
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|v| (name.clone(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Request builder carrying the smuggled headers
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http_headers()
            .into_iter()
            .fold(self.client.request(method, url), |builder, (name, value)| {
                builder.header(name, value)
            })
    }
}

/// Trait implemented by every site handler
#[async_trait]
pub trait SiteHandler: Send + Sync {
    /// Unique identifier for this handler
    fn name(&self) -> &str;

    /// URL patterns this handler claims
    fn url_patterns(&self) -> &[Regex];

    /// Check if this handler can handle the given URL
    fn supports_url(&self, url: &str) -> bool {
        self.url_patterns().iter().any(|p| p.is_match(url))
    }

    /// Extract media information from a URL (smuggled data already removed)
    async fn extract(&self, url: &str, ctx: &ExtractContext) -> Result<ExtractResult, ExtractError>;
}

/// Entry of the compiled-in handler table
pub struct BuiltinHandler {
    pub name: &'static str,
    pub build: fn() -> Box<dyn SiteHandler>,
}

fn build<H>() -> Box<dyn SiteHandler>
where
    H: SiteHandler + Default + 'static,
{
    Box::new(H::default())
}

/// Built-in handlers in declaration order. Recognition of every entry is
/// purely pattern based so the handler index reproduces it exactly.
pub static BUILTIN_HANDLERS: &[BuiltinHandler] = &[
    BuiltinHandler {
        name: "Direct",
        build: build::<direct::DirectHandler>,
    },
    BuiltinHandler {
        name: "PlaylistFile",
        build: build::<playlist::PlaylistFileHandler>,
    },
    BuiltinHandler {
        name: "OEmbed",
        build: build::<oembed::OEmbedHandler>,
    },
    BuiltinHandler {
        name: FALLBACK_HANDLER,
        build: build::<generic::GenericHandler>,
    },
];

/// Look up a built-in handler by name
pub fn builtin(name: &str) -> Option<&'static BuiltinHandler> {
    BUILTIN_HANDLERS.iter().find(|entry| entry.name == name)
}

/// Container formats recognized from file extensions and content types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaContainer {
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
    Opus,
    Mp4,
    Webm,
    Mkv,
    Mov,
    Avi,
}

impl MediaContainer {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaContainer::Mp3 => "mp3",
            MediaContainer::M4a => "m4a",
            MediaContainer::Wav => "wav",
            MediaContainer::Flac => "flac",
            MediaContainer::Ogg => "ogg",
            MediaContainer::Opus => "opus",
            MediaContainer::Mp4 => "mp4",
            MediaContainer::Webm => "webm",
            MediaContainer::Mkv => "mkv",
            MediaContainer::Mov => "mov",
            MediaContainer::Avi => "avi",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(MediaContainer::Mp3),
            "m4a" | "aac" => Some(MediaContainer::M4a),
            "wav" => Some(MediaContainer::Wav),
            "flac" => Some(MediaContainer::Flac),
            "ogg" | "oga" => Some(MediaContainer::Ogg),
            "opus" => Some(MediaContainer::Opus),
            "mp4" | "m4v" => Some(MediaContainer::Mp4),
            "webm" => Some(MediaContainer::Webm),
            "mkv" => Some(MediaContainer::Mkv),
            "mov" => Some(MediaContainer::Mov),
            "avi" => Some(MediaContainer::Avi),
            _ => None,
        }
    }

    /// Match an HTTP `Content-Type` value
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        match mime.as_str() {
            "audio/mpeg" | "audio/mp3" => Some(MediaContainer::Mp3),
            "audio/mp4" | "audio/aac" | "audio/x-m4a" => Some(MediaContainer::M4a),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some(MediaContainer::Wav),
            "audio/flac" | "audio/x-flac" => Some(MediaContainer::Flac),
            "audio/ogg" | "video/ogg" => Some(MediaContainer::Ogg),
            "audio/opus" => Some(MediaContainer::Opus),
            "video/mp4" => Some(MediaContainer::Mp4),
            "video/webm" | "audio/webm" => Some(MediaContainer::Webm),
            "video/x-matroska" => Some(MediaContainer::Mkv),
            "video/quicktime" => Some(MediaContainer::Mov),
            "video/x-msvideo" => Some(MediaContainer::Avi),
            _ => None,
        }
    }

    /// Get MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaContainer::Mp3 => "audio/mpeg",
            MediaContainer::M4a => "audio/mp4",
            MediaContainer::Wav => "audio/wav",
            MediaContainer::Flac => "audio/flac",
            MediaContainer::Ogg => "audio/ogg",
            MediaContainer::Opus => "audio/opus",
            MediaContainer::Mp4 => "video/mp4",
            MediaContainer::Webm => "video/webm",
            MediaContainer::Mkv => "video/x-matroska",
            MediaContainer::Mov => "video/quicktime",
            MediaContainer::Avi => "video/x-msvideo",
        }
    }
}
