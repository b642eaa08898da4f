use async_trait::async_trait;
use regex::Regex;
use reqwest::Method;
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::LazyLock;
use url::Url;

use super::direct::file_stem;
use super::{
    ExtractContext, ExtractError, ExtractResult, Format, MediaContainer, MediaInfo, Playlist,
    SiteHandler, UrlRef,
};
use crate::utils::{extract_domain, smuggle_url, SmuggledData};

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Match any HTTP(S) URL as fallback
        Regex::new(r"^https?://").unwrap(),
    ]
});

static OG_MEDIA: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"meta[property="og:video"], meta[property="og:video:url"], meta[property="og:video:secure_url"], meta[property="og:audio"], meta[property="og:audio:secure_url"]"#,
    )
    .unwrap()
});
static MEDIA_ELEMENTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("video[src], audio[src], video source[src], audio source[src]").unwrap()
});
static IFRAMES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("iframe[src]").unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

/// What a page scan turned up
#[derive(Debug, Default, PartialEq)]
pub struct PageScan {
    pub title: Option<String>,

    /// Media and embedded player URLs in document order, without duplicates
    pub references: Vec<String>,
}

/// Collect media references from an HTML document
pub fn scan_page(html: &str, base: &Url) -> PageScan {
    let document = Html::parse_document(html);

    let title = document
        .select(&OG_TITLE)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            document
                .select(&TITLE)
                .map(|el| el.text().collect::<String>().trim().to_string())
                .find(|t| !t.is_empty())
        });

    let candidates = document
        .select(&OG_MEDIA)
        .filter_map(|el| el.value().attr("content"))
        .chain(document.select(&MEDIA_ELEMENTS).filter_map(|el| el.value().attr("src")))
        .chain(document.select(&IFRAMES).filter_map(|el| el.value().attr("src")));

    let mut references: Vec<String> = Vec::new();
    for candidate in candidates {
        let Ok(resolved) = base.join(candidate.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let resolved = resolved.to_string();
        if !references.contains(&resolved) {
            references.push(resolved);
        }
    }

    PageScan { title, references }
}

/// Fallback handler used when no site-specific handler matches
#[derive(Default)]
pub struct GenericHandler;

impl GenericHandler {
    pub const fn new() -> Self {
        Self
    }

    fn page_id(url: &Url) -> String {
        file_stem(url)
            .or_else(|| extract_domain(url.as_str()))
            .unwrap_or_else(|| "page".to_string())
    }
}

#[async_trait]
impl SiteHandler for GenericHandler {
    fn name(&self) -> &str {
        "Generic"
    }

    fn url_patterns(&self) -> &[Regex] {
        &PATTERNS
    }

    async fn extract(&self, url: &str, ctx: &ExtractContext) -> Result<ExtractResult, ExtractError> {
        let response = ctx.request(Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(ExtractError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        // Direct link served without a telling extension
        if let Some(container) = MediaContainer::from_content_type(&content_type) {
            let id = Self::page_id(&final_url);
            return Ok(ExtractResult::Video(MediaInfo {
                title: id.clone(),
                id,
                formats: vec![Format {
                    format_id: container.as_str().to_string(),
                    url: final_url.to_string(),
                    ext: Some(container.as_str().to_string()),
                    mime_type: Some(content_type),
                    filesize: response.content_length(),
                    protocol: final_url.scheme().to_string(),
                }],
                thumbnail: None,
                description: None,
                uploader: None,
                duration: None,
                webpage_url: url.to_string(),
                extractor: self.name().to_string(),
                http_headers: ctx.http_headers(),
            }));
        }

        if !content_type.contains("html") {
            return Err(ExtractError::Unsupported(url.to_string()));
        }

        let body = response.text().await?;
        let scan = scan_page(&body, &final_url);
        tracing::debug!(
            "Generic scan of {} found {} reference(s)",
            final_url,
            scan.references.len()
        );

        // Embedded players usually insist on seeing the embedding page
        let mut referer = SmuggledData::new();
        referer.insert("http_headers".into(), json!({ "Referer": final_url.as_str() }));

        let mut references: Vec<UrlRef> = scan
            .references
            .iter()
            .map(|reference| UrlRef::new(smuggle_url(reference, &referer)))
            .collect();

        match references.len() {
            0 => Err(ExtractError::Unsupported(url.to_string())),
            1 => {
                let mut reference = references.remove(0);
                reference.title = scan.title;
                reference.transparent = true;
                Ok(ExtractResult::Url(reference))
            }
            _ => Ok(ExtractResult::Playlist(Playlist {
                id: Self::page_id(&final_url),
                title: scan.title,
                entries: references.into_iter().map(ExtractResult::Url).collect(),
                webpage_url: url.to_string(),
                extractor: self.name().to_string(),
            })),
        }
    }
}
