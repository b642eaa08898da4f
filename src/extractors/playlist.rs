use async_trait::async_trait;
use regex::Regex;
use reqwest::Method;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use url::Url;

use super::direct::file_stem;
use super::{ExtractContext, ExtractError, ExtractResult, Playlist, SiteHandler, UrlRef};

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![Regex::new(r"(?i)^https?://[^?#]+\.(?:m3u|pls)(?:[?#]|$)").unwrap()]
});

/// One line item of a playlist file
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: Option<String>,
}

/// Handler for `.m3u` and `.pls` playlist files
#[derive(Default)]
pub struct PlaylistFileHandler;

impl PlaylistFileHandler {
    pub fn new() -> Self {
        Self
    }
}

/// Parse an M3U playlist. `#EXTINF` titles attach to the next entry.
pub fn parse_m3u(body: &str, base: &Url) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut pending_title = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            pending_title = info
                .split_once(',')
                .map(|(_, title)| title.trim().to_string())
                .filter(|title| !title.is_empty());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Ok(url) = base.join(line) {
            entries.push(PlaylistEntry {
                url: url.to_string(),
                title: pending_title.take(),
            });
        }
    }

    entries
}

/// Parse a PLS playlist, ordered by entry number
pub fn parse_pls(body: &str, base: &Url) -> Vec<PlaylistEntry> {
    let mut files = BTreeMap::new();
    let mut titles = BTreeMap::new();

    for line in body.lines().map(str::trim) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if let Some(n) = key.strip_prefix("file").and_then(|n| n.parse::<u32>().ok()) {
            files.insert(n, value.to_string());
        } else if let Some(n) = key.strip_prefix("title").and_then(|n| n.parse::<u32>().ok()) {
            titles.insert(n, value.to_string());
        }
    }

    files
        .into_iter()
        .filter_map(|(n, file)| {
            let url = base.join(&file).ok()?;
            Some(PlaylistEntry {
                url: url.to_string(),
                title: titles.remove(&n).filter(|t| !t.is_empty()),
            })
        })
        .collect()
}

#[async_trait]
impl SiteHandler for PlaylistFileHandler {
    fn name(&self) -> &str {
        "PlaylistFile"
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

        let base = response.url().clone();
        let body = response.text().await?;

        let entries = if body.trim_start().to_lowercase().starts_with("[playlist]") {
            parse_pls(&body, &base)
        } else {
            parse_m3u(&body, &base)
        };

        if entries.is_empty() {
            return Err(ExtractError::Expected(format!("Playlist {} has no entries", url)));
        }

        tracing::debug!("Playlist {} has {} entries", url, entries.len());

        let id = file_stem(&base).unwrap_or_else(|| "playlist".to_string());
        Ok(ExtractResult::Playlist(Playlist {
            title: Some(id.clone()),
            id,
            entries: entries
                .into_iter()
                .map(|entry| ExtractResult::Url(UrlRef::transparent(entry.url, entry.title)))
                .collect(),
            webpage_url: url.to_string(),
            extractor: self.name().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://radio.example.com/lists/evening.m3u").unwrap()
    }

    #[test]
    fn test_parse_m3u() {
        let body = "#EXTM3U\n\
                    #EXTINF:123,Artist - First\n\
                    first.mp3\n\
                    \n\
                    # a comment\n\
                    https://other.example.org/second.ogg\n\
                    #EXTINF:-1,\n\
                    /streams/third.aac\n";

        let entries = parse_m3u(body, &base());
        assert_eq!(
            entries,
            vec![
                PlaylistEntry {
                    url: "https://radio.example.com/lists/first.mp3".into(),
                    title: Some("Artist - First".into()),
                },
                PlaylistEntry {
                    url: "https://other.example.org/second.ogg".into(),
                    title: None,
                },
                PlaylistEntry {
                    url: "https://radio.example.com/streams/third.aac".into(),
                    title: None,
                },
            ]
        );
    }

    #[test]
    fn test_parse_pls_orders_by_number() {
        let body = "[playlist]\n\
                    File2=https://radio.example.com/b.mp3\n\
                    Title2=Second\n\
                    File1=a.mp3\n\
                    NumberOfEntries=2\n\
                    Version=2\n";

        let entries = parse_pls(body, &base());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://radio.example.com/lists/a.mp3");
        assert_eq!(entries[0].title, None);
        assert_eq!(entries[1].title.as_deref(), Some("Second"));
    }

    #[test]
    fn test_recognizes_playlist_files() {
        let handler = PlaylistFileHandler::new();
        assert!(handler.supports_url("https://radio.example.com/lists/evening.m3u"));
        assert!(handler.supports_url("http://radio.example.com/live.PLS?sid=1"));
        assert!(!handler.supports_url("https://video.example.com/master.m3u8"));
    }
}
