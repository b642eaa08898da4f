use anyhow::Result;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use url::Url;

/// Out-of-band data attached to a URL for recursive dispatch
pub type SmuggledData = Map<String, Value>;

const SMUGGLE_MARKER: &str = "__mediadl_smuggle";

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap()
});

/// Validate a URL and return normalized version
pub fn validate_and_normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed.to_string())
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references in a path.
///
/// Unknown variables are left untouched.
pub fn expand_path(path: &Path) -> PathBuf {
    expand_path_with(path, |name| std::env::var(name).ok())
}

/// [`expand_path`] resolving variables through `lookup`
pub fn expand_path_with<F>(path: &Path, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let raw = path.to_string_lossy();

    let home_expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => {
            match dirs::home_dir() {
                Some(home) => format!("{}{}", home.display(), rest),
                None => raw.to_string(),
            }
        }
        _ => raw.to_string(),
    };

    let expanded = ENV_VAR.replace_all(&home_expanded, |caps: &Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        lookup(name).unwrap_or_else(|| caps[0].to_string())
    });

    PathBuf::from(expanded.into_owned())
}

/// Attach `data` to `url` without changing the part handlers match against.
///
/// Data already smuggled into `url` wins over `data` on key conflicts.
pub fn smuggle_url(url: &str, data: &SmuggledData) -> String {
    let (bare, existing) = unsmuggle_url(url);
    let mut merged = data.clone();
    if let Some(existing) = existing {
        merged.extend(existing);
    }

    let json = Value::Object(merged).to_string();
    format!("{}#{}={}", bare, SMUGGLE_MARKER, urlencoding::encode(&json))
}

/// Split smuggled data off a URL
pub fn unsmuggle_url(url: &str) -> (String, Option<SmuggledData>) {
    let marker = format!("#{}=", SMUGGLE_MARKER);
    let Some(pos) = url.rfind(&marker) else {
        return (url.to_string(), None);
    };

    let bare = url[..pos].to_string();
    let encoded = &url[pos + marker.len()..];
    let data = urlencoding::decode(encoded)
        .ok()
        .and_then(|json| serde_json::from_str::<SmuggledData>(&json).ok());

    if data.is_none() {
        tracing::debug!("Ignoring malformed smuggled data in {}", bare);
    }

    (bare, data)
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Extract domain from URL for display purposes
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.strip_prefix("www.").unwrap_or(host).to_string())
}
