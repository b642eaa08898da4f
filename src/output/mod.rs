use anyhow::Result;
use std::fmt::{self, Write as _};
use std::path::Path;

use crate::cli::OutputFormat;
use crate::extractors::{ExtractResult, MediaInfo};
use crate::utils::{format_duration, format_file_size};

pub mod reporter;

/// Render an extraction result in the requested format
pub fn render(result: &ExtractResult, format: &OutputFormat) -> Result<String> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => format_as_text(result)?,
        OutputFormat::Urls => collect_urls(result).join("\n"),
    };
    Ok(content)
}

/// Save an extraction result to file
pub async fn save_to_file(result: &ExtractResult, path: &Path, format: &OutputFormat) -> Result<()> {
    let content = render(result, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, content)?;
    Ok(())
}

/// Print an extraction result to stdout
pub fn print_to_console(result: &ExtractResult, format: &OutputFormat) -> Result<()> {
    println!("{}", render(result, format)?);
    Ok(())
}

fn format_as_text(result: &ExtractResult) -> Result<String> {
    let mut out = String::new();
    write_entry(&mut out, result, 0)?;
    Ok(out.trim_end().to_string())
}

fn write_entry(out: &mut String, result: &ExtractResult, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match result {
        ExtractResult::Video(info) => write_video(out, info, &pad)?,
        ExtractResult::Playlist(playlist) => {
            writeln!(
                out,
                "{}Playlist: {} ({} entries)",
                pad,
                playlist.title.as_deref().unwrap_or(&playlist.id),
                playlist.entries.len()
            )?;
            writeln!(out, "{}Extractor: {}", pad, playlist.extractor)?;
            writeln!(out, "{}Page: {}", pad, playlist.webpage_url)?;
            for (i, entry) in playlist.entries.iter().enumerate() {
                writeln!(out, "{}[{}]", pad, i + 1)?;
                write_entry(out, entry, indent + 1)?;
            }
        }
        ExtractResult::Url(reference) => {
            writeln!(out, "{}URL: {}", pad, reference.url)?;
            if let Some(title) = &reference.title {
                writeln!(out, "{}Title: {}", pad, title)?;
            }
            if let Some(handler) = &reference.handler {
                writeln!(out, "{}Handler: {}", pad, handler)?;
            }
        }
    }
    Ok(())
}

fn write_video(out: &mut String, info: &MediaInfo, pad: &str) -> fmt::Result {
    writeln!(out, "{}Title: {}", pad, info.title)?;
    writeln!(out, "{}ID: {}", pad, info.id)?;
    writeln!(out, "{}Extractor: {}", pad, info.extractor)?;
    writeln!(out, "{}Page: {}", pad, info.webpage_url)?;
    if let Some(uploader) = &info.uploader {
        writeln!(out, "{}Uploader: {}", pad, uploader)?;
    }
    if let Some(duration) = info.duration {
        writeln!(out, "{}Duration: {}", pad, format_duration(duration))?;
    }
    if let Some(thumbnail) = &info.thumbnail {
        writeln!(out, "{}Thumbnail: {}", pad, thumbnail)?;
    }
    for format in &info.formats {
        let size = format
            .filesize
            .map(format_file_size)
            .unwrap_or_else(|| "unknown size".to_string());
        writeln!(
            out,
            "{}Format {} ({}, {}): {}",
            pad,
            format.format_id,
            format.ext.as_deref().unwrap_or("?"),
            size,
            format.url
        )?;
    }
    Ok(())
}

/// Media URLs reachable from a result: format URLs of videos, the page when
/// a video has no formats, and unresolved references as they are
pub fn collect_urls(result: &ExtractResult) -> Vec<String> {
    match result {
        ExtractResult::Video(info) if info.formats.is_empty() => vec![info.webpage_url.clone()],
        ExtractResult::Video(info) => info.formats.iter().map(|f| f.url.clone()).collect(),
        ExtractResult::Playlist(playlist) => playlist.entries.iter().flat_map(collect_urls).collect(),
        ExtractResult::Url(reference) => vec![reference.url.clone()],
    }
}
