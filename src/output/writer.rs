//! Chapter and asset artifacts on disk
//!
//! Layout:
//! - chapters: `text_dir/<book>/<NNN - volume>/<NNNN - title>.html`
//! - failure markers: `failed - <chapter file stem>.mark` next to the chapter
//! - assets: `image_dir/<book>/<sha256(url)[..16]>.<ext>`
//!
//! Chapter files are written to a temporary sibling and renamed into place, so
//! a file that exists on disk is always complete. Every write gets its own
//! temporary name, so two writers racing on one file never share a handle.
//! Titles are cut to [`MAX_NAME_BYTES`] bytes, which keeps every derived name
//! (markers and temporary files included) under the usual 255-byte limit.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Longest sanitized name component, in bytes
pub const MAX_NAME_BYTES: usize = 180;
const MARKER_PREFIX: &str = "failed - ";
const MARKER_EXTENSION: &str = "mark";

/// Makes a title safe to use as a single path component
///
/// Path separators, reserved characters and control characters become `_`,
/// runs of whitespace collapse, and leading/trailing dots and spaces are
/// dropped. Long names are cut at a character boundary to at most
/// [`MAX_NAME_BYTES`] bytes. The result is never empty.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    let truncated = truncate_bytes(trimmed, MAX_NAME_BYTES).trim_end();

    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated.to_string()
    }
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a character
fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// `text_dir/<book>/<NNN - volume title>`
pub fn chapter_dir(text_dir: &Path, book: &str, volume_index: u32, volume_title: &str) -> PathBuf {
    text_dir
        .join(sanitize_file_name(book))
        .join(format!(
            "{:03} - {}",
            volume_index,
            sanitize_file_name(volume_title)
        ))
}

/// `NNNN - title.html`
pub fn chapter_file_name(chapter_index: u32, title: &str) -> String {
    format!("{:04} - {}.html", chapter_index, sanitize_file_name(title))
}

/// `failed - <stem>.mark` for a chapter file name
pub fn marker_file_name(chapter_file_name: &str) -> String {
    let stem = Path::new(chapter_file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(chapter_file_name);
    format!("{}{}.{}", MARKER_PREFIX, stem, MARKER_EXTENSION)
}

pub fn failure_marker_exists(dir: &Path, chapter_file_name: &str) -> bool {
    dir.join(marker_file_name(chapter_file_name)).is_file()
}

/// Writes a chapter artifact: a title header followed by the assembled content
///
/// # Arguments
///
/// * `dir` - The chapter's output directory (created if missing)
/// * `file_name` - File name from [`chapter_file_name`]
/// * `title` - Header text
/// * `content` - Page contents in order
///
/// # Returns
///
/// * `Ok(PathBuf)` - Path of the written file
/// * `Err(io::Error)` - The directory or file could not be written
pub fn write_chapter(dir: &Path, file_name: &str, title: &str, content: &str) -> io::Result<PathBuf> {
    let mut document = String::with_capacity(content.len() + title.len() + 16);
    document.push_str("<h1>");
    document.push_str(&escape_html(title));
    document.push_str("</h1>\n");
    if !content.is_empty() {
        document.push_str(content);
        document.push('\n');
    }

    write_atomically(dir, file_name, document.as_bytes())
}

/// Writes the failure marker for a chapter
///
/// The marker holds the source URL on the first line and the error text after it.
pub fn write_failure_marker(
    dir: &Path,
    chapter_file_name: &str,
    source_url: &str,
    error: &str,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(marker_file_name(chapter_file_name));

    let mut file = File::create(&path)?;
    writeln!(file, "{}", source_url)?;
    writeln!(file, "{}", error)?;

    Ok(path)
}

/// Removes a stale failure marker; returns whether one existed
pub fn remove_failure_marker(dir: &Path, chapter_file_name: &str) -> io::Result<bool> {
    match fs::remove_file(dir.join(marker_file_name(chapter_file_name))) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// `image_dir/<book>`
pub fn asset_dir(image_dir: &Path, book: &str) -> PathBuf {
    image_dir.join(sanitize_file_name(book))
}

/// Deterministic asset file name: first 16 hex digits of `sha256(url)` plus extension
pub fn asset_file_name(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let hash = hex::encode(digest);
    format!("{}.{}", &hash[..16], asset_extension(url))
}

pub fn write_asset(dir: &Path, file_name: &str, body: &[u8]) -> io::Result<PathBuf> {
    write_atomically(dir, file_name, body)
}

/// Lowercased extension of the URL path, `bin` when missing or implausible
fn asset_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

fn write_atomically(dir: &Path, file_name: &str, body: &[u8]) -> io::Result<PathBuf> {
    static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let temp = dir.join(format!(
        ".{}.{}-{}.tmp",
        file_name,
        std::process::id(),
        NEXT_TEMP.fetch_add(1, Ordering::Relaxed)
    ));

    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(body)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&temp, &path)) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    Ok(path)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}
