//! Common utility functions used across modules.
//!
//! - [`write_json_atomic`] - Persist a value as pretty JSON (tempfile + rename)
//! - [`read_json`] - Load a JSON file, distinguishing "missing" from "corrupt"
//! - [`format_latency`] - Render an optional latency for tables
//! - [`truncate`] - Truncate strings with ellipsis

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialize `value` as indented JSON and atomically replace `path`.
///
/// The temporary file lives in the same directory so the final rename
/// never crosses filesystems. The parent directory is created if needed.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut content =
        serde_json::to_string_pretty(value).context("Failed to serialize JSON content")?;
    content.push('\n');

    let mut temp_file =
        NamedTempFile::new_in(parent).context("Failed to create temporary file")?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.as_file().sync_all()?;
    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file: {}", path.display()))?;

    Ok(())
}

/// Read and deserialize a JSON file.
///
/// Returns `Ok(None)` when the file does not exist and an error when it
/// exists but cannot be read or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Some(value))
}

/// Format an optional latency: `"42ms"` or `"N/A"`.
///
/// # Examples
/// ```
/// use sdrpick::utils::format_latency;
/// assert_eq!(format_latency(Some(42)), "42ms");
/// assert_eq!(format_latency(None), "N/A");
/// ```
pub fn format_latency(latency_ms: Option<u32>) -> String {
    match latency_ms {
        Some(ms) => format!("{}ms", ms),
        None => "N/A".to_string(),
    }
}

/// Format a float latency with one decimal, as used by the history summary.
pub fn format_latency_f64(latency_ms: Option<f64>) -> String {
    match latency_ms {
        Some(ms) => format!("{:.1}ms", ms),
        None => "N/A".to_string(),
    }
}

/// Truncate a string to max length with ellipsis.
///
/// # Examples
/// ```
/// use sdrpick::utils::truncate;
/// assert_eq!(truncate("hello", 10), "hello");
/// assert_eq!(truncate("hello world", 8), "hello...");
/// ```
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
