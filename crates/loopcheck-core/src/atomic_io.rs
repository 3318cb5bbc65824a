use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Writes text using a temp file + rename so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    write_bytes_atomic(path, content.as_bytes())
}

/// Replaces `destination` with the bytes of `source` via temp file + rename.
///
/// A destination that is a symlink is replaced by a regular file; the link
/// target is left untouched.
pub fn replace_file_atomic(source: &Path, destination: &Path) -> Result<()> {
    let bytes =
        std::fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
    write_bytes_atomic(destination, &bytes)
}

fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_path = temp_sibling_path(parent_dir, path);
    if let Err(error) = std::fs::write(&temp_path, content) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error)
            .with_context(|| format!("failed to write temporary file {}", temp_path.display()));
    }
    if let Err(error) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error).with_context(|| {
            format!(
                "failed to move temporary file {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

fn temp_sibling_path(parent_dir: &Path, path: &Path) -> PathBuf {
    let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    parent_dir.join(format!(
        ".{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("loopcheck"),
        std::process::id(),
        current_unix_timestamp_ms(),
        sequence
    ))
}
