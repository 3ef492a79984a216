//! Playlist file IO.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Reads the requested lines, trimmed, skipping blank lines.
///
/// # Errors
///
/// Returns the IO error if the file cannot be read.
pub async fn read_playlist(path: &Path) -> io::Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_playlist(&text))
}

/// Splits playlist text into trimmed, non-blank lines.
#[must_use]
pub fn parse_playlist(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Replaces the playlist with `lines` via a sibling temp file and a rename.
///
/// Readers see either the old or the new file, never a partial one.
///
/// # Errors
///
/// Returns the IO error if writing or renaming fails; the temp file is
/// removed on failure.
pub async fn rewrite_playlist(path: &Path, lines: &[String]) -> io::Result<()> {
    let temp = temp_path(path);
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }

    let written = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if written.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    written
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().map_or_else(
        || "playlist".to_string(),
        |n| n.to_string_lossy().into_owned(),
    );
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}
