//! Plain-text rendering for command output.

use time::OffsetDateTime;
use time::macros::format_description;
use trackhound_core::{DownloadRecord, LockRecord, RunReport};

/// Terminal width from `COLUMNS`, defaulting to 80.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// `YYYY-MM-DD HH:MM:SS` in UTC; the raw number if out of range.
pub fn format_timestamp(unix_secs: i64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(unix_secs)
        .ok()
        .and_then(|at| at.format(&format).ok())
        .unwrap_or_else(|| unix_secs.to_string())
}

/// One `history` row.
pub fn render_history_row(record: &DownloadRecord, width: usize) -> String {
    let source = if record.username.is_empty() {
        String::new()
    } else {
        let basename = record
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&record.filename);
        format!(" | {}:{basename}", record.username)
    };
    let error = record
        .error_message
        .as_deref()
        .map(|message| format!(" | {message}"))
        .unwrap_or_default();
    let line = format!(
        "{} | {:<9} | {}{source}{error}",
        format_timestamp(record.created_at),
        record.status_str,
        record.file_line
    );
    truncate_to_width(&line, width)
}

/// Summary printed after `run`.
pub fn render_run_summary(report: &RunReport) -> String {
    let stats = &report.stats;
    let mut lines = vec![format!(
        "Processed {} lines: {} downloaded, {} duplicates, {} not found, {} errors",
        stats.processed, stats.completed, stats.duplicates, stats.not_found, stats.errors
    )];
    if stats.cancelled {
        lines.push("Run interrupted; unprocessed lines were kept.".to_string());
    }
    lines.push(format!("{} lines remain in the playlist.", report.pending.len()));
    lines.join("\n")
}

/// Description of the current lock holder.
pub fn render_lock_holder(record: &LockRecord, now: i64) -> String {
    format!(
        "Locked by pid {} on {} (tag {}), held for {}s",
        record.pid,
        record.hostname,
        record.tag,
        record.age_secs(now)
    )
}
