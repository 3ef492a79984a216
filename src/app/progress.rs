//! Progress bar for playlist runs.

use indicatif::{ProgressBar, ProgressStyle};
use trackhound_core::LineReport;

use crate::output::truncate_to_width;

const TEMPLATE: &str = "{spinner} [{pos}/{len}] {bar:30} {msg}";
const MESSAGE_WIDTH: usize = 60;

/// Creates a bar, or a hidden one when `enabled` is false. The length is set
/// from the first report.
pub(crate) fn line_progress_bar(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Advances `bar` for one finalized line.
pub(crate) fn report_line(bar: &ProgressBar, report: &LineReport) {
    bar.set_length(u64::try_from(report.total).unwrap_or(u64::MAX));
    bar.set_position(u64::try_from(report.index + 1).unwrap_or(u64::MAX));
    bar.set_message(format!(
        "{} {}",
        report.outcome.as_str(),
        truncate_to_width(&report.line, MESSAGE_WIDTH)
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackhound_core::LineOutcome;

    #[test]
    fn test_hidden_bar_tracks_position() {
        let bar = line_progress_bar(false);
        let report = LineReport {
            index: 1,
            total: 3,
            line: "A - B".to_string(),
            outcome: LineOutcome::NotFound,
        };
        report_line(&bar, &report);
        assert_eq!(bar.position(), 2);
        assert_eq!(bar.length(), Some(3));
    }
}
