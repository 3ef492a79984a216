//! Exit code logic for the trackhound process.
//!
//! Single responsibility: map run counters to the process exit outcome.

use trackhound_core::RunStats;

use crate::ProcessExit;

/// Determines the process exit outcome from a run's counters.
///
/// Lines that needed no work (duplicates) and lines with no match do not
/// count as failures; only `ERROR` lines do.
pub(crate) fn determine_exit_outcome(stats: &RunStats) -> ProcessExit {
    let succeeded = stats.completed + stats.duplicates + stats.not_found;
    if stats.errors == 0 {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
