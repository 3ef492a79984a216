//! Process-level helpers for the `trackhound` binary.

pub(crate) mod exit_handler;
pub(crate) mod progress;
pub(crate) mod terminal;
