//! Terminal detection and tracing setup.

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_progress(
    stderr_is_terminal: bool,
    quiet: bool,
    disabled: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !disabled && !dumb_terminal
}

/// Default log level for the verbosity flags.
///
/// `-q` wins over `-v`.
pub(crate) fn default_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the stderr subscriber. `RUST_LOG` takes precedence over
/// `default_level`.
pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let no_color = no_color_env_requested() || is_dumb_terminal();
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_quiet_wins() {
        assert_eq!(default_level(2, true), "error");
    }

    #[test]
    fn test_default_level_verbosity_steps() {
        assert_eq!(default_level(0, false), "info");
        assert_eq!(default_level(1, false), "debug");
        assert_eq!(default_level(5, false), "trace");
    }

    #[test]
    fn test_progress_only_on_interactive_terminal() {
        assert!(should_use_progress(true, false, false, false));
        assert!(!should_use_progress(false, false, false, false));
        assert!(!should_use_progress(true, true, false, false));
        assert!(!should_use_progress(true, false, true, false));
        assert!(!should_use_progress(true, false, false, true));
    }
}
