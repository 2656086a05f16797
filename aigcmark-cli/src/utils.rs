//! Common utility functions shared across CLI commands.

use std::path::{Path, PathBuf};

use aigcmark_core::{EngineConfig, RecoveryResult};
use colored::{Color, Colorize};
use tracing_subscriber::EnvFilter;

use crate::exit_codes;

/// Inner width of the result banners.
const BANNER_WIDTH: usize = 40;

/// Default log filter for a `-v` count.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the stderr log subscriber. `RUST_LOG` overrides `-v`.
pub fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Environment configuration with the command-line directory overrides applied.
pub fn engine_config(processed_dir: Option<PathBuf>, static_dir: Option<PathBuf>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(dir) = processed_dir {
        config.processed_dir = dir;
    }
    if let Some(dir) = static_dir {
        config.static_dir = dir;
    }
    config
}

/// Format a confidence in [0, 1] as a percentage.
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", (confidence * 100.0).clamp(0.0, 100.0))
}

/// Print a boxed banner with a centered title.
pub fn print_banner(title: &str, color: Color) {
    let rule = "═".repeat(BANNER_WIDTH);
    println!();
    println!("{}", format!("╔{rule}╗").color(color));
    println!("{}", format!("║{title:^BANNER_WIDTH$}║").color(color).bold());
    println!("{}", format!("╚{rule}╝").color(color));
    println!();
}

/// Exit code for a recovery that could not run on `path`.
pub fn failed_recovery_code(path: &Path, result: &RecoveryResult) -> i32 {
    if result.success {
        exit_codes::SUCCESS
    } else if !path.is_file() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::DATA_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_levels() {
        assert_eq!(log_filter(0), "warn");
        assert_eq!(log_filter(1), "info");
        assert_eq!(log_filter(2), "debug");
        assert_eq!(log_filter(9), "debug");
    }

    #[test]
    fn test_format_confidence() {
        assert_eq!(format_confidence(0.99), "99%");
        assert_eq!(format_confidence(0.0), "0%");
        assert_eq!(format_confidence(1.5), "100%");
    }

    #[test]
    fn test_engine_config_overrides_dirs() {
        let config = engine_config(Some(PathBuf::from("/tmp/p")), Some(PathBuf::from("/tmp/s")));
        assert_eq!(config.processed_dir, PathBuf::from("/tmp/p"));
        assert_eq!(config.static_dir, PathBuf::from("/tmp/s"));
    }

    #[test]
    fn test_failed_recovery_code() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.png");
        std::fs::write(&present, b"garbage").unwrap();
        let failed = RecoveryResult::failed("boom");

        assert_eq!(
            failed_recovery_code(&dir.path().join("missing.png"), &failed),
            exit_codes::INPUT_ERROR
        );
        assert_eq!(failed_recovery_code(&present, &failed), exit_codes::DATA_ERROR);
        assert_eq!(
            failed_recovery_code(&present, &RecoveryResult::not_detected()),
            exit_codes::SUCCESS
        );
    }
}
