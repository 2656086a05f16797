//! Recover command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::{Color, Colorize};
use serde_json::json;
use tracing::{error, info};

use aigcmark_core::{RecoveryResult, WatermarkService};

use crate::exit_codes::{self, ExitCode};
use crate::utils;

/// Execute the recover command.
///
/// Every image is processed even when an earlier one fails; the exit code
/// reports the first failure.
pub async fn execute(
    service: &WatermarkService,
    images: Vec<PathBuf>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    info!(count = images.len(), "Recovering watermarks");
    let results = service.recover_many(images).await;

    let mut exit = ExitCode::success();
    let mut records = Vec::with_capacity(results.len());

    for (path, outcome) in results {
        let code = match &outcome {
            Ok(result) => utils::failed_recovery_code(&path, result),
            Err(e) => exit_codes::code_for(e),
        };
        if code != exit_codes::SUCCESS && exit.code == exit_codes::SUCCESS {
            exit = ExitCode::error(code, failure_message(&path, &outcome));
        }

        match outcome {
            Ok(result) => {
                if json {
                    records.push(json!({ "path": path, "result": result }));
                } else if quiet {
                    print_quiet(&path, &result);
                } else {
                    print_result(&path, &result);
                }
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Recovery task failed");
                if json {
                    records.push(json!({ "path": path, "error": e.to_string() }));
                } else if !quiet {
                    print_failure(&path, &e.to_string());
                }
            }
        }
    }

    if json {
        let report = serde_json::to_string_pretty(&records)
            .context("Failed to serialize recovery results")?;
        println!("{report}");
    }

    Ok(exit)
}

fn failure_message(path: &Path, outcome: &aigcmark_core::Result<RecoveryResult>) -> String {
    let reason = match outcome {
        Ok(result) => result.message.clone(),
        Err(e) => e.to_string(),
    };
    format!("Failed to recover {}: {}", path.display(), reason)
}

/// One line per image: the payload, or nothing useful.
fn print_quiet(path: &Path, result: &RecoveryResult) {
    let payload = if !result.success {
        "error".to_string()
    } else if !result.detected {
        "-".to_string()
    } else if let Some(locator) = &result.image_locator {
        locator.clone()
    } else {
        result.text.clone().unwrap_or_default()
    };
    println!("{}\t{}", path.display(), payload);
}

fn print_result(path: &Path, result: &RecoveryResult) {
    if !result.success {
        print_failure(path, &result.message);
        return;
    }

    if result.detected {
        utils::print_banner("DETECTED", Color::Green);
    } else {
        utils::print_banner("NOT DETECTED", Color::Yellow);
    }

    println!("   {} {}", "Image:".dimmed(), path.display());
    if result.detected {
        println!("   {} {}", "Payload:".dimmed(), result.kind);
        if let Some(text) = &result.text {
            println!("   {} {:?}", "Text:".dimmed(), text);
        }
        if let Some(locator) = &result.image_locator {
            println!("   {} {}", "Image payload:".dimmed(), locator);
        }
        println!(
            "   {} {}",
            "Confidence:".dimmed(),
            utils::format_confidence(result.confidence)
        );
        println!("   {} {}", "Source:".dimmed(), result.source);
    }
    println!("   {} {}", "Message:".dimmed(), result.message);
    println!();
}

fn print_failure(path: &Path, reason: &str) {
    utils::print_banner("FAILED", Color::Red);
    println!("   {} {}", "Image:".dimmed(), path.display());
    println!("   {} {}", "Reason:".dimmed(), reason.red());
    println!();
}
