//! Embed command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::{Color, Colorize};
use tracing::{info, warn};

use aigcmark_core::{EmbedOutcome, EmbedRequest, PayloadKind, WatermarkService};

use crate::exit_codes::ExitCode;
use crate::utils;

/// Arguments of one embed call.
pub struct EmbedArgs {
    pub carrier: PathBuf,
    pub text: Option<String>,
    pub image: Option<PathBuf>,
    pub strength: Option<f32>,
    pub output: Option<PathBuf>,
}

impl EmbedArgs {
    fn into_request(self) -> EmbedRequest {
        let mut request = EmbedRequest::new(self.carrier);
        if let Some(text) = self.text {
            request = request.with_text(text);
        }
        if let Some(image) = self.image {
            request = request.with_reference_image(image);
        }
        if let Some(strength) = self.strength {
            request = request.with_strength(strength);
        }
        if let Some(output) = self.output {
            request = request.with_output_path(output);
        }
        request
    }
}

/// Execute the embed command.
pub async fn execute(
    service: &WatermarkService,
    args: EmbedArgs,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let carrier = args.carrier.clone();
    let requested_image = args.image.is_some();
    info!(carrier = %carrier.display(), "Embedding watermark");

    let outcome = service
        .embed(args.into_request())
        .await
        .with_context(|| format!("Failed to embed into {}", carrier.display()))?;

    if requested_image && outcome.metadata.payload_kind != PayloadKind::Image {
        warn!("Reference image unusable, embedded the text payload instead");
        if !quiet && !json {
            eprintln!(
                "{}",
                "Reference image could not be decoded; fell back to the text payload.".yellow()
            );
        }
    }

    if json {
        let report = serde_json::to_string_pretty(&outcome)
            .context("Failed to serialize the embed report")?;
        println!("{report}");
    } else if quiet {
        println!("{}", outcome.output_path.display());
    } else {
        print_outcome(&outcome);
    }

    Ok(ExitCode::success())
}

fn print_outcome(outcome: &EmbedOutcome) {
    let metadata = &outcome.metadata;
    let report = &outcome.redundancy;

    utils::print_banner("WATERMARKED", Color::Green);
    println!("   {} {}", "Output:".dimmed(), outcome.output_path.display());
    println!("   {} {}", "Payload:".dimmed(), metadata.payload_kind);
    if let Some(text) = &metadata.text {
        println!("   {} {:?}", "Text:".dimmed(), text);
    }
    println!("   {} {}", "Strength:".dimmed(), metadata.embedding_strength);

    if report.sidecar {
        println!("   {} {}", "Side-file:".dimmed(), outcome.sidecar_path.display());
    } else {
        println!("   {} {}", "Side-file:".dimmed(), "not written".yellow());
    }
    println!(
        "   {} {}",
        "Trailer:".dimmed(),
        if report.trailer {
            "appended".green()
        } else {
            "not written".yellow()
        }
    );
    if let Some(locator) = &metadata.image_locator {
        println!("   {} {}", "Display copy:".dimmed(), locator);
    }
    if let Some(locator) = &metadata.backup_image_locator {
        println!("   {} {}", "Backup copy:".dimmed(), locator);
    }
    if metadata.payload_kind == PayloadKind::Image {
        println!(
            "   {} {}",
            "Backup record:".dimmed(),
            if report.backup_record {
                "stored".green()
            } else {
                "not written".yellow()
            }
        );
    }
    println!();
}
