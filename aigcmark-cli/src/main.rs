//! AIGCMark CLI - invisible provenance watermarks for generated images.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use aigcmark_core::{WatermarkEngine, WatermarkService};

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success (also when no watermark is detected)
  1   General error
  64  Usage or configuration error
  65  Image could not be decoded
  66  Input file not found
  69  Worker timed out or failed
  74  Could not write output";

#[derive(Parser)]
#[command(name = "aigcmark")]
#[command(author, version, about = "Invisible provenance watermarks for AIGC images", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Only print the essential result (output path or recovered payload)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG wins when set
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// When to color the output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Directory for watermarked outputs and backup copies [env: AIGCMARK_PROCESSED_DIR]
    #[arg(long, global = true, value_name = "DIR")]
    processed_dir: Option<PathBuf>,

    /// Directory for display copies and extracted images [env: AIGCMARK_STATIC_DIR]
    #[arg(long, global = true, value_name = "DIR")]
    static_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a text or reference-image watermark into a carrier image
    Embed {
        /// Path to the carrier image
        #[arg(value_name = "CARRIER")]
        carrier: PathBuf,

        /// Text payload
        #[arg(short, long)]
        text: Option<String>,

        /// Reference image payload (takes priority over --text)
        #[arg(short, long, value_name = "REF")]
        image: Option<PathBuf>,

        /// Embedding strength (defaults to the configured strength)
        #[arg(short, long)]
        strength: Option<f32>,

        /// Output path (defaults to <processed-dir>/<uuid>.<ext>)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Print the embed report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recover the watermark from one or more suspect images
    Recover {
        /// Paths to the suspect images
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,

        /// Print the results as a JSON array
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn apply(self) {
        match self {
            Self::Auto => {}
            Self::Always => colored::control::set_override(true),
            Self::Never => colored::control::set_override(false),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    utils::init_tracing(cli.verbose);
    cli.color.apply();

    let exit = match run(cli).await {
        Ok(exit) => exit,
        Err(e) => ExitCode::from_anyhow(&e),
    };

    if let Some(message) = &exit.message {
        eprintln!("{} {}", "Error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = utils::engine_config(cli.processed_dir, cli.static_dir);
    let engine = WatermarkEngine::new(config).context("Failed to initialize the watermark engine")?;
    let service = WatermarkService::new(engine);

    match cli.command {
        Commands::Embed {
            carrier,
            text,
            image,
            strength,
            output,
            json,
        } => {
            let args = commands::embed::EmbedArgs {
                carrier,
                text,
                image,
                strength,
                output,
            };
            commands::embed::execute(&service, args, json, cli.quiet).await
        }
        Commands::Recover { images, json } => {
            commands::recover::execute(&service, images, json, cli.quiet).await
        }
    }
}
