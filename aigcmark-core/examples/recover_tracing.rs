//! Example demonstrating tracing output across the recovery chain.
//!
//! Embeds a text watermark into a synthetic image, removes the side-file and
//! recovers again so the fallthrough to the trailer shows up in the log.
//!
//! Run with: cargo run -p aigcmark-core --example recover_tracing

use aigcmark_core::{EmbedRequest, EngineConfig, WatermarkEngine, WatermarkService};
use image::{Rgb, RgbImage};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with debug level
    fmt()
        .with_env_filter(EnvFilter::new("aigcmark_core=debug,info"))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== Recovery Tracing Demo ===\n");

    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to create work directory: {}", e);
            return;
        }
    };
    let config = EngineConfig::with_base_dir(dir.path());
    println!("Config: {:?}\n", config);

    let engine = match WatermarkEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to create engine: {}", e);
            return;
        }
    };
    let service = WatermarkService::new(engine);

    let carrier = dir.path().join("carrier.png");
    let image = RgbImage::from_fn(256, 256, |x, y| Rgb([x as u8, y as u8, 90]));
    if let Err(e) = image.save(&carrier) {
        eprintln!("Failed to write carrier: {}", e);
        return;
    }

    let outcome = match service
        .embed(EmbedRequest::new(&carrier).with_text("tracing demo"))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("\n❌ Embed failed: {}", e);
            return;
        }
    };
    println!("\nEmbedded into {}\n", outcome.output_path.display());

    let _ = std::fs::remove_file(&outcome.sidecar_path);
    println!("Removed side-file, recovering...\n");

    match service.recover(&outcome.output_path).await {
        Ok(result) if result.detected => {
            println!("\n✅ Detected via {}", result.source);
            println!("   Text:       {:?}", result.text);
            println!("   Confidence: {:.2}", result.confidence);
        }
        Ok(result) => println!("\n⚠️  {}", result.message),
        Err(e) => println!("\n❌ Failed: {}", e),
    }
}
