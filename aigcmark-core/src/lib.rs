//! AIGCMark Core - invisible watermarks for AIGC image provenance
//!
//! This crate embeds a recoverable payload (a short text or a small reference
//! image) into the wavelet domain of an image, and later recovers it from a
//! possibly modified copy.
//!
//! # Features
//!
//! - Additive embedding into the LL sub-band of a one-level Haar transform
//!   of the blue channel
//! - Metadata redundancy: side-file, file trailer and a pixel-fingerprint
//!   backup record, plus duplicated display copies of image payloads
//! - Recovery as an ordered chain of strategies with confidence scores
//! - Blind signal extraction when every metadata source is gone
//! - Async facade on tokio's blocking pool (`async` feature)
//!
//! # Example
//!
//! ```no_run
//! use aigcmark_core::{EmbedRequest, EngineConfig, WatermarkEngine};
//!
//! # fn example() -> aigcmark_core::Result<()> {
//! let engine = WatermarkEngine::new(EngineConfig::from_env())?;
//!
//! let outcome = engine.embed(&EmbedRequest::new("render.png").with_text("model-v2"))?;
//! println!("watermarked image at {}", outcome.output_path.display());
//!
//! let result = engine.recover(&outcome.output_path);
//! assert!(result.detected);
//! assert_eq!(result.text.as_deref(), Some("model-v2"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod payload;
pub mod recovery;
pub mod redundancy;
#[cfg(feature = "async")]
pub mod service;
pub mod watermark;

// Re-export main types for convenience
pub use config::{EngineConfig, DECOMPOSITION_LEVEL, SIDECAR_SUFFIX, TRAILER_MARKER, WAVELET_NAME};
pub use engine::{EmbedOutcome, EmbedRequest, WatermarkEngine};
pub use error::{Result, WatermarkError, MAX_MATRIX_SIZE};
pub use metadata::{PayloadKind, WatermarkMetadata};
pub use payload::{EncodedPayload, PayloadEncoder, PayloadMatrix};
pub use recovery::{
    RecoveryContext, RecoveryOrchestrator, RecoveryResult, RecoverySource, RecoveryStrategy,
};
pub use redundancy::{RedundancyReport, RedundancyWriter};

#[cfg(feature = "async")]
pub use service::WatermarkService;

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Embed, then recover through the first redundancy location.
    #[test]
    fn test_full_watermark_workflow() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = WatermarkEngine::new(EngineConfig::with_base_dir(dir.path()))
            .expect("Failed to create engine");

        let carrier = dir.path().join("carrier.png");
        RgbImage::from_fn(128, 96, |x, y| Rgb([x as u8, y as u8, 64]))
            .save(&carrier)
            .expect("Failed to write carrier");

        let outcome = engine
            .embed(&EmbedRequest::new(&carrier).with_text("Hello World"))
            .expect("Failed to embed");
        assert_eq!(outcome.metadata.payload_kind, PayloadKind::Text);
        assert_eq!(outcome.metadata.text_length, Some(11));
        assert_eq!(outcome.metadata.wavelet_name, WAVELET_NAME);

        let result = engine.recover(&outcome.output_path);
        assert!(result.success, "Recovery should run");
        assert!(result.detected, "Watermark should be detected");
        assert_eq!(result.source, RecoverySource::Sidecar);
        assert_eq!(result.text.as_deref(), Some("Hello World"));
        assert_eq!(result.confidence, 0.99);
    }

    /// The carrier file is never modified.
    #[test]
    fn test_carrier_untouched() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = WatermarkEngine::new(EngineConfig::with_base_dir(dir.path()))
            .expect("Failed to create engine");

        let carrier = dir.path().join("carrier.png");
        RgbImage::from_pixel(32, 32, Rgb([10, 20, 30]))
            .save(&carrier)
            .expect("Failed to write carrier");
        let before = std::fs::read(&carrier).expect("Failed to read carrier");

        engine
            .embed(&EmbedRequest::new(&carrier).with_text("x"))
            .expect("Failed to embed");
        assert_eq!(
            std::fs::read(&carrier).expect("Failed to read carrier"),
            before,
            "Carrier bytes must not change"
        );
    }
}
