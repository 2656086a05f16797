//! Signal-domain recovery strategies.

use image::ImageFormat;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{RecoveryContext, RecoveryResult, RecoverySource, RecoveryStrategy, SourceConfidence};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::metadata::WatermarkMetadata;
use crate::payload::PayloadMatrix;
use crate::redundancy::{self, LocatorResolver};
use crate::watermark::{render_viewable, SignalExtractor};

/// File name prefix of a rendered blind result.
pub const EXTRACTED_PREFIX: &str = "extracted_watermark_";

const PROBE_SIDECAR: SourceConfidence = SourceConfidence::new(0.98, 0.95);
const PROBE_TRAILER: SourceConfidence = SourceConfidence::new(0.95, 0.90);
const PROBE_LENIENT: f64 = 0.7;

/// Render a recovered matrix and store it in the static directory.
fn save_viewable(config: &EngineConfig, matrix: &PayloadMatrix) -> Option<String> {
    let name = format!("{}{}.png", EXTRACTED_PREFIX, Uuid::new_v4());
    let path = config.static_dir.join(&name);
    match render_viewable(matrix).save_with_format(&path, ImageFormat::Png) {
        Ok(()) => Some(config.locator_for(&name)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to store extracted watermark");
            None
        }
    }
}

/// Blind extraction with the configured thresholds.
pub struct BlindExtraction;

impl RecoveryStrategy for BlindExtraction {
    fn name(&self) -> &'static str {
        "blind"
    }

    fn try_recover(&self, ctx: &RecoveryContext<'_>) -> Result<Option<RecoveryResult>> {
        let config = ctx.config();
        let signal = SignalExtractor::new(config.strength, config.min_occupancy, config.signal_floor)
            .extract(ctx.carrier()?)?;
        if !signal.detected {
            return Ok(None);
        }

        let locator = save_viewable(config, &signal.matrix);
        Ok(Some(RecoveryResult::image(
            locator,
            signal.confidence,
            RecoverySource::Blind,
        )))
    }
}

/// Looks for an image payload behind a text record with empty text.
///
/// Only runs after a metadata source reported such a record.
pub struct MisTaggedImageProbe;

impl MisTaggedImageProbe {
    fn from_locators(
        ctx: &RecoveryContext<'_>,
        metadata: Option<WatermarkMetadata>,
        confidence: SourceConfidence,
    ) -> Option<RecoveryResult> {
        let metadata = metadata.filter(WatermarkMetadata::has_image_locator)?;
        let resolved = LocatorResolver::new(ctx.config()).resolve(&metadata)?;
        Some(RecoveryResult::image(
            Some(resolved.locator),
            confidence.pick(resolved.from_backup),
            RecoverySource::ImageProbe,
        ))
    }
}

impl RecoveryStrategy for MisTaggedImageProbe {
    fn name(&self) -> &'static str {
        "image-probe"
    }

    fn try_recover(&self, ctx: &RecoveryContext<'_>) -> Result<Option<RecoveryResult>> {
        if !ctx.empty_text_hint() {
            return Ok(None);
        }

        let sidecar = redundancy::read_sidecar(ctx.suspect()).ok().flatten();
        if let Some(result) = Self::from_locators(ctx, sidecar, PROBE_SIDECAR) {
            debug!("Image locator found in side-file");
            return Ok(Some(result));
        }

        let trailer = redundancy::read_trailer(ctx.suspect()).ok().flatten();
        if let Some(result) = Self::from_locators(ctx, trailer, PROBE_TRAILER) {
            debug!("Image locator found in trailer");
            return Ok(Some(result));
        }

        let config = ctx.config();
        let signal = SignalExtractor::lenient(config.strength).extract(ctx.carrier()?)?;
        if !signal.detected {
            return Ok(None);
        }
        debug!(occupancy = signal.occupancy(), "Lenient extraction found a signal");
        let locator = save_viewable(config, &signal.matrix);
        Ok(Some(RecoveryResult::image(
            locator,
            PROBE_LENIENT,
            RecoverySource::ImageProbe,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PayloadKind;
    use crate::redundancy::RedundancyWriter;
    use crate::watermark::{Carrier, CoefficientEmbedder, OutputFormat};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn setup(blue: u8) -> (TempDir, EngineConfig, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::with_base_dir(dir.path());
        config.ensure_dirs().unwrap();
        let suspect = config.processed_dir.join("suspect.png");
        RgbImage::from_pixel(64, 64, Rgb([90, 90, blue]))
            .save(&suspect)
            .unwrap();
        (dir, config, suspect)
    }

    /// Overwrite the suspect with a flat 256x256 carrier holding an 8x8
    /// block of marked cells: too sparse for the configured thresholds.
    fn write_sparse_mark(config: &EngineConfig, suspect: &Path) {
        let img = RgbImage::from_pixel(256, 256, Rgb([90, 90, 90]));
        let mut carrier = Carrier::from_image(DynamicImage::ImageRgb8(img), None);
        let mut matrix = PayloadMatrix::zeros(32);
        for r in 0..8 {
            for c in 0..8 {
                matrix.set(r, c, 255);
            }
        }
        CoefficientEmbedder::new(config.strength, config.blend_factor)
            .embed(&mut carrier, &matrix)
            .unwrap();
        carrier.save(suspect, OutputFormat::Png, 95).unwrap();
    }

    #[test]
    fn test_blind_misses_flat_carrier() {
        let (_dir, config, suspect) = setup(60);
        let ctx = RecoveryContext::new(&suspect, &config);
        assert!(BlindExtraction.try_recover(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_blind_misses_bright_flat_carrier() {
        let (_dir, config, suspect) = setup(230);
        let ctx = RecoveryContext::new(&suspect, &config);
        assert!(BlindExtraction.try_recover(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_blind_rejects_sparse_mark() {
        let (_dir, config, suspect) = setup(90);
        write_sparse_mark(&config, &suspect);
        let ctx = RecoveryContext::new(&suspect, &config);
        assert!(BlindExtraction.try_recover(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_blind_reports_decode_failure() {
        let (_dir, config, suspect) = setup(60);
        std::fs::write(&suspect, b"garbage").unwrap();
        let ctx = RecoveryContext::new(&suspect, &config);
        assert!(BlindExtraction.try_recover(&ctx).is_err());
    }

    #[test]
    fn test_mistagged_lookup_needs_hint() {
        let (_dir, config, suspect) = setup(90);
        write_sparse_mark(&config, &suspect);
        let ctx = RecoveryContext::new(&suspect, &config);
        assert!(MisTaggedImageProbe.try_recover(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_mistagged_lookup_uses_sidecar_locator() {
        let (_dir, config, suspect) = setup(0);
        let writer = RedundancyWriter::new(&config);
        let copies = writer.store_display_copies(&DynamicImage::ImageRgb8(RgbImage::new(4, 4)));
        let mut meta = WatermarkMetadata::new(PayloadKind::Text, [32, 32]);
        meta.text = Some(String::new());
        meta.image_locator = copies.primary.clone();
        writer.write_sidecar(&meta, &suspect).unwrap();

        let mut ctx = RecoveryContext::new(&suspect, &config);
        ctx.set_empty_text_hint();
        let result = MisTaggedImageProbe.try_recover(&ctx).unwrap().unwrap();
        assert_eq!(result.kind, PayloadKind::Image);
        assert_eq!(result.image_locator, copies.primary);
        assert_eq!(result.confidence, 0.98);
    }

    #[test]
    fn test_mistagged_lookup_falls_back_to_lenient_extraction() {
        let (_dir, config, suspect) = setup(90);
        write_sparse_mark(&config, &suspect);
        let mut ctx = RecoveryContext::new(&suspect, &config);
        ctx.set_empty_text_hint();

        let result = MisTaggedImageProbe.try_recover(&ctx).unwrap().unwrap();
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.source, RecoverySource::ImageProbe);
        let locator = result.image_locator.expect("viewable locator");
        let name = config.file_name_of(&locator).unwrap();
        assert!(name.starts_with(EXTRACTED_PREFIX));
        assert!(config.static_dir.join(name).is_file());
    }

    #[test]
    fn test_mistagged_lookup_on_bright_unmarked_carrier_finds_nothing() {
        let (_dir, config, suspect) = setup(220);
        let mut ctx = RecoveryContext::new(&suspect, &config);
        ctx.set_empty_text_hint();
        assert!(MisTaggedImageProbe.try_recover(&ctx).unwrap().is_none());
    }
}
