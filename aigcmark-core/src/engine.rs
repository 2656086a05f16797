//! Engine facade: the two calls collaborators use.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, WatermarkError};
use crate::metadata::WatermarkMetadata;
use crate::payload::PayloadEncoder;
use crate::recovery::{RecoveryOrchestrator, RecoveryResult};
use crate::redundancy::{self, DisplayCopies, RedundancyReport, RedundancyWriter};
use crate::watermark::{Carrier, CoefficientEmbedder, OutputFormat};

/// Parameters of one embed call.
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    carrier: PathBuf,
    text: Option<String>,
    reference_image: Option<PathBuf>,
    strength: Option<f32>,
    output_path: Option<PathBuf>,
}

impl EmbedRequest {
    pub fn new(carrier: impl Into<PathBuf>) -> Self {
        Self {
            carrier: carrier.into(),
            text: None,
            reference_image: None,
            strength: None,
            output_path: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Reference image payload; takes priority over text when decodable.
    pub fn with_reference_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_image = Some(path.into());
        self
    }

    /// Override the configured embedding strength for this call.
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn carrier(&self) -> &Path {
        &self.carrier
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

/// Result of a successful embed.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedOutcome {
    pub output_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub metadata: WatermarkMetadata,
    pub redundancy: RedundancyReport,
}

/// The watermark engine.
///
/// Stateless between calls apart from the configured directories, so one
/// engine can serve concurrent embeds and recoveries.
pub struct WatermarkEngine {
    config: EngineConfig,
    encoder: PayloadEncoder,
    orchestrator: RecoveryOrchestrator,
}

impl WatermarkEngine {
    /// Validate the configuration and create the storage directories.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_orchestrator(config, RecoveryOrchestrator::default())
    }

    /// Engine with a custom recovery chain.
    pub fn with_orchestrator(config: EngineConfig, orchestrator: RecoveryOrchestrator) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;
        Ok(Self {
            encoder: PayloadEncoder::new(config.max_matrix_size),
            config,
            orchestrator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fill in a generated output path when the request has none.
    ///
    /// The extension follows the carrier's file name: JPEG stays JPEG,
    /// everything else becomes PNG.
    pub fn plan_output(&self, mut request: EmbedRequest) -> EmbedRequest {
        if request.output_path.is_none() {
            let format = OutputFormat::for_path(&request.carrier, OutputFormat::Png);
            request.output_path = Some(self.generated_output_path(format));
        }
        request
    }

    fn generated_output_path(&self, format: OutputFormat) -> PathBuf {
        self.config
            .processed_dir
            .join(format!("{}.{}", Uuid::new_v4(), format.extension()))
    }

    /// Embed the request's payload into a new image.
    ///
    /// Fails on an unreadable carrier or a transform failure; redundancy
    /// writes are best effort and only show up in the report.
    pub fn embed(&self, request: &EmbedRequest) -> Result<EmbedOutcome> {
        let strength = request.strength.unwrap_or(self.config.strength);
        if !strength.is_finite() || strength <= 0.0 {
            return Err(WatermarkError::ConfigError(format!(
                "strength must be a positive number, got {}",
                strength
            )));
        }

        let mut carrier = Carrier::open(&request.carrier)?;
        let payload = self
            .encoder
            .encode(request.text.as_deref(), request.reference_image.as_deref());

        CoefficientEmbedder::new(strength, self.config.blend_factor)
            .embed(&mut carrier, &payload.matrix)?;

        let default_format = OutputFormat::for_source(carrier.format());
        let (output_path, format) = match &request.output_path {
            Some(path) => (path.clone(), OutputFormat::for_path(path, default_format)),
            None => (self.generated_output_path(default_format), default_format),
        };
        self.check_output_target(&request.carrier, &output_path)?;

        let writer = RedundancyWriter::new(&self.config);
        let copies = match &payload.display_copy {
            Some(image) => writer.store_display_copies(image),
            None => DisplayCopies::default(),
        };

        let mut metadata = payload.metadata;
        metadata.embedding_strength = strength;
        metadata.image_locator = copies.primary.clone();
        metadata.backup_image_locator = copies.backup.clone();

        if let Err(e) = carrier.save(&output_path, format, self.config.jpeg_quality) {
            writer.remove_display_copies(&copies);
            if output_path.exists() {
                if let Err(cleanup) = std::fs::remove_file(&output_path) {
                    warn!(path = %output_path.display(), error = %cleanup, "Failed to remove partial output");
                }
            }
            return Err(e);
        }

        let report = writer.persist(&metadata, &output_path, copies.count());
        info!(
            carrier = %request.carrier.display(),
            output = %output_path.display(),
            kind = %metadata.payload_kind,
            strength,
            "Embedded watermark"
        );

        Ok(EmbedOutcome {
            sidecar_path: redundancy::sidecar_path(&output_path),
            output_path,
            metadata,
            redundancy: report,
        })
    }

    /// Recover the watermark of a suspect image. Never fails; see
    /// [`RecoveryResult::success`].
    pub fn recover(&self, suspect: &Path) -> RecoveryResult {
        self.orchestrator.recover(&self.config, suspect)
    }

    fn check_output_target(&self, carrier: &Path, output: &Path) -> Result<()> {
        let same = match (carrier.canonicalize(), output.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => carrier == output,
        };
        if same {
            return Err(WatermarkError::EmbeddingFailed(format!(
                "refusing to overwrite the carrier {}",
                carrier.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PayloadKind;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn setup() -> (TempDir, WatermarkEngine, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let engine = WatermarkEngine::new(EngineConfig::with_base_dir(dir.path())).unwrap();
        let carrier = dir.path().join("carrier.png");
        RgbImage::from_fn(64, 64, |x, y| Rgb([x as u8, y as u8, 80]))
            .save(&carrier)
            .unwrap();
        (dir, engine, carrier)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            strength: -1.0,
            ..EngineConfig::with_base_dir(dir.path())
        };
        assert!(matches!(
            WatermarkEngine::new(config),
            Err(WatermarkError::ConfigError(_))
        ));
    }

    #[test]
    fn test_embed_text_writes_output_and_sidecar() {
        let (_dir, engine, carrier) = setup();
        let outcome = engine
            .embed(&EmbedRequest::new(&carrier).with_text("hello"))
            .unwrap();

        assert!(outcome.output_path.starts_with(&engine.config().processed_dir));
        assert_eq!(
            outcome.output_path.extension().and_then(|e| e.to_str()),
            Some("png")
        );
        assert!(outcome.sidecar_path.is_file());
        assert!(outcome.redundancy.sidecar && outcome.redundancy.trailer);
        assert_eq!(outcome.metadata.payload_kind, PayloadKind::Text);
        assert_eq!(outcome.metadata.embedding_strength, 25.0);
        assert!(image::open(&outcome.output_path).is_ok());
    }

    #[test]
    fn test_strength_override_is_recorded() {
        let (_dir, engine, carrier) = setup();
        let outcome = engine
            .embed(&EmbedRequest::new(&carrier).with_text("x").with_strength(20.0))
            .unwrap();
        assert_eq!(outcome.metadata.embedding_strength, 20.0);

        let err = engine
            .embed(&EmbedRequest::new(&carrier).with_strength(0.0))
            .unwrap_err();
        assert!(matches!(err, WatermarkError::ConfigError(_)));
    }

    #[test]
    fn test_embed_missing_carrier_is_io_error() {
        let (dir, engine, _) = setup();
        let err = engine
            .embed(&EmbedRequest::new(dir.path().join("nope.png")))
            .unwrap_err();
        assert!(matches!(err, WatermarkError::Io(_)), "{err:?}");
    }

    #[test]
    fn test_embed_undecodable_carrier_is_decode_error() {
        let (dir, engine, _) = setup();
        let bogus = dir.path().join("bogus.png");
        std::fs::write(&bogus, b"not an image").unwrap();
        let err = engine.embed(&EmbedRequest::new(&bogus)).unwrap_err();
        assert!(matches!(err, WatermarkError::DecodeError(_)), "{err:?}");
    }

    #[test]
    fn test_embed_refuses_to_overwrite_carrier() {
        let (_dir, engine, carrier) = setup();
        let before = std::fs::read(&carrier).unwrap();
        let err = engine
            .embed(&EmbedRequest::new(&carrier).with_output_path(&carrier))
            .unwrap_err();
        assert!(matches!(err, WatermarkError::EmbeddingFailed(_)));
        assert_eq!(std::fs::read(&carrier).unwrap(), before);
    }

    #[test]
    fn test_failed_save_removes_display_copies() {
        let (dir, engine, carrier) = setup();
        let reference = dir.path().join("reference.png");
        RgbImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
        .save(&reference)
        .unwrap();
        let unreachable = dir.path().join("no-such-dir").join("out.png");

        let err = engine
            .embed(
                &EmbedRequest::new(&carrier)
                    .with_reference_image(&reference)
                    .with_output_path(&unreachable),
            )
            .unwrap_err();
        assert!(matches!(err, WatermarkError::Io(_)), "{err:?}");

        let config = engine.config();
        assert_eq!(std::fs::read_dir(&config.static_dir).unwrap().count(), 0);
        let backups = std::fs::read_dir(&config.processed_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(redundancy::BACKUP_COPY_PREFIX)
            })
            .count();
        assert_eq!(backups, 0);
    }

    #[test]
    fn test_plan_output_keeps_explicit_path() {
        let (dir, engine, carrier) = setup();
        let explicit = dir.path().join("mine.png");
        let planned = engine.plan_output(EmbedRequest::new(&carrier).with_output_path(&explicit));
        assert_eq!(planned.output_path(), Some(explicit.as_path()));

        let generated = engine.plan_output(EmbedRequest::new(dir.path().join("photo.jpeg")));
        let path = generated.output_path().unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
        assert!(path.starts_with(&engine.config().processed_dir));
    }

    #[test]
    fn test_recover_roundtrip_text() {
        let (_dir, engine, carrier) = setup();
        let outcome = engine
            .embed(&EmbedRequest::new(&carrier).with_text("roundtrip"))
            .unwrap();
        let result = engine.recover(&outcome.output_path);
        assert!(result.success && result.detected);
        assert_eq!(result.text.as_deref(), Some("roundtrip"));
        assert!(result.confidence >= 0.95);
    }
}
