//! Watermark recovery.
//!
//! Recovery is an ordered chain of [`RecoveryStrategy`] implementations.
//! Metadata sources come first because they are exact; the blind signal
//! strategies only run when no metadata survived.
//!
//! ## Standard chain
//!
//! | order | strategy | confidence |
//! |---|---|---|
//! | 1 | side-file | 0.99 (0.95 backup copy) |
//! | 2 | file trailer | 0.95 (0.90 backup copy) |
//! | 3 | pixel-fingerprint backup record | 0.90 (0.85 backup copy) |
//! | 4 | blind extraction | occupancy, at most 0.8 |
//! | 5 | mis-tagged image probe | 0.98 .. 0.7 |
//!
//! A metadata source that reports a text payload with empty text is held
//! back as a fallback: the remaining strategies run, including the image
//! probe, and the held result is only returned when they find nothing.

mod signal;
mod sources;

use std::cell::OnceCell;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use signal::{BlindExtraction, MisTaggedImageProbe};
pub use sources::{BackupRecordLookup, SidecarLookup, TrailerLookup};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::metadata::PayloadKind;
use crate::watermark::Carrier;

/// Message of a negative result.
pub const NOT_DETECTED_MESSAGE: &str = "no watermark detected";

/// Message of the held empty-text fallback.
pub const EMPTY_TEXT_MESSAGE: &str = "empty text watermark";

/// Where a recovery result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    Sidecar,
    Trailer,
    BackupRecord,
    Blind,
    ImageProbe,
    /// Nothing was found, or recovery could not run.
    None,
}

impl std::fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sidecar => write!(f, "side-file"),
            Self::Trailer => write!(f, "file trailer"),
            Self::BackupRecord => write!(f, "backup record"),
            Self::Blind => write!(f, "signal extraction"),
            Self::ImageProbe => write!(f, "image probe"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Outcome of a recovery attempt.
///
/// `success` is false only when the suspect image could not be read;
/// an image without a watermark is a successful, negative result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub detected: bool,
    pub kind: PayloadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_locator: Option<String>,
    pub confidence: f64,
    pub message: String,
    pub source: RecoverySource,
}

impl RecoveryResult {
    /// Ran correctly, found nothing.
    pub fn not_detected() -> Self {
        Self {
            success: true,
            detected: false,
            kind: PayloadKind::Empty,
            text: None,
            image_locator: None,
            confidence: 0.0,
            message: NOT_DETECTED_MESSAGE.to_string(),
            source: RecoverySource::None,
        }
    }

    /// Could not run.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::not_detected()
        }
    }

    pub fn text(text: String, confidence: f64, source: RecoverySource) -> Self {
        Self {
            success: true,
            detected: true,
            kind: PayloadKind::Text,
            text: Some(text),
            image_locator: None,
            confidence,
            message: format!("text watermark recovered from {}", source),
            source,
        }
    }

    pub fn image(locator: Option<String>, confidence: f64, source: RecoverySource) -> Self {
        Self {
            success: true,
            detected: true,
            kind: PayloadKind::Image,
            text: None,
            image_locator: locator,
            confidence,
            message: format!("image watermark recovered from {}", source),
            source,
        }
    }

    /// Detected text payload whose text is empty.
    pub fn is_empty_text(&self) -> bool {
        self.detected
            && self.kind == PayloadKind::Text
            && self.text.as_deref().map_or(true, str::is_empty)
    }
}

/// Confidence pair for a metadata source: primary display copy vs. backup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceConfidence {
    pub primary: f64,
    pub backup: f64,
}

impl SourceConfidence {
    pub const fn new(primary: f64, backup: f64) -> Self {
        Self { primary, backup }
    }

    pub fn pick(self, from_backup: bool) -> f64 {
        if from_backup {
            self.backup
        } else {
            self.primary
        }
    }
}

/// State shared by the strategies of one recovery.
pub struct RecoveryContext<'a> {
    suspect: &'a Path,
    config: &'a EngineConfig,
    empty_text_hint: bool,
    carrier: OnceCell<Carrier>,
}

impl<'a> RecoveryContext<'a> {
    pub fn new(suspect: &'a Path, config: &'a EngineConfig) -> Self {
        Self {
            suspect,
            config,
            empty_text_hint: false,
            carrier: OnceCell::new(),
        }
    }

    pub fn suspect(&self) -> &Path {
        self.suspect
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Set once a metadata source reported a text payload with empty text.
    pub fn empty_text_hint(&self) -> bool {
        self.empty_text_hint
    }

    pub fn set_empty_text_hint(&mut self) {
        self.empty_text_hint = true;
    }

    /// The decoded suspect image, decoded at most once per recovery.
    pub fn carrier(&self) -> Result<&Carrier> {
        if let Some(carrier) = self.carrier.get() {
            return Ok(carrier);
        }
        let carrier = Carrier::open(self.suspect)?;
        Ok(self.carrier.get_or_init(|| carrier))
    }
}

/// One way of recovering a watermark.
///
/// `Ok(None)` means the source is absent or unusable and the next strategy
/// should run. `Err` is reserved for failures to read the suspect image
/// itself and ends the recovery.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_recover(&self, ctx: &RecoveryContext<'_>) -> Result<Option<RecoveryResult>>;
}

/// Runs strategies in order; the first conclusive result wins.
pub struct RecoveryOrchestrator {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(SidecarLookup),
            Box::new(TrailerLookup),
            Box::new(BackupRecordLookup),
            Box::new(BlindExtraction),
            Box::new(MisTaggedImageProbe),
        ])
    }
}

impl RecoveryOrchestrator {
    pub fn new(strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Recover the watermark of `suspect`. Never fails; hard errors are
    /// folded into a result with `success == false`.
    pub fn recover(&self, config: &EngineConfig, suspect: &Path) -> RecoveryResult {
        if !suspect.is_file() {
            warn!(path = %suspect.display(), "Suspect image not found");
            return RecoveryResult::failed(format!(
                "suspect image not found: {}",
                suspect.display()
            ));
        }

        let mut ctx = RecoveryContext::new(suspect, config);
        let mut held: Option<RecoveryResult> = None;

        for strategy in &self.strategies {
            match strategy.try_recover(&ctx) {
                Ok(Some(result)) if result.is_empty_text() => {
                    debug!(
                        strategy = strategy.name(),
                        "Empty text payload, continuing with image probes"
                    );
                    held.get_or_insert(result);
                    ctx.set_empty_text_hint();
                }
                Ok(Some(result)) => {
                    info!(
                        path = %suspect.display(),
                        strategy = strategy.name(),
                        detected = result.detected,
                        confidence = result.confidence,
                        "Recovery finished"
                    );
                    return result;
                }
                Ok(None) => debug!(strategy = strategy.name(), "No result"),
                Err(e) => {
                    warn!(
                        path = %suspect.display(),
                        strategy = strategy.name(),
                        error = %e,
                        "Recovery failed"
                    );
                    return RecoveryResult::failed(e.to_string());
                }
            }
        }

        match held {
            Some(mut result) => {
                info!(path = %suspect.display(), "Returning empty text watermark");
                result.text = Some(String::new());
                result.message = EMPTY_TEXT_MESSAGE.to_string();
                result
            }
            None => {
                info!(path = %suspect.display(), "No watermark detected");
                RecoveryResult::not_detected()
            }
        }
    }
}
