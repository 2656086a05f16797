//! Metadata-based recovery strategies.

use tracing::{debug, warn};

use super::{RecoveryContext, RecoveryResult, RecoverySource, RecoveryStrategy, SourceConfidence};
use crate::error::Result;
use crate::metadata::{PayloadKind, WatermarkMetadata};
use crate::redundancy::{self, LocatorResolver};

const SIDECAR: SourceConfidence = SourceConfidence::new(0.99, 0.95);
const TRAILER: SourceConfidence = SourceConfidence::new(0.95, 0.90);
const TRAILER_INFERRED: SourceConfidence = SourceConfidence::new(0.90, 0.90);
const BACKUP_RECORD: SourceConfidence = SourceConfidence::new(0.90, 0.85);

/// Turn a metadata record into a result.
///
/// Image records only count when one of their display copies still resolves.
/// A record without payload is conclusive: nothing was embedded.
pub(super) fn result_from_metadata(
    ctx: &RecoveryContext<'_>,
    metadata: &WatermarkMetadata,
    confidence: SourceConfidence,
    source: RecoverySource,
) -> Option<RecoveryResult> {
    match metadata.payload_kind {
        PayloadKind::Text => Some(RecoveryResult::text(
            metadata.text_or_empty().to_string(),
            confidence.primary,
            source,
        )),
        PayloadKind::Image => match LocatorResolver::new(ctx.config()).resolve(metadata) {
            Some(resolved) => Some(RecoveryResult::image(
                Some(resolved.locator),
                confidence.pick(resolved.from_backup),
                source,
            )),
            None => {
                debug!(%source, "Image metadata found but no display copy resolves");
                None
            }
        },
        PayloadKind::Empty => Some(RecoveryResult {
            source,
            ..RecoveryResult::not_detected()
        }),
    }
}

/// Reads `<suspect>.metadata`.
pub struct SidecarLookup;

impl RecoveryStrategy for SidecarLookup {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn try_recover(&self, ctx: &RecoveryContext<'_>) -> Result<Option<RecoveryResult>> {
        let metadata = match redundancy::read_sidecar(ctx.suspect()) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(path = %ctx.suspect().display(), error = %e, "Unusable metadata side-file");
                return Ok(None);
            }
        };
        Ok(result_from_metadata(
            ctx,
            &metadata,
            SIDECAR,
            RecoverySource::Sidecar,
        ))
    }
}

/// Reads the metadata appended after the image bytes.
pub struct TrailerLookup;

impl TrailerLookup {
    /// Records written without a kind but carrying a payload are treated as
    /// that payload's kind.
    fn infer_kind(mut metadata: WatermarkMetadata) -> (WatermarkMetadata, bool) {
        if metadata.payload_kind != PayloadKind::Empty {
            return (metadata, false);
        }
        if metadata.has_image_locator() {
            metadata.payload_kind = PayloadKind::Image;
        } else if !metadata.text_or_empty().is_empty() {
            metadata.payload_kind = PayloadKind::Text;
        } else {
            return (metadata, false);
        }
        debug!(kind = %metadata.payload_kind, "Inferred payload kind of trailer record");
        (metadata, true)
    }
}

impl RecoveryStrategy for TrailerLookup {
    fn name(&self) -> &'static str {
        "trailer"
    }

    fn try_recover(&self, ctx: &RecoveryContext<'_>) -> Result<Option<RecoveryResult>> {
        let bytes = std::fs::read(ctx.suspect())?;
        let metadata = match redundancy::parse_trailer(&bytes) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(path = %ctx.suspect().display(), error = %e, "Unusable metadata trailer");
                return Ok(None);
            }
        };

        let (metadata, inferred) = Self::infer_kind(metadata);
        let confidence = if inferred { TRAILER_INFERRED } else { TRAILER };
        Ok(result_from_metadata(
            ctx,
            &metadata,
            confidence,
            RecoverySource::Trailer,
        ))
    }
}

/// Looks up the record keyed by the suspect's pixel fingerprint.
pub struct BackupRecordLookup;

impl RecoveryStrategy for BackupRecordLookup {
    fn name(&self) -> &'static str {
        "backup-record"
    }

    fn try_recover(&self, ctx: &RecoveryContext<'_>) -> Result<Option<RecoveryResult>> {
        let carrier = ctx.carrier()?;
        let metadata = match redundancy::read_backup_record(ctx.config(), carrier.image()) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "Unusable backup record");
                return Ok(None);
            }
        };
        Ok(result_from_metadata(
            ctx,
            &metadata,
            BACKUP_RECORD,
            RecoverySource::BackupRecord,
        ))
    }
}
