//! Metadata redundancy.
//!
//! Every embed stores its metadata record in several independent places so
//! that recovery still works after some of them are lost:
//!
//! - a JSON side-file next to the output image (`<output>.metadata`)
//! - a trailer appended after the image's own bytes (`WATERMARK_METADATA:{..}`)
//! - for image payloads, a backup record keyed by the output's pixel
//!   fingerprint, plus two display copies of the reference image stored
//!   under independent identifiers
//!
//! Writes are best effort. A failed location is logged and reported in the
//! [`RedundancyReport`], never returned as an error.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbImage};
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, SIDECAR_SUFFIX, TRAILER_MARKER};
use crate::error::{Result, WatermarkError};
use crate::metadata::{PayloadKind, WatermarkMetadata};

/// File name prefix of the primary display copy.
pub const PRIMARY_COPY_PREFIX: &str = "original_watermark_";

/// File name prefix of the backup display copy.
pub const BACKUP_COPY_PREFIX: &str = "backup_watermark_";

/// Which redundancy locations an embed actually reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedundancyReport {
    pub sidecar: bool,
    pub trailer: bool,
    /// Number of display copies written (0, 1 or 2)
    pub display_copies: u8,
    pub backup_record: bool,
}

impl RedundancyReport {
    /// Number of metadata locations that hold the record.
    pub fn metadata_locations(&self) -> usize {
        [self.sidecar, self.trailer, self.backup_record]
            .iter()
            .filter(|reached| **reached)
            .count()
    }
}

/// Locators of the stored display copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayCopies {
    pub primary: Option<String>,
    pub backup: Option<String>,
}

impl DisplayCopies {
    pub fn count(&self) -> u8 {
        u8::from(self.primary.is_some()) + u8::from(self.backup.is_some())
    }
}

/// Path of the metadata side-file for an image.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    let mut path = image_path.as_os_str().to_os_string();
    path.push(SIDECAR_SUFFIX);
    PathBuf::from(path)
}

/// Read the side-file of `image_path`. `Ok(None)` when there is none.
pub fn read_sidecar(image_path: &Path) -> Result<Option<WatermarkMetadata>> {
    let path = sidecar_path(image_path);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    WatermarkMetadata::from_json_slice(&bytes).map(Some)
}

/// Bytes following each trailer marker, in file order.
fn trailer_candidates(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .windows(TRAILER_MARKER.len())
        .enumerate()
        .filter(|(_, window)| *window == TRAILER_MARKER)
        .map(move |(start, _)| &bytes[start + TRAILER_MARKER.len()..])
}

/// Bytes following the first trailer marker, if any.
pub fn find_trailer(bytes: &[u8]) -> Option<&[u8]> {
    trailer_candidates(bytes).next()
}

/// Parse the trailer of an image file's bytes.
///
/// Markers are tried in file order and the first one followed by a complete
/// metadata record wins, so a record whose text repeats the marker still
/// parses. `Ok(None)` when no marker is present, an error when no marker is
/// followed by a record.
pub fn parse_trailer(bytes: &[u8]) -> Result<Option<WatermarkMetadata>> {
    let mut last_error = None;
    for payload in trailer_candidates(bytes) {
        match WatermarkMetadata::from_json_slice(payload) {
            Ok(metadata) => return Ok(Some(metadata)),
            Err(e) => {
                debug!(remaining = payload.len(), "Skipping unparsable trailer marker");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Read and parse the trailer of the file at `path`.
pub fn read_trailer(path: &Path) -> Result<Option<WatermarkMetadata>> {
    let bytes = fs::read(path)?;
    parse_trailer(&bytes)
}

/// Append the marker and compact JSON metadata to the end of a file.
pub fn append_trailer(path: &Path, metadata: &WatermarkMetadata) -> Result<()> {
    let json = metadata.to_json_bytes()?;
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(TRAILER_MARKER)?;
    file.write_all(&json)?;
    file.flush()?;
    Ok(())
}

/// Hex SHA3-256 over the image dimensions and RGB samples.
///
/// Keyed on pixels, so it is unaffected by side-files, trailers and
/// lossless re-encoding.
pub fn pixel_fingerprint(image: &RgbImage) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(image.width().to_be_bytes());
    hasher.update(image.height().to_be_bytes());
    hasher.update(image.as_raw());
    hex::encode(hasher.finalize())
}

/// Path of the backup record for a fingerprint.
pub fn backup_record_path(config: &EngineConfig, fingerprint: &str) -> PathBuf {
    config.records_dir().join(format!("{}.json", fingerprint))
}

/// Look up the backup record matching an image's pixels.
pub fn read_backup_record(
    config: &EngineConfig,
    image: &RgbImage,
) -> Result<Option<WatermarkMetadata>> {
    let path = backup_record_path(config, &pixel_fingerprint(image));
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    WatermarkMetadata::from_json_slice(&bytes).map(Some)
}

/// Writes metadata and display copies to the configured locations.
pub struct RedundancyWriter<'a> {
    config: &'a EngineConfig,
}

impl<'a> RedundancyWriter<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Store the reference image as a primary copy in the static directory and
    /// a backup copy in the processed directory, each under its own UUID.
    pub fn store_display_copies(&self, image: &DynamicImage) -> DisplayCopies {
        let primary_name = format!("{}{}.png", PRIMARY_COPY_PREFIX, Uuid::new_v4());
        let backup_name = format!("{}{}.png", BACKUP_COPY_PREFIX, Uuid::new_v4());

        let primary = self
            .save_copy(image, &self.config.static_dir.join(&primary_name))
            .then(|| self.config.locator_for(&primary_name));
        let backup = self
            .save_copy(image, &self.config.processed_dir.join(&backup_name))
            .then(|| self.config.locator_for(&backup_name));

        let copies = DisplayCopies { primary, backup };
        debug!(?copies, "Stored display copies");
        copies
    }

    fn save_copy(&self, image: &DynamicImage, path: &Path) -> bool {
        // PNG cannot hold every decoded sample type, so normalize to 8 bits.
        let copy = if image.color().has_alpha() {
            DynamicImage::ImageRgba8(image.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };
        let saved = copy.save_with_format(path, ImageFormat::Png);
        match saved {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to store display copy");
                false
            }
        }
    }

    /// Write the finalized record to every metadata location.
    ///
    /// `display_copies` is carried into the report as-is.
    pub fn persist(
        &self,
        metadata: &WatermarkMetadata,
        output_path: &Path,
        display_copies: u8,
    ) -> RedundancyReport {
        let mut report = RedundancyReport {
            display_copies,
            ..RedundancyReport::default()
        };

        match self.write_sidecar(metadata, output_path) {
            Ok(path) => {
                debug!(path = %path.display(), "Wrote metadata side-file");
                report.sidecar = true;
            }
            Err(e) => warn!(error = %e, "Failed to write metadata side-file"),
        }

        // Fingerprint the file before the trailer lands, though decoders stop
        // ahead of it anyway.
        if metadata.payload_kind == PayloadKind::Image {
            match self.write_backup_record(metadata, output_path) {
                Ok(path) => {
                    debug!(path = %path.display(), "Wrote backup record");
                    report.backup_record = true;
                }
                Err(e) => warn!(error = %e, "Failed to write backup record"),
            }
        }

        match append_trailer(output_path, metadata) {
            Ok(()) => report.trailer = true,
            Err(e) => warn!(error = %e, "Failed to append metadata trailer"),
        }

        info!(
            output = %output_path.display(),
            locations = report.metadata_locations(),
            display_copies = report.display_copies,
            "Persisted watermark metadata"
        );
        report
    }

    pub fn write_sidecar(&self, metadata: &WatermarkMetadata, output_path: &Path) -> Result<PathBuf> {
        let path = sidecar_path(output_path);
        fs::write(&path, metadata.to_json_pretty()?)?;
        Ok(path)
    }

    pub fn write_backup_record(
        &self,
        metadata: &WatermarkMetadata,
        output_path: &Path,
    ) -> Result<PathBuf> {
        let path = self.record_path_for(output_path)?;
        fs::create_dir_all(self.config.records_dir())?;
        fs::write(&path, metadata.to_json_pretty()?)?;
        Ok(path)
    }

    fn record_path_for(&self, output_path: &Path) -> Result<PathBuf> {
        let written = image::open(output_path).map_err(|e| {
            WatermarkError::DecodeError(format!("{}: {}", output_path.display(), e))
        })?;
        Ok(backup_record_path(
            self.config,
            &pixel_fingerprint(&written.to_rgb8()),
        ))
    }

    /// Delete stored display copies. Missing files are ignored.
    pub fn remove_display_copies(&self, copies: &DisplayCopies) {
        let stored = [
            (copies.primary.as_deref(), &self.config.static_dir),
            (copies.backup.as_deref(), &self.config.processed_dir),
        ];
        for (locator, dir) in stored {
            if let Some(name) = locator.and_then(|l| self.config.file_name_of(l)) {
                remove_artifact(&dir.join(name));
            }
        }
    }

    /// Delete everything an embed wrote for `output_path`.
    ///
    /// The output itself goes last, so once it is gone nothing else of the
    /// embed remains.
    pub fn discard(&self, metadata: &WatermarkMetadata, output_path: &Path) {
        remove_artifact(&sidecar_path(output_path));
        if metadata.payload_kind == PayloadKind::Image {
            match self.record_path_for(output_path) {
                Ok(record) => remove_artifact(&record),
                Err(e) => warn!(error = %e, "Cannot locate backup record of discarded output"),
            }
        }
        self.remove_display_copies(&DisplayCopies {
            primary: metadata.image_locator.clone(),
            backup: metadata.backup_image_locator.clone(),
        });
        remove_artifact(output_path);
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed embed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove embed artifact"),
    }
}

/// A display copy that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub locator: String,
    /// The primary copy was missing and the backup was used.
    pub from_backup: bool,
}

/// Resolves metadata locators against the storage directories.
pub struct LocatorResolver<'a> {
    config: &'a EngineConfig,
}

impl<'a> LocatorResolver<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Resolve the display copy referenced by `metadata`.
    ///
    /// The primary copy always wins. When only the backup exists it is
    /// copied into the primary's location so the primary locator keeps
    /// working; if that copy fails, the backup is published in the static
    /// directory under its own name.
    pub fn resolve(&self, metadata: &WatermarkMetadata) -> Option<ResolvedImage> {
        let primary = metadata
            .image_locator
            .as_deref()
            .and_then(|locator| self.config.file_name_of(locator).map(|name| (locator, name)));

        if let Some((locator, name)) = primary {
            if self.config.static_dir.join(name).is_file() {
                return Some(ResolvedImage {
                    locator: locator.to_string(),
                    from_backup: false,
                });
            }
        }

        let backup_locator = metadata.backup_image_locator.as_deref()?;
        let backup_name = self.config.file_name_of(backup_locator)?;
        let backup_path = self.find_backup(backup_name)?;

        if let Some((locator, name)) = primary {
            let target = self.config.static_dir.join(name);
            match fs::copy(&backup_path, &target) {
                Ok(_) => {
                    info!(locator, "Restored primary display copy from backup");
                    return Some(ResolvedImage {
                        locator: locator.to_string(),
                        from_backup: true,
                    });
                }
                Err(e) => warn!(
                    target = %target.display(),
                    error = %e,
                    "Failed to restore primary display copy"
                ),
            }
        }

        let published = self.config.static_dir.join(backup_name);
        if published != backup_path {
            if let Err(e) = fs::copy(&backup_path, &published) {
                warn!(
                    target = %published.display(),
                    error = %e,
                    "Failed to publish backup display copy"
                );
                return None;
            }
        }
        Some(ResolvedImage {
            locator: self.config.locator_for(backup_name),
            from_backup: true,
        })
    }

    fn find_backup(&self, name: &str) -> Option<PathBuf> {
        [&self.config.static_dir, &self.config.processed_dir]
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }
}
