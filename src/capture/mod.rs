//! Image Acquisition Layer
//!
//! Turns a user-supplied file into the session's current scan image. The file
//! is validated, copied to a private staging location and exposed through a
//! revocable [`DisplayRef`]. Exactly one image is current at a time; acquiring
//! a new one revokes the previous reference.

pub mod scan_image;

pub use scan_image::{DisplayRef, ImageId, ImageKind, ScanImage};

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AcquisitionSettings;

/// Name used when the input path has no file name
const FALLBACK_SOURCE_NAME: &str = "scan";

/// The selected file cannot become a scan image
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("cannot read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0:?} is empty")]
    Empty(PathBuf),

    #[error("{path:?} is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{0:?} is not a supported image or PDF")]
    Unsupported(PathBuf),

    #[error("{path:?} looks like an image but cannot be decoded: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("could not stage image copy: {0}")]
    Staging(#[source] std::io::Error),

    #[error("acquisition task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Owns the current scan image
pub struct ImageAcquisition {
    settings: AcquisitionSettings,
    current: Option<ScanImage>,
    next_id: u64,
}

impl ImageAcquisition {
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self {
            settings,
            current: None,
            next_id: 1,
        }
    }

    pub fn current(&self) -> Option<&ScanImage> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<ImageId> {
        self.current.as_ref().map(|image| image.id())
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Make an already staged image current, revoking the previous one.
    ///
    /// Staging happens beforehand in [`StagedImage::prepare`], so a failed
    /// acquisition never disturbs the current image.
    pub fn install(&mut self, staged: StagedImage) -> ScanImage {
        let id = ImageId(self.next_id);
        self.next_id += 1;

        let image = ScanImage::new(
            id,
            staged.source_name,
            staged.kind,
            staged.dimensions,
            staged.display_ref,
        );
        info!("Acquired {} as {}", image.source_name(), id);

        if let Some(previous) = self.current.replace(image.clone()) {
            debug!("{} superseded by {}", previous.id(), id);
            previous.display_ref().revoke();
        }

        image
    }

    /// Release the current image, if any
    pub fn release_current(&mut self) {
        if let Some(previous) = self.current.take() {
            debug!("Releasing {}", previous.id());
            previous.display_ref().revoke();
        }
    }
}

/// A validated input file with its private copy, not yet current
#[derive(Debug)]
pub struct StagedImage {
    source_name: String,
    kind: ImageKind,
    dimensions: Option<(u32, u32)>,
    display_ref: DisplayRef,
}

impl StagedImage {
    /// Read, validate and stage `path`. Blocking; the partial copy is
    /// deleted on any failure.
    pub fn prepare(settings: &AcquisitionSettings, path: &Path) -> Result<Self, AcquisitionError> {
        let bytes = Self::read_input(settings, path)?;
        let (kind, dimensions) = Self::inspect(settings, path, &bytes)?;
        let display_ref = Self::stage(settings, kind, &bytes)?;

        let source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_SOURCE_NAME.to_string());

        debug!(
            "Staged {} ({:?}, {:?}, {} bytes)",
            source_name,
            kind,
            dimensions,
            bytes.len()
        );

        Ok(Self {
            source_name,
            kind,
            dimensions,
            display_ref,
        })
    }

    fn read_input(settings: &AcquisitionSettings, path: &Path) -> Result<Vec<u8>, AcquisitionError> {
        let unreadable = |source| AcquisitionError::Unreadable {
            path: path.to_path_buf(),
            source,
        };

        let size = std::fs::metadata(path).map_err(unreadable)?.len();
        if size > settings.max_file_bytes {
            return Err(AcquisitionError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: settings.max_file_bytes,
            });
        }

        let bytes = std::fs::read(path).map_err(unreadable)?;
        if bytes.is_empty() {
            return Err(AcquisitionError::Empty(path.to_path_buf()));
        }
        Ok(bytes)
    }

    fn inspect(
        settings: &AcquisitionSettings,
        path: &Path,
        bytes: &[u8],
    ) -> Result<(ImageKind, Option<(u32, u32)>), AcquisitionError> {
        if bytes.starts_with(b"%PDF-") {
            return Ok((ImageKind::Pdf, None));
        }

        let kind = image::guess_format(bytes)
            .ok()
            .and_then(ImageKind::from_format);

        match kind {
            Some(kind) => {
                let dimensions = image::ImageReader::new(Cursor::new(bytes))
                    .with_guessed_format()
                    .map_err(|e| AcquisitionError::Corrupt {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?
                    .into_dimensions();

                match dimensions {
                    Ok(dims) => Ok((kind, Some(dims))),
                    Err(e) if settings.validate_content => Err(AcquisitionError::Corrupt {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Ok((kind, None)),
                }
            }
            None if settings.validate_content => {
                Err(AcquisitionError::Unsupported(path.to_path_buf()))
            }
            None => Ok((ImageKind::Unknown, None)),
        }
    }

    fn stage(
        settings: &AcquisitionSettings,
        kind: ImageKind,
        bytes: &[u8],
    ) -> Result<DisplayRef, AcquisitionError> {
        let suffix = format!(".{}", kind.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("rx-scan-").suffix(&suffix);

        let mut staged = match &settings.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(AcquisitionError::Staging)?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        }
        .map_err(AcquisitionError::Staging)?;

        // A failed write drops `staged`, which deletes the partial copy
        staged.write_all(bytes).map_err(AcquisitionError::Staging)?;
        staged.flush().map_err(AcquisitionError::Staging)?;

        Ok(DisplayRef::new(staged.into_temp_path()))
    }
}

impl Drop for ImageAcquisition {
    fn drop(&mut self) {
        self.release_current();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::write_png;
    use super::*;
    use tempfile::TempDir;

    fn acquisition_in(staging: &TempDir) -> ImageAcquisition {
        ImageAcquisition::new(AcquisitionSettings {
            staging_dir: Some(staging.path().to_path_buf()),
            ..AcquisitionSettings::default()
        })
    }

    #[test]
    fn test_acquire_png() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let path = write_png(input.path(), "rx1.png");

        let image = acquisition.acquire(&path).unwrap();

        assert_eq!(image.source_name(), "rx1.png");
        assert_eq!(image.kind(), ImageKind::Png);
        assert_eq!(image.dimensions(), Some((8, 6)));
        let staged = image.display_ref().path().unwrap();
        assert!(staged.starts_with(staging.path()));
        assert_eq!(std::fs::read(&staged).unwrap(), std::fs::read(&path).unwrap());
        assert_eq!(acquisition.current_id(), Some(image.id()));
    }

    #[test]
    fn test_acquire_pdf() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let path = input.path().join("rx.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%fake\n").unwrap();

        let image = acquisition.acquire(&path).unwrap();
        assert_eq!(image.kind(), ImageKind::Pdf);
        assert!(image.dimensions().is_none());
    }

    #[test]
    fn test_new_image_revokes_previous() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);

        let first = acquisition.acquire(&write_png(input.path(), "a.png")).unwrap();
        let first_staged = first.display_ref().path().unwrap();
        let second = acquisition.acquire(&write_png(input.path(), "b.png")).unwrap();

        assert!(first.display_ref().is_revoked());
        assert!(!first_staged.exists());
        assert!(!second.display_ref().is_revoked());
        assert_ne!(first.id(), second.id());
        assert_eq!(acquisition.current_id(), Some(second.id()));
    }

    #[test]
    fn test_rejects_unsupported_and_keeps_previous() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let first = acquisition.acquire(&write_png(input.path(), "a.png")).unwrap();

        let notes = input.path().join("notes.txt");
        std::fs::write(&notes, "not an image").unwrap();
        let err = acquisition.acquire(&notes).unwrap_err();

        assert!(matches!(err, AcquisitionError::Unsupported(_)));
        assert_eq!(acquisition.current_id(), Some(first.id()));
        assert!(!first.display_ref().is_revoked());
        // Only the first image's copy is staged
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_permissive_mode_accepts_any_file() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = ImageAcquisition::new(AcquisitionSettings {
            validate_content: false,
            staging_dir: Some(staging.path().to_path_buf()),
            ..AcquisitionSettings::default()
        });
        let notes = input.path().join("notes.txt");
        std::fs::write(&notes, "not an image").unwrap();

        let image = acquisition.acquire(&notes).unwrap();
        assert_eq!(image.kind(), ImageKind::Unknown);
    }

    #[test]
    fn test_rejects_missing_file() {
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let err = acquisition.acquire(Path::new("/nonexistent/rx.png")).unwrap_err();
        assert!(matches!(err, AcquisitionError::Unreadable { .. }));
    }

    #[test]
    fn test_rejects_empty_file() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let path = input.path().join("empty.png");
        std::fs::write(&path, b"").unwrap();

        let err = acquisition.acquire(&path).unwrap_err();
        assert!(matches!(err, AcquisitionError::Empty(_)));
    }

    #[test]
    fn test_rejects_oversize_file() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = ImageAcquisition::new(AcquisitionSettings {
            max_file_bytes: 16,
            staging_dir: Some(staging.path().to_path_buf()),
            ..AcquisitionSettings::default()
        });

        let err = acquisition.acquire(&write_png(input.path(), "big.png")).unwrap_err();
        assert!(matches!(err, AcquisitionError::TooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_rejects_truncated_png() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let path = input.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n\0\0").unwrap();

        let err = acquisition.acquire(&path).unwrap_err();
        assert!(matches!(err, AcquisitionError::Corrupt { .. }));
    }

    #[test]
    fn test_drop_releases_current() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let image = acquisition.acquire(&write_png(input.path(), "a.png")).unwrap();

        drop(acquisition);
        assert!(image.display_ref().is_revoked());
    }

    #[test]
    fn test_staged_image_is_not_current_until_installed() {
        let input = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let mut acquisition = acquisition_in(&staging);
        let first = acquisition.acquire(&write_png(input.path(), "a.png")).unwrap();

        let staged =
            StagedImage::prepare(acquisition.settings(), &write_png(input.path(), "b.png")).unwrap();
        assert_eq!(acquisition.current_id(), Some(first.id()));
        assert!(!first.display_ref().is_revoked());

        let second = acquisition.install(staged);
        assert_eq!(second.source_name(), "b.png");
        assert_eq!(acquisition.current_id(), Some(second.id()));
        assert!(first.display_ref().is_revoked());
    }
}
