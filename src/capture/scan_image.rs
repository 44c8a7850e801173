//! Acquired scan images and their revocable references

use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Identity of an acquired image within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image-{}", self.0)
    }
}

/// Detected content type of an acquired file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Webp,
    Pdf,
    /// Accepted without validation
    Unknown,
}

impl ImageKind {
    pub fn from_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Png => Some(ImageKind::Png),
            image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            image::ImageFormat::Gif => Some(ImageKind::Gif),
            image::ImageFormat::Bmp => Some(ImageKind::Bmp),
            image::ImageFormat::Tiff => Some(ImageKind::Tiff),
            image::ImageFormat::WebP => Some(ImageKind::Webp),
            _ => None,
        }
    }

    /// Extension given to the staged copy
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
            ImageKind::Gif => "gif",
            ImageKind::Bmp => "bmp",
            ImageKind::Tiff => "tif",
            ImageKind::Webp => "webp",
            ImageKind::Pdf => "pdf",
            ImageKind::Unknown => "bin",
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, ImageKind::Pdf)
    }
}

/// Revocable handle to a staged copy of the image.
///
/// The copy is usable for display and recognition until [`DisplayRef::revoke`]
/// is called or the last handle is dropped, whichever comes first.
pub struct DisplayRef {
    path: PathBuf,
    staged: Mutex<Option<TempPath>>,
}

impl DisplayRef {
    pub(crate) fn new(staged: TempPath) -> Self {
        Self {
            path: staged.to_path_buf(),
            staged: Mutex::new(Some(staged)),
        }
    }

    /// Path of the staged copy, `None` once revoked
    pub fn path(&self) -> Option<PathBuf> {
        self.staged.lock().as_ref().map(|_| self.path.clone())
    }

    pub fn is_revoked(&self) -> bool {
        self.staged.lock().is_none()
    }

    /// Release the staged copy. Revoking twice is harmless.
    pub fn revoke(&self) {
        let Some(staged) = self.staged.lock().take() else {
            return;
        };
        match staged.close() {
            Ok(()) => debug!("Released staged image {:?}", self.path),
            Err(e) => warn!("Failed to remove staged image {:?}: {}", self.path, e),
        }
    }
}

impl fmt::Debug for DisplayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayRef")
            .field("path", &self.path)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// The current scan image
#[derive(Debug, Clone)]
pub struct ScanImage {
    id: ImageId,
    source_name: String,
    kind: ImageKind,
    dimensions: Option<(u32, u32)>,
    display_ref: Arc<DisplayRef>,
}

impl ScanImage {
    pub(crate) fn new(
        id: ImageId,
        source_name: String,
        kind: ImageKind,
        dimensions: Option<(u32, u32)>,
        display_ref: DisplayRef,
    ) -> Self {
        Self {
            id,
            source_name,
            kind,
            dimensions,
            display_ref: Arc::new(display_ref),
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Original file name
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// Pixel dimensions, known for decodable raster images
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn display_ref(&self) -> &DisplayRef {
        &self.display_ref
    }
}
