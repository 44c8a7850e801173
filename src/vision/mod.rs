//! Recognition Layer
//!
//! Extracts text from the current scan image. The engine itself sits behind
//! the [`RecognitionEngine`] trait:
//! - Tesseract via its command-line tool (default)
//!
//! The [`RecognitionOrchestrator`] drives one run at a time on top of it.

pub mod orchestrator;
pub mod preprocess;
pub mod tesseract;

pub use orchestrator::{RecognitionOrchestrator, RecognitionRun};
pub use tesseract::TesseractEngine;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::capture::ImageKind;

/// Why the engine produced no text
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("recognition failed: {0}")]
    Failed(String),

    #[error("recognition timed out after {0:?}")]
    TimedOut(Duration),

    #[error("recognition cancelled")]
    Cancelled,

    #[error("image reference was released before recognition")]
    Released,

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input for a single engine call
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    /// Staged image to read
    pub path: PathBuf,
    pub kind: ImageKind,
    /// Language hint, e.g. "eng"
    pub language: String,
}

/// External text recognizer
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Extract raw text from the image
    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, RecognitionError>;
}

/// Outcome of a recognition run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Extracted text, trimmed; empty on failure
    pub text: String,
    pub succeeded: bool,
}

impl RecognitionResult {
    pub fn success(text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            succeeded: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            text: String::new(),
            succeeded: false,
        }
    }
}
