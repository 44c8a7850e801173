//! Editable text for the current scan

use tracing::debug;

use crate::capture::ImageId;
use crate::vision::RecognitionResult;

/// Shown in place of the text while recognition is running
pub const SCANNING_PLACEHOLDER: &str = "Scanning…";

/// Holds the user-editable recognition output for the current image.
///
/// Edits are accepted at any time. An edit made while a run is in flight is
/// overwritten when that run's result is seeded.
#[derive(Debug, Clone, Default)]
pub struct CorrectionBuffer {
    image_id: Option<ImageId>,
    text: String,
    busy: bool,
}

impl CorrectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the buffer at a newly acquired image, with no text yet
    pub fn reset(&mut self, image_id: ImageId) {
        self.image_id = Some(image_id);
        self.text.clear();
        self.busy = false;
    }

    /// Enter the busy state for a run on `image_id`
    pub fn begin(&mut self, image_id: ImageId) {
        self.image_id = Some(image_id);
        self.text.clear();
        self.busy = true;
    }

    /// Replace the text with a run's output and leave the busy state
    pub fn seed(&mut self, result: &RecognitionResult) {
        if !self.text.is_empty() {
            debug!("Recognition output replaces {} chars of manual edits", self.text.len());
        }
        self.text = result.text.clone();
        self.busy = false;
    }

    /// Leave the busy state without new text, when no run is left to seed it
    pub fn settle(&mut self) {
        self.busy = false;
    }

    /// Overwrite the text with a user edit
    pub fn edit(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Forget the image and its text
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// The text as last written, by the user or a run
    pub fn text(&self) -> &str {
        &self.text
    }

    /// What a text field should show
    pub fn display_text(&self) -> &str {
        if self.busy {
            SCANNING_PLACEHOLDER
        } else {
            &self.text
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// No meaningful text to commit
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn image_id(&self) -> Option<ImageId> {
        self.image_id
    }
}
