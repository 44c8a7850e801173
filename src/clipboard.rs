//! Clipboard export boundary
//!
//! Archived text is handed to the platform clipboard. A failure is reported
//! to the caller but never changes the archive.

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Clipboard write failure
#[derive(Debug, Error)]
#[error("clipboard unavailable: {0}")]
pub struct ClipboardError(pub String);

/// Somewhere exported text can be written
pub trait ClipboardSink: Send {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// The system clipboard. A fresh handle is opened per write.
///
/// On Linux the clipboard is owned by the writing process and is lost when it
/// exits, so a write blocks for up to `serve_for` or until another
/// application takes the contents over.
#[derive(Debug, Clone, Default)]
pub struct SystemClipboard {
    serve_for: Duration,
}

impl SystemClipboard {
    pub fn new(serve_for: Duration) -> Self {
        Self { serve_for }
    }

    /// Whether copied text outlives this process
    pub fn persists_after_exit(&self) -> bool {
        !cfg!(target_os = "linux") || !self.serve_for.is_zero()
    }
}

impl ClipboardSink for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError(e.to_string()))?;
        set_text(&mut clipboard, text, serve_deadline(self.serve_for, Instant::now()))
            .map_err(|e| ClipboardError(e.to_string()))?;
        debug!("Copied {} chars to clipboard", text.len());
        Ok(())
    }
}

fn serve_deadline(serve_for: Duration, now: Instant) -> Option<Instant> {
    if serve_for.is_zero() {
        None
    } else {
        now.checked_add(serve_for)
    }
}

#[cfg(target_os = "linux")]
fn set_text(
    clipboard: &mut arboard::Clipboard,
    text: &str,
    deadline: Option<Instant>,
) -> Result<(), arboard::Error> {
    use arboard::SetExtLinux;

    match deadline {
        Some(deadline) => {
            debug!("Serving clipboard until taken over or {:?}", deadline);
            clipboard.set().wait_until(deadline).text(text.to_string())
        }
        None => clipboard.set_text(text.to_string()),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_text(
    clipboard: &mut arboard::Clipboard,
    text: &str,
    _deadline: Option<Instant>,
) -> Result<(), arboard::Error> {
    clipboard.set_text(text.to_string())
}
