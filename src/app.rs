//! Scan Session
//!
//! Owns every component of one scanning session: the current image, the
//! recognition orchestrator, the correction buffer and the archive. Opening
//! a session loads the archive; closing it cancels recognition, releases the
//! current image and flushes any archive write that did not land.

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::{AcquisitionError, ImageAcquisition, ScanImage, StagedImage};
use crate::clipboard::{ClipboardError, ClipboardSink};
use crate::config::AppConfig;
use crate::shared::CorrectionBuffer;
use crate::storage::{Archive, ArchiveEntry, CommitOutcome, CommitRejected, PersistStatus, RecordStore};
use crate::vision::{RecognitionEngine, RecognitionOrchestrator, RecognitionResult, RecognitionRun};

/// Result of copying an archived entry out
#[derive(Debug)]
pub struct Export {
    pub text: String,
    /// Clipboard outcome; the text is returned either way
    pub copied: Result<(), ClipboardError>,
}

/// Session-scoped context for scanning prescriptions
pub struct ScanSession {
    acquisition: Mutex<ImageAcquisition>,
    buffer: RwLock<CorrectionBuffer>,
    archive: RwLock<Archive>,
    orchestrator: RecognitionOrchestrator,
    clipboard: Mutex<Box<dyn ClipboardSink>>,
}

impl ScanSession {
    /// Open a session, loading the archive from `store`
    pub fn open(
        config: &AppConfig,
        store: Box<dyn RecordStore>,
        engine: Arc<dyn RecognitionEngine>,
        clipboard: Box<dyn ClipboardSink>,
    ) -> Self {
        let archive = Archive::load(store, config.archive.record_key.clone(), config.archive.capacity);
        let orchestrator = RecognitionOrchestrator::new(
            engine,
            config.recognition.language.clone(),
            config.recognition.timeout(),
        );

        if archive.is_empty() {
            info!("Scan session opened with an empty archive");
        } else {
            info!(
                "Scan session opened ({} of {} archived scans)",
                archive.len(),
                archive.capacity()
            );
        }

        Self {
            acquisition: Mutex::new(ImageAcquisition::new(config.acquisition.clone())),
            buffer: RwLock::new(CorrectionBuffer::new()),
            archive: RwLock::new(archive),
            orchestrator,
            clipboard: Mutex::new(clipboard),
        }
    }

    /// Make `path` the current image. Any run for the previous image is
    /// cancelled and the buffer is emptied.
    pub async fn acquire(&self, path: &Path) -> Result<ScanImage, AcquisitionError> {
        let settings = self.acquisition.lock().settings().clone();
        let input = path.to_path_buf();
        let staged =
            tokio::task::spawn_blocking(move || StagedImage::prepare(&settings, &input)).await??;

        let mut acquisition = self.acquisition.lock();
        let image = acquisition.install(staged);
        self.buffer.write().reset(image.id());
        if self.orchestrator.cancel() {
            debug!("Dropped in-flight recognition for superseded image");
        }
        Ok(image)
    }

    /// Acquire `path` and recognize it
    pub async fn scan(&self, path: &Path) -> Result<RecognitionResult, AcquisitionError> {
        let image = self.acquire(path).await?;
        Ok(self.recognize(&image).await)
    }

    async fn recognize(&self, image: &ScanImage) -> RecognitionResult {
        {
            let acquisition = self.acquisition.lock();
            if acquisition.current_id() != Some(image.id()) {
                debug!("Not recognizing {}: no longer current", image.id());
                return RecognitionResult::failed();
            }
            self.buffer.write().begin(image.id());
        }

        let run = self.orchestrator.recognize(image).await;
        self.apply(&run);
        run.result
    }

    /// Seed the buffer with a finished run unless a newer image or run has
    /// taken over since it started
    fn apply(&self, run: &RecognitionRun) -> bool {
        let acquisition = self.acquisition.lock();
        let mut buffer = self.buffer.write();

        if acquisition.current_id() != Some(run.image_id) {
            debug!("Discarding result of run {:?}: {} is no longer current", run.run_id, run.image_id);
        } else if self.orchestrator.latest_run() != Some(run.run_id) {
            debug!(
                "Discarding result of superseded run {:?} (cancelled: {})",
                run.run_id, run.cancelled
            );
        } else {
            buffer.seed(&run.result);
            return true;
        }

        if buffer.is_busy() && self.orchestrator.in_flight_image() != buffer.image_id() {
            debug!("No run left for {:?}; leaving busy state", buffer.image_id());
            buffer.settle();
        }
        false
    }

    /// Cancel the in-flight recognition run, if any
    pub fn cancel_recognition(&self) -> bool {
        self.orchestrator.cancel()
    }

    pub fn current_image(&self) -> Option<ScanImage> {
        self.acquisition.lock().current().cloned()
    }

    /// Replace the buffer text with a user correction
    pub fn edit(&self, text: impl Into<String>) {
        self.buffer.write().edit(text);
    }

    /// The buffer text, or the scanning placeholder while a run is in flight
    pub fn display_text(&self) -> String {
        self.buffer.read().display_text().to_string()
    }

    pub fn is_busy(&self) -> bool {
        self.buffer.read().is_busy()
    }

    /// Commit the buffer text under the current image's name
    pub fn commit(&self) -> CommitOutcome {
        let file_name = self
            .current_image()
            .map(|image| image.source_name().to_string())
            .unwrap_or_default();

        let text = {
            let buffer = self.buffer.read();
            if buffer.is_busy() {
                return CommitOutcome::Rejected(CommitRejected::RecognitionInFlight);
            }
            if buffer.is_empty() {
                return CommitOutcome::Rejected(CommitRejected::EmptyText);
            }
            buffer.text().to_string()
        };

        self.archive.write().commit(&file_name, &text)
    }

    /// Archived entries, newest first
    pub fn list(&self) -> Vec<ArchiveEntry> {
        self.archive.read().list().to_vec()
    }

    pub fn entry(&self, id: &str) -> Option<ArchiveEntry> {
        self.archive.read().get(id).cloned()
    }

    /// Delete an archived entry; `None` if there was none with this id
    pub fn remove(&self, id: &str) -> Option<PersistStatus> {
        self.archive.write().remove(id)
    }

    /// Copy an archived entry's text to the clipboard
    pub fn export_text(&self, id: &str) -> Option<Export> {
        let text = self.archive.read().get(id)?.text.clone();
        let copied = self.clipboard.lock().write_text(&text);
        if let Err(e) = &copied {
            warn!("Could not copy scan {} to clipboard: {}", id, e);
        }
        Some(Export { text, copied })
    }

    /// Whether archive changes are waiting for a successful write
    pub fn has_unsaved_changes(&self) -> bool {
        self.archive.read().is_dirty()
    }

    /// Tear the session down
    pub fn close(&self) -> PersistStatus {
        self.orchestrator.cancel();
        self.acquisition.lock().release_current();
        self.buffer.write().clear();

        let status = self.archive.write().flush();
        if let PersistStatus::Failed(reason) = &status {
            warn!("Closing with unsaved archive changes: {}", reason);
        }
        info!("Scan session closed");
        status
    }
}
