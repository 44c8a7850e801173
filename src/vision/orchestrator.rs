//! Recognition orchestration
//!
//! Runs are single-flight: starting a run cancels whichever run is still in
//! flight. Every run carries its own id and the id of the image it was started
//! for, so callers can tell a stale result from a current one. Engine failures,
//! timeouts and cancellation all collapse into an empty, unsuccessful result.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RecognitionEngine, RecognitionError, RecognitionRequest, RecognitionResult};
use crate::capture::{ImageId, ScanImage};

/// Identity of a recognition run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

/// A finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRun {
    pub run_id: RunId,
    pub image_id: ImageId,
    pub result: RecognitionResult,
    /// The run was cancelled before the engine answered
    pub cancelled: bool,
}

struct InFlight {
    run_id: RunId,
    image_id: ImageId,
    token: CancellationToken,
}

/// Drives recognition runs against an engine
pub struct RecognitionOrchestrator {
    engine: Arc<dyn RecognitionEngine>,
    language: String,
    timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_run: AtomicU64,
}

/// Clears the in-flight slot when the run ends, however it ends
struct InFlightGuard<'a> {
    orchestrator: &'a RecognitionOrchestrator,
    run_id: RunId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.orchestrator.in_flight.lock();
        if in_flight.as_ref().map(|run| run.run_id) == Some(self.run_id) {
            *in_flight = None;
        }
    }
}

impl RecognitionOrchestrator {
    pub fn new(engine: Arc<dyn RecognitionEngine>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            engine,
            language: language.into(),
            timeout,
            in_flight: Mutex::new(None),
            next_run: AtomicU64::new(1),
        }
    }

    /// Image the in-flight run was started for
    pub fn in_flight_image(&self) -> Option<ImageId> {
        self.in_flight.lock().as_ref().map(|run| run.image_id)
    }

    /// Id of the most recently started run
    pub fn latest_run(&self) -> Option<RunId> {
        match self.next_run.load(Ordering::SeqCst) {
            1 => None,
            next => Some(RunId(next - 1)),
        }
    }

    /// Cancel the in-flight run, if any
    pub fn cancel(&self) -> bool {
        match self.in_flight.lock().as_ref() {
            Some(run) => {
                info!("Cancelling recognition run {:?} for {}", run.run_id, run.image_id);
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Recognize `image`. Never fails; problems yield an empty result.
    pub async fn recognize(&self, image: &ScanImage) -> RecognitionRun {
        let (run_id, token) = self.begin(image.id());
        let _guard = InFlightGuard {
            orchestrator: self,
            run_id,
        };

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(RecognitionError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.call_engine(image)) => {
                outcome.unwrap_or(Err(RecognitionError::TimedOut(self.timeout)))
            }
        };

        let cancelled = matches!(outcome, Err(RecognitionError::Cancelled));
        let result = match outcome {
            Ok(text) => {
                let result = RecognitionResult::success(&text);
                info!(
                    "Run {:?} recognized {} chars from {} in {:?}",
                    run_id,
                    result.text.len(),
                    image.source_name(),
                    start.elapsed()
                );
                result
            }
            Err(RecognitionError::Cancelled) => {
                debug!("Run {:?} cancelled", run_id);
                RecognitionResult::failed()
            }
            Err(e) => {
                warn!("Run {:?} on {} produced no text: {}", run_id, image.source_name(), e);
                RecognitionResult::failed()
            }
        };

        RecognitionRun {
            run_id,
            image_id: image.id(),
            result,
            cancelled,
        }
    }

    fn begin(&self, image_id: ImageId) -> (RunId, CancellationToken) {
        let run_id = RunId(self.next_run.fetch_add(1, Ordering::SeqCst));
        let token = CancellationToken::new();

        let previous = self.in_flight.lock().replace(InFlight {
            run_id,
            image_id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            info!(
                "Run {:?} for {} supersedes run {:?} for {}",
                run_id, image_id, previous.run_id, previous.image_id
            );
            previous.token.cancel();
        }

        debug!("Starting run {:?} for {} via {}", run_id, image_id, self.engine.name());
        (run_id, token)
    }

    async fn call_engine(&self, image: &ScanImage) -> Result<String, RecognitionError> {
        let path = image.display_ref().path().ok_or(RecognitionError::Released)?;
        let request = RecognitionRequest {
            path,
            kind: image.kind(),
            language: self.language.clone(),
        };
        self.engine.recognize(&request).await
    }
}
