//! Tesseract recognition backend
//!
//! Runs the `tesseract` command-line tool. PDF input is rasterized first with
//! poppler's `pdftoppm`; only the first page is read. Child processes are
//! killed when the surrounding future is dropped, so a cancelled or timed-out
//! run does not leave a recognizer behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use super::preprocess;
use super::{RecognitionEngine, RecognitionError, RecognitionRequest};
use crate::config::RecognitionSettings;

/// Tesseract OCR engine
pub struct TesseractEngine {
    settings: RecognitionSettings,
}

impl TesseractEngine {
    pub fn new(settings: RecognitionSettings) -> Self {
        Self { settings }
    }

    /// Run tesseract on an image file and capture stdout
    async fn run_tesseract(&self, image_path: &Path, language: &str) -> Result<String, RecognitionError> {
        let output = Command::new(&self.settings.tesseract_path)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", language])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(RecognitionError::Failed(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                RecognitionError::BackendNotAvailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.settings.tesseract_path
                )),
            ),
            Err(e) => Err(RecognitionError::Io(e)),
        }
    }

    /// Rasterize the first page of a PDF into `output_dir`
    async fn pdf_first_page(&self, pdf_path: &Path, output_dir: &Path) -> Result<PathBuf, RecognitionError> {
        let output_prefix = output_dir.join("page");

        let status = Command::new(&self.settings.pdftoppm_path)
            .args(["-png", "-r", "300", "-f", "1", "-l", "1", "-singlefile"])
            .arg(pdf_path)
            .arg(&output_prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(s) if s.success() => {
                let page = output_prefix.with_extension("png");
                if page.exists() {
                    Ok(page)
                } else {
                    Err(RecognitionError::Failed("no image generated for page 1".to_string()))
                }
            }
            Ok(_) => Err(RecognitionError::Failed(
                "pdftoppm failed to convert PDF page".to_string(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                RecognitionError::BackendNotAvailable(format!(
                    "{} not found (install poppler-utils)",
                    self.settings.pdftoppm_path
                )),
            ),
            Err(e) => Err(RecognitionError::Io(e)),
        }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, RecognitionError> {
        let start = Instant::now();
        let scratch = TempDir::new()?;

        let mut input = if request.kind.is_pdf() {
            self.pdf_first_page(&request.path, scratch.path()).await?
        } else {
            request.path.clone()
        };

        let preprocess_settings = &self.settings.preprocess;
        if preprocess::is_active(preprocess_settings) {
            let settings = preprocess_settings.clone();
            let output_dir = scratch.path().to_path_buf();
            input = tokio::task::spawn_blocking(move || {
                preprocess::preprocess_file(&input, &output_dir, &settings)
            })
            .await
            .map_err(|e| RecognitionError::Failed(format!("preprocessing task failed: {e}")))??;
        }

        let text = self.run_tesseract(&input, &request.language).await?;
        debug!(
            "Tesseract read {} chars in {:?}",
            text.len(),
            start.elapsed()
        );

        Ok(text)
    }
}
