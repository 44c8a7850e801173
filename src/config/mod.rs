//! Application Configuration
//!
//! User settings and preferences stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of archived scans kept on disk
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 50;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Text recognition settings
    pub recognition: RecognitionSettings,
    /// Image acquisition settings
    pub acquisition: AcquisitionSettings,
    /// Scan archive settings
    pub archive: ArchiveSettings,
    /// Clipboard export settings
    pub clipboard: ClipboardSettings,
}

/// Recognition engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Language hint passed to the engine (tesseract language code)
    pub language: String,
    /// Upper bound for a single recognition run
    pub timeout_secs: u64,
    /// Tesseract executable
    pub tesseract_path: String,
    /// Poppler rasterizer used for PDF input
    pub pdftoppm_path: String,
    /// Image enhancement applied before recognition
    pub preprocess: PreprocessSettings,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            timeout_secs: 60,
            tesseract_path: "tesseract".to_string(),
            pdftoppm_path: "pdftoppm".to_string(),
            preprocess: PreprocessSettings::default(),
        }
    }
}

impl RecognitionSettings {
    /// Timeout as a duration (never zero)
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Image preprocessing before recognition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Enable preprocessing
    pub enabled: bool,
    /// Convert to grayscale
    pub grayscale: bool,
    /// Contrast factor (1.0 = unchanged)
    pub contrast: f32,
    /// Integer upscale factor (1 = unchanged)
    pub scale: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            grayscale: true,
            contrast: 1.0,
            scale: 1,
        }
    }
}

/// Image acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Reject files that are not a recognizable image or PDF
    pub validate_content: bool,
    /// Largest accepted input file
    pub max_file_bytes: u64,
    /// Where staged copies live (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            validate_content: true,
            max_file_bytes: 20 * 1024 * 1024,
            staging_dir: None,
        }
    }
}

/// Archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Maximum number of entries kept, newest first
    pub capacity: usize,
    /// Name of the durable record holding the archive
    pub record_key: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ARCHIVE_CAPACITY,
            record_key: "prescriptions".to_string(),
        }
    }
}

/// Clipboard export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardSettings {
    /// On Linux the copying process must keep serving the clipboard. Seconds
    /// to wait for another application to take it over (0 = do not wait).
    pub serve_secs: u64,
}

impl Default for ClipboardSettings {
    fn default() -> Self {
        Self { serve_secs: 30 }
    }
}

impl ClipboardSettings {
    pub fn serve_for(&self) -> Duration {
        Duration::from_secs(self.serve_secs)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.recognition.language, "eng");
        assert_eq!(config.recognition.timeout_secs, 60);
        assert_eq!(config.recognition.tesseract_path, "tesseract");
        assert!(!config.recognition.preprocess.enabled);
        assert_eq!(config.recognition.preprocess.scale, 1);

        assert!(config.acquisition.validate_content);
        assert_eq!(config.acquisition.max_file_bytes, 20 * 1024 * 1024);
        assert!(config.acquisition.staging_dir.is_none());

        assert_eq!(config.archive.capacity, 50);
        assert_eq!(config.archive.record_key, "prescriptions");

        assert_eq!(config.clipboard.serve_for(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.recognition.language, parsed.recognition.language);
        assert_eq!(config.acquisition.max_file_bytes, parsed.acquisition.max_file_bytes);
        assert_eq!(config.archive.capacity, parsed.archive.capacity);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[recognition]\nlanguage = \"deu\"\n").unwrap();

        assert_eq!(parsed.recognition.language, "deu");
        assert_eq!(parsed.recognition.timeout_secs, 60);
        assert_eq!(parsed.archive.capacity, 50);
    }

    #[test]
    fn test_clipboard_wait_can_be_disabled() {
        let parsed: AppConfig = toml::from_str("[clipboard]\nserve_secs = 0\n").unwrap();
        assert!(parsed.clipboard.serve_for().is_zero());
    }

    #[test]
    fn test_timeout_never_zero() {
        let mut settings = RecognitionSettings::default();
        settings.timeout_secs = 0;
        assert_eq!(settings.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.archive.capacity = 10;
        config.recognition.preprocess.enabled = true;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.archive.capacity, 10);
        assert!(loaded.recognition.preprocess.enabled);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
