//! Image preprocessing before recognition
//!
//! Optional enhancements for faint or low-contrast prescriptions: contrast
//! stretch, grayscale conversion and integer upscaling. The result is written
//! as a PNG next to the caller's scratch files.

use std::path::{Path, PathBuf};
use tracing::debug;

use super::RecognitionError;
use crate::config::PreprocessSettings;

/// Largest upscale factor honored
const MAX_SCALE: u32 = 4;

/// Whether the settings change anything at all
pub fn is_active(settings: &PreprocessSettings) -> bool {
    settings.enabled
        && (settings.grayscale || (settings.contrast - 1.0).abs() > 0.01 || settings.scale > 1)
}

/// Preprocess the image at `input` and write the result into `output_dir`.
/// Returns the path of the processed PNG.
pub fn preprocess_file(
    input: &Path,
    output_dir: &Path,
    settings: &PreprocessSettings,
) -> Result<PathBuf, RecognitionError> {
    let image = image::open(input)?.to_rgba8();
    let (width, height) = image.dimensions();

    debug!(
        "Preprocessing {}x{} image: grayscale={}, contrast={}, scale={}",
        width, height, settings.grayscale, settings.contrast, settings.scale
    );

    let processed = apply_preprocessing(image, settings);
    let output = output_dir.join("preprocessed.png");
    processed.save_with_format(&output, image::ImageFormat::Png)?;

    Ok(output)
}

/// Apply the configured filters to an RGBA image
pub fn apply_preprocessing(image: image::RgbaImage, settings: &PreprocessSettings) -> image::RgbaImage {
    if !settings.enabled {
        return image;
    }

    // Upscale first so the other filters work on the final pixels
    let scale = settings.scale.clamp(1, MAX_SCALE);
    let mut image = if scale > 1 {
        let (width, height) = image.dimensions();
        image::imageops::resize(
            &image,
            width * scale,
            height * scale,
            image::imageops::FilterType::Triangle,
        )
    } else {
        image
    };

    if (settings.contrast - 1.0).abs() > 0.01 {
        apply_contrast(&mut image, settings.contrast);
    }

    if settings.grayscale {
        apply_grayscale(&mut image);
    }

    image
}

/// Stretch contrast around the midpoint. Alpha is left alone.
fn apply_contrast(image: &mut image::RgbaImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            let adjusted = ((*channel as f32 - 128.0) * factor + 128.0).clamp(0.0, 255.0);
            *channel = adjusted as u8;
        }
    }
}

/// Luminance grayscale, kept in RGBA layout
fn apply_grayscale(image: &mut image::RgbaImage) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let gray = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8;
        pixel.0[0] = gray;
        pixel.0[1] = gray;
        pixel.0[2] = gray;
    }
}
