mod command;
mod parse;
mod tesseract;
mod text;

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, RgbImage};
use std::io::Write;
use std::sync::Arc;

use crate::ocr::TextFragment;
use crate::settings::{OcrEngine, Settings};

pub use command::CommandAnalyzer;
pub use tesseract::{TesseractAnalyzer, list_tesseract_languages};

/// External text analyzer: an RGB bitmap in, fragments in detection order out.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<TextFragment>>;
}

pub fn build_analyzer(settings: &Settings) -> Result<Arc<dyn Analyzer>> {
    match settings.ocr_engine {
        OcrEngine::Tesseract => Ok(Arc::new(TesseractAnalyzer::new(
            &settings.ocr_languages,
            settings.ocr_psm,
        )?)),
        OcrEngine::Command => {
            let argv = settings
                .ocr_command
                .as_ref()
                .filter(|argv| !argv.is_empty())
                .ok_or_else(|| anyhow!("ocr.engine = \"command\" requires ocr.command"))?;
            Ok(Arc::new(CommandAnalyzer::new(argv.clone())))
        }
    }
}

/// Flattens any decoded image to RGB, compositing transparency over white.
pub fn to_analyzer_rgb(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let blend = |channel: u8| (channel as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        rgb.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

fn write_temp_png(image: &RgbImage) -> Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    image
        .write_to(&mut tmp, image::ImageFormat::Png)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush().ok();
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_pixels_become_white() {
        let mut rgba = image::RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, image::Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, image::Rgba([10, 20, 30, 255]));
        let rgb = to_analyzer_rgb(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn command_engine_requires_argv() {
        let settings = Settings {
            ocr_engine: OcrEngine::Command,
            ocr_command: None,
            ..Settings::default()
        };
        let err = build_analyzer(&settings).err().expect("error");
        assert!(err.to_string().contains("ocr.command"));
    }
}
