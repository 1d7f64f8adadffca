use std::collections::HashMap;

use anyhow::{Result, anyhow};
use image::RgbImage;

use crate::ocr::{Analyzer, MeasureWidth, TextFragment};

/// Every character advances by `self.0` em.
pub(crate) struct FixedAdvance(pub f32);

impl MeasureWidth for FixedAdvance {
    fn measure_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * self.0 * font_size
    }
}

/// Returns canned fragments keyed by image width, which the fixtures keep unique.
#[derive(Default)]
pub(crate) struct ScriptedAnalyzer {
    pages: HashMap<u32, Vec<TextFragment>>,
    failing: Vec<u32>,
}

impl ScriptedAnalyzer {
    pub fn with_page(mut self, width: u32, fragments: Vec<TextFragment>) -> Self {
        self.pages.insert(width, fragments);
        self
    }

    pub fn failing_on(mut self, width: u32) -> Self {
        self.failing.push(width);
        self
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        let width = image.width();
        if self.failing.contains(&width) {
            return Err(anyhow!("scripted failure for width {}", width));
        }
        Ok(self.pages.get(&width).cloned().unwrap_or_default())
    }
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, image::Rgb([250, 250, 250]));
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
