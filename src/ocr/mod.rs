mod engine;
mod font;
mod geom;
mod script;

pub use engine::{
    Analyzer, CommandAnalyzer, TesseractAnalyzer, build_analyzer, list_tesseract_languages,
    to_analyzer_rgb,
};
pub use font::{
    FontMetrics, MeasureWidth, ResolvedOverlayFont, fit_font_size, load_font_metrics,
    resolve_overlay_font,
};
pub use geom::{Rect, overlap_ratio, rect_from_polygon};
pub use script::{is_kana_only, to_full_width};

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Horizontal,
    Vertical,
}

/// One span detected by the analyzer, in source image pixel space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFragment {
    pub points: Vec<[f32; 2]>,
    pub text: String,
    pub direction: Direction,
}

impl TextFragment {
    pub fn new(points: Vec<[f32; 2]>, text: impl Into<String>, direction: Direction) -> Self {
        Self {
            points,
            text: text.into(),
            direction,
        }
    }

    /// Axis-aligned fragment from `(x1, y1)`-`(x2, y2)`.
    pub fn from_rect(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        text: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self::new(
            vec![[x1, y1], [x2, y1], [x2, y2], [x1, y2]],
            text,
            direction,
        )
    }

    pub fn rect(&self) -> Result<Rect, ConvertError> {
        rect_from_polygon(&self.points)
    }
}
