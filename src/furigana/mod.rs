mod pairing;

pub use pairing::{AnnotationUnit, pair_fragments};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConvertError;
use crate::ocr::{Direction, MeasureWidth, Rect, TextFragment, fit_font_size, is_kana_only, to_full_width};

/// Thresholds for furigana detection and pairing. Every comparison is strict.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FuriganaConfig {
    pub max_font_size: f32,
    pub max_minor_extent: f32,
    pub vertical_max_distance: f32,
    pub horizontal_max_distance: f32,
    pub min_overlap_ratio: f32,
    /// Unpaired furigana stays in the text layer as a base-only unit.
    pub keep_unpaired: bool,
}

impl Default for FuriganaConfig {
    fn default() -> Self {
        Self {
            max_font_size: 8.0,
            max_minor_extent: 12.0,
            vertical_max_distance: 50.0,
            horizontal_max_distance: 20.0,
            min_overlap_ratio: 0.5,
            keep_unpaired: true,
        }
    }
}

pub fn is_furigana(
    text: &str,
    font_size: f32,
    box_height: f32,
    box_width: f32,
    config: &FuriganaConfig,
) -> bool {
    font_size < config.max_font_size
        && is_kana_only(text)
        && box_height.min(box_width) < config.max_minor_extent
}

/// A fragment with its derived box, fitted size and role.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFragment {
    /// Position in analyzer detection order.
    pub index: usize,
    pub fragment: TextFragment,
    pub rect: Rect,
    /// Text as laid out: full-width normalized for vertical runs.
    pub text: String,
    pub font_size: f32,
    pub is_furigana: bool,
}

impl ClassifiedFragment {
    pub fn direction(&self) -> Direction {
        self.fragment.direction
    }
}

pub fn classify(
    index: usize,
    fragment: TextFragment,
    measure: &dyn MeasureWidth,
    config: &FuriganaConfig,
) -> Result<ClassifiedFragment, ConvertError> {
    let rect = fragment.rect()?;
    let (text, font_size) = match fragment.direction {
        Direction::Horizontal => {
            let size = fit_font_size(&fragment.text, rect.height(), rect.width(), measure);
            (fragment.text.clone(), size)
        }
        Direction::Vertical => {
            let text = to_full_width(&fragment.text);
            let size = fit_font_size(&text, rect.width(), rect.height(), measure);
            (text, size)
        }
    };
    let is_furigana = is_furigana(&text, font_size, rect.height(), rect.width(), config);
    Ok(ClassifiedFragment {
        index,
        fragment,
        rect,
        text,
        font_size,
        is_furigana,
    })
}

/// Classifies a page worth of fragments, keeping detection order.
///
/// Fragments with unusable geometry are left out; the second value counts them.
pub fn classify_page(
    fragments: Vec<TextFragment>,
    measure: &dyn MeasureWidth,
    config: &FuriganaConfig,
) -> (Vec<ClassifiedFragment>, usize) {
    let mut classified = Vec::with_capacity(fragments.len());
    let mut dropped = 0usize;
    for (index, fragment) in fragments.into_iter().enumerate() {
        if fragment.text.trim().is_empty() {
            dropped += 1;
            continue;
        }
        match classify(index, fragment, measure, config) {
            Ok(item) => classified.push(item),
            Err(err) => {
                debug!("dropping fragment {}: {}", index, err);
                dropped += 1;
            }
        }
    }
    (classified, dropped)
}
