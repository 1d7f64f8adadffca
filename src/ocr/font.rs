use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use crate::error::font_configuration;

/// Rendered width of `text` at `font_size`, in the same unit as box coordinates.
pub trait MeasureWidth {
    fn measure_width(&self, text: &str, font_size: f32) -> f32;
}

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("face_index", &self.face_index)
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    /// Raw font file bytes. For a collection this is the whole collection.
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Face inside the collection that widths are measured with.
    pub fn face_index(&self) -> u32 {
        self.face_index
    }
}

impl MeasureWidth for FontMetrics {
    fn measure_width(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = Face::parse(&self.data, self.face_index) else {
            return 0.0;
        };
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            if ch == ' ' {
                advance = advance.saturating_add(self.space_advance as u32);
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(self.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        let units = self.units_per_em.max(1) as f32;
        advance as f32 * (font_size / units)
    }
}

const FIT_RATE_START: f32 = 0.50;
const FIT_RATE_STEP: f32 = 0.01;
const FIT_RATE_COUNT: usize = 50;

/// Largest-matching font size for `text`.
///
/// Candidates are `line_extent * rate` for rate 0.50..=0.99; the winner is the
/// first candidate whose rendered width is closest to `run_extent`. Horizontal
/// callers pass (box height, box width), vertical callers (box width, box height).
pub fn fit_font_size(
    text: &str,
    line_extent: f32,
    run_extent: f32,
    measure: &dyn MeasureWidth,
) -> f32 {
    let mut best_size = line_extent * FIT_RATE_START;
    let mut best_diff = f32::INFINITY;
    for step in 0..FIT_RATE_COUNT {
        let rate = FIT_RATE_START + FIT_RATE_STEP * step as f32;
        let size = line_extent * rate;
        let diff = (measure.measure_width(text, size) - run_extent).abs();
        if diff < best_diff {
            best_diff = diff;
            best_size = size;
        }
    }
    best_size
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(&data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

#[derive(Debug, Clone)]
pub struct ResolvedOverlayFont {
    pub metrics: FontMetrics,
    pub family: String,
}

/// Resolves the document font: explicit file, then a named family, then the
/// fallback families. Any failure is a font configuration error.
pub fn resolve_overlay_font(
    font_path: Option<&Path>,
    font_family: Option<&str>,
    fallback: &[String],
) -> Result<ResolvedOverlayFont> {
    if let Some(path) = font_path {
        let metrics = load_font_metrics(path).map_err(font_configuration)?;
        let family = metrics
            .family()
            .map(|name| name.to_string())
            .or_else(|| font_family.map(|name| name.to_string()))
            .unwrap_or_else(|| "sans-serif".to_string());
        return Ok(ResolvedOverlayFont { metrics, family });
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(family) = font_family {
        return load_font_metrics_from_family(&db, family).map_err(font_configuration);
    }

    for candidate in fallback {
        if let Ok(resolved) = load_font_metrics_from_family(&db, candidate) {
            return Ok(resolved);
        }
    }

    Err(font_configuration(format!(
        "no usable font found (tried: {})",
        fallback.join(", ")
    )))
}

fn load_font_metrics_from_data(data: &[u8], preferred_family: Option<&str>) -> Result<FontMetrics> {
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        if let Ok(face) = Face::parse(data, index) {
            let family = extract_family_name(&face);
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            let metrics = FontMetrics {
                data: Arc::new(data.to_vec()),
                units_per_em,
                space_advance,
                family: family.clone(),
                face_index: index,
            };
            if let (Some(preferred), Some(found)) = (preferred_family, &family) {
                if found.eq_ignore_ascii_case(preferred) {
                    return Ok(metrics);
                }
            }
            if fallback.is_none() {
                fallback = Some(metrics);
            }
        }
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

fn load_font_metrics_from_family(
    db: &fontdb::Database,
    family: &str,
) -> Result<ResolvedOverlayFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let metrics = load_font_metrics_from_data(&data, Some(family))?;
    let resolved_family = metrics
        .family()
        .map(|name| name.to_string())
        .unwrap_or_else(|| family.to_string());
    Ok(ResolvedOverlayFont {
        metrics,
        family: resolved_family,
    })
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::test_util::FixedAdvance;

    #[test]
    fn picks_size_whose_width_matches_run() {
        // 4 chars at advance 1.0 em: width = 4 * size, target 64 -> size 16 = 20 * 0.80
        let size = fit_font_size("かんぺき", 20.0, 64.0, &FixedAdvance(1.0));
        assert!((size - 16.0).abs() < 1e-3, "size={}", size);
    }

    #[test]
    fn clamps_to_largest_candidate_when_run_is_wide() {
        let size = fit_font_size("完璧", 30.0, 1000.0, &FixedAdvance(1.0));
        assert!((size - 30.0 * 0.99).abs() < 1e-3, "size={}", size);
    }

    #[test]
    fn ties_resolve_to_first_candidate() {
        // zero-width text: every candidate has the same diff
        let size = fit_font_size("", 40.0, 10.0, &FixedAdvance(1.0));
        assert!((size - 20.0).abs() < 1e-6, "size={}", size);
    }

    #[test]
    fn missing_font_file_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.ttf");
        let err = resolve_overlay_font(Some(&path), None, &[]).unwrap_err();
        let kind = err.downcast_ref::<ConvertError>().expect("convert error");
        assert!(matches!(kind, ConvertError::FontConfiguration(_)));
    }

    #[test]
    fn garbage_font_file_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").expect("write");
        let err = resolve_overlay_font(Some(&path), None, &[]).unwrap_err();
        assert!(err.to_string().contains("font configuration error"));
    }
}
