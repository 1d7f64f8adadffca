use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tiny_skia::Pixmap;
use usvg::{Options, Tree};

use crate::furigana::{AnnotationUnit, ClassifiedFragment};
use crate::ocr::{Direction, Rect};

use super::PageSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugRole {
    Base,
    Reading,
    UnpairedFurigana,
}

impl DebugRole {
    fn stroke(&self) -> &'static str {
        match self {
            DebugRole::Base => "#00c853",
            DebugRole::Reading => "#2962ff",
            DebugRole::UnpairedFurigana => "#ff6d00",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugFragment {
    pub index: usize,
    pub text: String,
    pub direction: Direction,
    pub rect: Rect,
    pub font_size: f32,
    pub role: DebugRole,
    /// Detection index of the base this reading is attached to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugPage {
    pub fragments: Vec<DebugFragment>,
}

impl DebugPage {
    pub fn new(classified: &[ClassifiedFragment], units: &[AnnotationUnit<'_>]) -> Self {
        let mut reading_of = std::collections::HashMap::new();
        let mut bases = HashSet::new();
        for unit in units {
            bases.insert(unit.base.index);
            if let Some(reading) = unit.reading {
                reading_of.insert(reading.index, unit.base.index);
            }
        }
        let fragments = classified
            .iter()
            .map(|item| {
                let base = reading_of.get(&item.index).copied();
                let role = if base.is_some() {
                    DebugRole::Reading
                } else if item.is_furigana {
                    DebugRole::UnpairedFurigana
                } else {
                    DebugRole::Base
                };
                DebugFragment {
                    index: item.index,
                    text: item.text.clone(),
                    direction: item.direction(),
                    rect: item.rect,
                    font_size: item.font_size,
                    role,
                    base,
                }
            })
            .collect();
        Self { fragments }
    }
}

/// Where per-page debug artifacts go.
#[derive(Debug, Clone)]
pub struct OcrDebugConfig {
    output_dir: PathBuf,
}

impl OcrDebugConfig {
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create debug dir: {}", output_dir.display()))?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn page_label(&self, page: usize, name: &str) -> String {
        format!("page{:03}_{}", page + 1, sanitize_filename_component(name))
    }

    pub fn output_path(&self, label: &str) -> PathBuf {
        self.output_dir.join(format!("{}_ocr_bbox.png", label))
    }

    pub fn json_path(&self, label: &str) -> PathBuf {
        self.output_dir.join(format!("{}_ocr.json", label))
    }

    pub fn write_page(
        &self,
        label: &str,
        page: &DebugPage,
        source: &PageSource<'_>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let json = serde_json::to_vec_pretty(page).with_context(|| "failed to encode debug json")?;
        let json_path = self.json_path(label);
        std::fs::write(&json_path, json)
            .with_context(|| format!("failed to write debug json: {}", json_path.display()))?;

        let svg = render_bbox_svg(source.image_bytes, source.image_mime, width, height, page);
        let png = render_svg_png(&svg)?;
        let png_path = self.output_path(label);
        std::fs::write(&png_path, png)
            .with_context(|| format!("failed to write debug image: {}", png_path.display()))?;
        Ok(())
    }
}

pub fn render_bbox_svg(
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    page: &DebugPage,
) -> String {
    let encoded = BASE64.encode(image_bytes);
    let data_uri = format!("data:{};base64,{}", image_mime, encoded);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));
    for fragment in &page.fragments {
        let rect = fragment.rect;
        svg.push_str(&format!(
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="none" stroke="{stroke}" stroke-width="2"/>"#,
            x = rect.x1,
            y = rect.y1,
            w = rect.width(),
            h = rect.height(),
            stroke = fragment.role.stroke()
        ));
    }
    svg.push_str("</svg>");
    svg
}

pub fn render_svg_png(svg: &str) -> Result<Vec<u8>> {
    let options = Options::default();
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .with_context(|| "failed to encode image from SVG")?;
    Ok(bytes)
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else if ch.is_whitespace() || ch == '.' || ch == '/' {
            out.push('_');
        }
    }
    if out.is_empty() {
        "page".to_string()
    } else {
        out
    }
}
