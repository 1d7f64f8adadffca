mod debug;
mod markup;
mod pdf;

pub use debug::{DebugFragment, DebugPage, DebugRole, OcrDebugConfig, render_bbox_svg, render_svg_png};
pub use markup::MarkupOverlay;
pub use pdf::PdfOverlay;

use anyhow::Result;

use crate::furigana::AnnotationUnit;
use crate::ocr::{Direction, Rect};
use crate::settings::PageSize;

/// A4 portrait in PDF points.
pub const A4_WIDTH_PT: f32 = 595.28;
pub const A4_HEIGHT_PT: f32 = 841.89;

/// Source image frame, destination canvas frame and the mapping between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageContext {
    pub image_width: u32,
    pub image_height: u32,
    pub canvas_width: f32,
    pub canvas_height: f32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl PageContext {
    /// Canvas equals the image: scale 1, no offset.
    pub fn identity(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            canvas_width: image_width as f32,
            canvas_height: image_height as f32,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Fits the image into a fixed canvas, preserving aspect ratio, centered.
    pub fn fitted(image_width: u32, image_height: u32, canvas_width: f32, canvas_height: f32) -> Self {
        let iw = image_width.max(1) as f32;
        let ih = image_height.max(1) as f32;
        let scale = (canvas_width / iw).min(canvas_height / ih);
        Self {
            image_width,
            image_height,
            canvas_width,
            canvas_height,
            scale,
            offset_x: (canvas_width - iw * scale) / 2.0,
            offset_y: (canvas_height - ih * scale) / 2.0,
        }
    }

    pub fn for_page_size(image_width: u32, image_height: u32, page_size: PageSize) -> Self {
        match page_size {
            PageSize::Image => Self::identity(image_width, image_height),
            PageSize::A4 => Self::fitted(image_width, image_height, A4_WIDTH_PT, A4_HEIGHT_PT),
        }
    }

    pub fn project_x(&self, x: f32) -> f32 {
        x * self.scale + self.offset_x
    }

    pub fn project_y(&self, y: f32) -> f32 {
        y * self.scale + self.offset_y
    }

    pub fn project_rect(&self, rect: &Rect) -> Rect {
        Rect {
            x1: self.project_x(rect.x1),
            y1: self.project_y(rect.y1),
            x2: self.project_x(rect.x2),
            y2: self.project_y(rect.y2),
        }
    }

    /// Where the background image lands on the canvas.
    pub fn image_rect(&self) -> Rect {
        self.project_rect(&Rect {
            x1: 0.0,
            y1: 0.0,
            x2: self.image_width as f32,
            y2: self.image_height as f32,
        })
    }
}

/// One glyph of a vertical run; origin in y-down canvas space.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedGlyph {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

/// A base text run in canvas space.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRun {
    pub text: String,
    pub direction: Direction,
    pub font_size: f32,
    pub rect: Rect,
    /// Horizontal baseline origin, y-down.
    pub baseline: [f32; 2],
    /// Per-glyph origins, top to bottom. Empty for horizontal runs.
    pub glyphs: Vec<PlacedGlyph>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedPage {
    pub context: PageContext,
    pub runs: Vec<ProjectedRun>,
}

impl ProjectedPage {
    pub fn empty(context: PageContext) -> Self {
        Self {
            context,
            runs: Vec::new(),
        }
    }
}

/// Background and metadata shared by every renderer.
pub struct PageSource<'a> {
    pub title: Option<&'a str>,
    /// Image reference as written in the output document.
    pub image_href: &'a str,
    /// Encoded source image, untouched.
    pub image_bytes: &'a [u8],
    pub image_mime: &'a str,
}

/// Serializes projected pages into one output format.
pub trait OverlayRenderer {
    type Page;

    fn render(&mut self, page: &ProjectedPage, source: &PageSource<'_>) -> Result<Self::Page>;
}

/// Maps annotation units into canvas space. Readings never produce a run.
pub fn project_page(units: &[AnnotationUnit<'_>], context: PageContext) -> ProjectedPage {
    let runs = units
        .iter()
        .map(|unit| project_run(unit, &context))
        .collect();
    ProjectedPage { context, runs }
}

fn project_run(unit: &AnnotationUnit<'_>, context: &PageContext) -> ProjectedRun {
    let base = unit.base;
    let rect = context.project_rect(&base.rect);
    let font_size = base.font_size * context.scale;
    let direction = base.direction();
    let baseline = [rect.x1, rect.y1 + (rect.height() + font_size) / 2.0];
    let glyphs = match direction {
        Direction::Horizontal => Vec::new(),
        Direction::Vertical => base
            .text
            .chars()
            .enumerate()
            .map(|(j, ch)| PlacedGlyph {
                text: ch.to_string(),
                x: rect.x1 + font_size * 0.5,
                y: rect.y1 + j as f32 * font_size,
            })
            .collect(),
    };
    ProjectedRun {
        text: base.text.clone(),
        direction,
        font_size,
        rect,
        baseline,
        glyphs,
    }
}
