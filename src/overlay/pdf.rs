use anyhow::{Context, Result, anyhow};
use printpdf::{
    Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Pt, TextMatrix, TextRenderingMode,
};
use std::io::Cursor;

use crate::error::font_configuration;
use crate::ocr::{Direction, FontMetrics};

use super::{OverlayRenderer, PageSource, ProjectedPage, ProjectedRun};

const VERTICAL_GLYPH_ROTATION: f32 = -90.0;

/// Multi-page PDF: each page is the source image with an invisible text layer.
pub struct PdfOverlay {
    title: String,
    font_data: Vec<u8>,
    doc: Option<PdfDocumentReference>,
    font: Option<IndirectFontRef>,
    pages: usize,
}

impl PdfOverlay {
    pub fn new(title: impl Into<String>, font_data: &[u8]) -> Self {
        Self {
            title: title.into(),
            font_data: font_data.to_vec(),
            doc: None,
            font: None,
            pages: 0,
        }
    }

    /// Overlay embedding the face that `metrics` measures with.
    ///
    /// printpdf embeds the first face of a collection, so any other face of a
    /// `.ttc`/`.otc` file is refused.
    pub fn from_metrics(title: impl Into<String>, metrics: &FontMetrics) -> Result<Self> {
        embeddable_face(metrics.face_index())?;
        Ok(Self::new(title, metrics.data()))
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let doc = self.doc.ok_or_else(|| anyhow!("no pages to render"))?;
        let mut buffer = Vec::new();
        {
            let mut writer = std::io::BufWriter::new(&mut buffer);
            doc.save(&mut writer).with_context(|| "failed to write pdf")?;
        }
        Ok(buffer)
    }

    fn new_page(&mut self, width_pt: f32, height_pt: f32) -> Result<(PdfLayerReference, IndirectFontRef)> {
        let width = Mm(pt_to_mm(width_pt));
        let height = Mm(pt_to_mm(height_pt));
        let layer_name = format!("Page {}", self.pages + 1);
        let (page, layer) = match self.doc.as_ref() {
            Some(doc) => doc.add_page(width, height, layer_name),
            None => {
                let (doc, page, layer) = PdfDocument::new(&self.title, width, height, layer_name);
                let font = doc
                    .add_external_font(Cursor::new(self.font_data.clone()))
                    .map_err(|err| font_configuration(format!("failed to embed font: {}", err)))?;
                self.font = Some(font);
                self.doc = Some(doc);
                (page, layer)
            }
        };
        let doc = self.doc.as_ref().ok_or_else(|| anyhow!("pdf document missing"))?;
        let font = self.font.clone().ok_or_else(|| anyhow!("pdf font missing"))?;
        self.pages += 1;
        Ok((doc.get_page(page).get_layer(layer), font))
    }
}

impl OverlayRenderer for PdfOverlay {
    type Page = ();

    fn render(&mut self, page: &ProjectedPage, source: &PageSource<'_>) -> Result<()> {
        let context = &page.context;
        let image = printpdf::image_crate::load_from_memory(source.image_bytes)
            .with_context(|| format!("failed to decode page image: {}", source.image_href))?;
        let image = printpdf::image_crate::DynamicImage::ImageRgb8(image.to_rgb8());

        let (layer, font) = self.new_page(context.canvas_width, context.canvas_height)?;

        let placed = context.image_rect();
        let transform = ImageTransform {
            translate_x: Some(Mm(pt_to_mm(placed.x1))),
            translate_y: Some(Mm(pt_to_mm(context.canvas_height - placed.y2))),
            rotate: None,
            scale_x: Some(context.scale),
            scale_y: Some(context.scale),
            dpi: Some(72.0),
        };
        Image::from_dynamic_image(&image).add_to_layer(layer.clone(), transform);

        if page.runs.is_empty() {
            return Ok(());
        }
        layer.begin_text_section();
        layer.set_text_rendering_mode(TextRenderingMode::Invisible);
        for run in &page.runs {
            layer.set_font(&font, run.font_size);
            for (text, matrix) in text_placements(run, context.canvas_height) {
                layer.set_text_matrix(matrix);
                layer.write_text(text, &font);
            }
        }
        layer.end_text_section();
        Ok(())
    }
}

/// Text matrices in PDF space (y up), one per horizontal run or per vertical glyph.
fn text_placements(run: &ProjectedRun, canvas_height: f32) -> Vec<(String, TextMatrix)> {
    match run.direction {
        Direction::Horizontal => {
            let [x, y] = run.baseline;
            vec![(
                run.text.clone(),
                TextMatrix::Translate(Pt(x), Pt(canvas_height - y)),
            )]
        }
        Direction::Vertical => run
            .glyphs
            .iter()
            .map(|glyph| {
                (
                    glyph.text.clone(),
                    TextMatrix::TranslateRotate(
                        Pt(glyph.x),
                        Pt(canvas_height - glyph.y),
                        VERTICAL_GLYPH_ROTATION,
                    ),
                )
            })
            .collect(),
    }
}

fn embeddable_face(face_index: u32) -> Result<()> {
    if face_index != 0 {
        return Err(font_configuration(format!(
            "face {} of a font collection cannot be embedded in PDF output; use a single-face font file",
            face_index
        )));
    }
    Ok(())
}

fn pt_to_mm(pt: f32) -> f32 {
    let inches = pt / 72.0;
    inches * 25.4
}
