use anyhow::Result;

use crate::ocr::Direction;

use super::{OverlayRenderer, PageSource, ProjectedPage, ProjectedRun};

const DEFAULT_TITLE: &str = "Page";

const STYLE: &str = r#"    body { margin: 0; padding: 0; position: relative; }
    .background-layer { position: absolute; top: 0; left: 0; z-index: 1; }
    .text-layer { position: relative; color: transparent; z-index: 2; }
    .text-layer span { position: absolute; white-space: nowrap; line-height: 1; }"#;

/// Fixed-layout XHTML page: the image as background, transparent spans on top.
pub struct MarkupOverlay {
    language: String,
    font_family: String,
}

impl MarkupOverlay {
    pub fn new(language: impl Into<String>, font_family: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            font_family: font_family.into(),
        }
    }

    fn push_run(&self, out: &mut String, run: &ProjectedRun) {
        let mut styles = vec![
            format!("left: {}px", format_px(run.rect.x1)),
            format!("top: {}px", format_px(run.rect.y1)),
            format!("font-size: {:.2}px", run.font_size),
            format!("font-family: '{}', sans-serif", self.font_family),
        ];
        if run.direction == Direction::Vertical {
            styles.push("writing-mode: vertical-rl".to_string());
            styles.push("text-orientation: upright".to_string());
        }
        out.push_str(&format!(
            "    <span style=\"{}\">{}</span>\n",
            escape_attr(&styles.join("; ")),
            escape_text(&run.text)
        ));
    }
}

impl OverlayRenderer for MarkupOverlay {
    type Page = String;

    fn render(&mut self, page: &ProjectedPage, source: &PageSource<'_>) -> Result<String> {
        let context = &page.context;
        let width = format_px(context.canvas_width);
        let height = format_px(context.canvas_height);
        let image = context.image_rect();
        let lang = escape_attr(&self.language);
        let title = source
            .title
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_TITLE);

        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<!DOCTYPE html>\n");
        out.push_str(&format!(
            "<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"{lang}\" lang=\"{lang}\">\n"
        ));
        out.push_str("<head>\n");
        out.push_str("  <meta charset=\"UTF-8\"/>\n");
        out.push_str(&format!("  <title>{}</title>\n", escape_text(title)));
        out.push_str(&format!(
            "  <meta name=\"viewport\" content=\"width={width}, height={height}\"/>\n"
        ));
        out.push_str("  <style>\n");
        out.push_str(STYLE);
        out.push_str("\n  </style>\n");
        out.push_str("</head>\n");
        out.push_str("<body>\n");
        out.push_str("  <div class=\"background-layer\">\n");
        out.push_str(&format!(
            "    <img src=\"{}\" style=\"position: absolute; left: {}px; top: {}px;\" width=\"{}\" height=\"{}\" alt=\"\"/>\n",
            escape_attr(source.image_href),
            format_px(image.x1),
            format_px(image.y1),
            format_px(image.width()),
            format_px(image.height())
        ));
        out.push_str("  </div>\n");
        out.push_str(&format!(
            "  <div class=\"text-layer\" style=\"width: {width}px; height: {height}px;\">\n"
        ));
        for run in &page.runs {
            self.push_run(&mut out, run);
        }
        out.push_str("  </div>\n");
        out.push_str("</body>\n");
        out.push_str("</html>\n");
        Ok(out)
    }
}

/// Integral values print without a fraction, others with two decimals.
fn format_px(value: f32) -> String {
    if (value - value.round()).abs() < 0.005 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.2}", value)
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::Rect;
    use crate::overlay::PageContext;

    fn source<'a>(title: Option<&'a str>) -> PageSource<'a> {
        PageSource {
            title,
            image_href: "../images/p001.png",
            image_bytes: &[],
            image_mime: "image/png",
        }
    }

    fn run(text: &str, direction: Direction) -> ProjectedRun {
        ProjectedRun {
            text: text.to_string(),
            direction,
            font_size: 18.0,
            rect: Rect { x1: 100.0, y1: 100.0, x2: 180.5, y2: 130.0 },
            baseline: [100.0, 124.0],
            glyphs: Vec::new(),
        }
    }

    #[test]
    fn empty_page_has_background_only() {
        let mut overlay = MarkupOverlay::new("ja", "Noto Sans CJK JP");
        let page = ProjectedPage::empty(PageContext::identity(600, 800));
        let xhtml = overlay.render(&page, &source(None)).expect("render");
        assert!(xhtml.contains("<title>Page</title>"));
        assert!(xhtml.contains("content=\"width=600, height=800\""));
        assert!(xhtml.contains("src=\"../images/p001.png\""));
        assert!(!xhtml.contains("<span"));
        assert!(xhtml.trim_end().ends_with("</html>"));
    }

    #[test]
    fn spans_are_escaped_and_positioned() {
        let mut overlay = MarkupOverlay::new("ja", "Noto Sans CJK JP");
        let mut page = ProjectedPage::empty(PageContext::identity(600, 800));
        page.runs.push(run("A&B<C>", Direction::Horizontal));
        page.runs.push(run("縦書き", Direction::Vertical));
        let xhtml = overlay.render(&page, &source(Some("第一章 & 序"))).expect("render");
        assert!(xhtml.contains("<title>第一章 &amp; 序</title>"));
        assert!(xhtml.contains(">A&amp;B&lt;C&gt;</span>"));
        assert!(xhtml.contains("left: 100px; top: 100px; font-size: 18.00px"));
        assert_eq!(xhtml.matches("writing-mode: vertical-rl").count(), 1);
    }

    #[test]
    fn px_formatting() {
        assert_eq!(format_px(600.0), "600");
        assert_eq!(format_px(42.137), "42.14");
        assert_eq!(format_px(-3.0), "-3");
    }
}
