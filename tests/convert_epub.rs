use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use image::RgbImage;
use searchable_epub_rust::epub::{self, EPUB_MIME};
use searchable_epub_rust::ocr::{Analyzer, Direction, MeasureWidth, TextFragment};
use searchable_epub_rust::{Converter, PageOutcome, Settings};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

const CONTENT_OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml"/>
    <item id="p1" href="p001.xhtml" media-type="application/xhtml+xml"/>
    <item id="p2" href="p002.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="nav"/>
    <itemref idref="p2"/>
    <itemref idref="p1"/>
  </spine>
</package>"#;

const NAV_XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>目次</title></head><body><p>目次</p></body></html>"#;

/// Each glyph advances by one em.
struct FullWidthMeasure;

impl MeasureWidth for FullWidthMeasure {
    fn measure_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * font_size
    }
}

/// Canned fragments keyed by image width.
#[derive(Default)]
struct WidthKeyedAnalyzer {
    pages: HashMap<u32, Vec<TextFragment>>,
}

impl Analyzer for WidthKeyedAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        self.pages
            .get(&image.width())
            .cloned()
            .ok_or_else(|| anyhow!("no scripted page for width {}", image.width()))
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn page_xhtml(title: &str, image: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{}</title></head>
<body><div><img src="{}" alt="page"/></div></body>
</html>"#,
        title, image
    )
}

fn build_book(with_mimetype: bool, with_pages: bool) -> Vec<u8> {
    let mut entries: Vec<(String, Vec<u8>)> = vec![
        ("META-INF/container.xml".to_string(), CONTAINER_XML.as_bytes().to_vec()),
        ("OEBPS/content.opf".to_string(), CONTENT_OPF.as_bytes().to_vec()),
        ("OEBPS/nav.xhtml".to_string(), NAV_XHTML.as_bytes().to_vec()),
    ];
    if with_pages {
        entries.push((
            "OEBPS/p001.xhtml".to_string(),
            page_xhtml("一", "images/p001.png").into_bytes(),
        ));
        entries.push((
            "OEBPS/p002.xhtml".to_string(),
            page_xhtml("二", "./images/p002.png").into_bytes(),
        ));
        entries.push(("OEBPS/images/p001.png".to_string(), png(320, 480)));
        entries.push(("OEBPS/images/p002.png".to_string(), png(330, 480)));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    if with_mimetype {
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("mimetype", stored).expect("start mimetype");
        writer.write_all(EPUB_MIME.as_bytes()).expect("write mimetype");
    }
    for (name, data) in entries {
        writer
            .start_file(name, FileOptions::default())
            .expect("start entry");
        writer.write_all(&data).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn scripted_analyzer() -> WidthKeyedAnalyzer {
    let mut pages = HashMap::new();
    pages.insert(
        320,
        vec![
            TextFragment::from_rect(40.0, 52.0, 120.0, 60.0, "かんぺき", Direction::Horizontal),
            TextFragment::from_rect(40.0, 64.0, 120.0, 96.0, "完璧", Direction::Horizontal),
            TextFragment::from_rect(40.0, 200.0, 280.0, 230.0, "今日は晴れ。", Direction::Horizontal),
        ],
    );
    pages.insert(
        330,
        vec![
            TextFragment::from_rect(262.0, 40.0, 270.0, 120.0, "しょせき", Direction::Vertical),
            TextFragment::from_rect(230.0, 40.0, 260.0, 120.0, "書籍", Direction::Vertical),
        ],
    );
    WidthKeyedAnalyzer { pages }
}

fn converter(analyzer: WidthKeyedAnalyzer) -> Converter {
    let settings = Settings {
        ocr_jobs: 1,
        ..Settings::default()
    };
    Converter::with_measure(settings, Arc::new(analyzer), Arc::new(FullWidthMeasure), "Test Sans")
}

fn entry_map(path: &Path) -> Vec<(String, CompressionMethod, Vec<u8>)> {
    epub::read_entries(fs::File::open(path).expect("open output")).expect("read output")
}

fn entry_text(entries: &[(String, CompressionMethod, Vec<u8>)], name: &str) -> String {
    let entry = entries
        .iter()
        .find(|entry| entry.0 == name)
        .unwrap_or_else(|| panic!("missing entry {}", name));
    String::from_utf8(entry.2.clone()).expect("utf8")
}

#[tokio::test]
async fn converts_book_with_hidden_readings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("book.epub");
    let output = dir.path().join("searchable.epub");
    fs::write(&input, build_book(true, true)).expect("write input");

    let report = converter(scripted_analyzer())
        .convert(&input, &output)
        .await
        .expect("convert");

    assert_eq!(report.summary_line(), "processed=2 skipped=1 failed=0");
    let processed: Vec<&str> = report
        .pages
        .iter()
        .filter(|page| matches!(page.outcome, PageOutcome::Processed { .. }))
        .map(|page| page.document.as_str())
        .collect();
    assert_eq!(processed, vec!["OEBPS/p002.xhtml", "OEBPS/p001.xhtml"]);

    let entries = entry_map(&output);
    assert_eq!(entries[0].0, "mimetype");
    assert_eq!(entries[0].1, CompressionMethod::Stored);
    assert!(entries[1..].iter().all(|entry| entry.1 == CompressionMethod::Deflated));

    let first = entry_text(&entries, "OEBPS/p001.xhtml");
    assert!(first.contains("<title>一</title>"));
    assert!(first.contains(">完璧</span>"));
    assert!(first.contains(">今日は晴れ。</span>"));
    assert!(!first.contains("かんぺき"));
    assert!(first.contains("src=\"images/p001.png\""));

    let second = entry_text(&entries, "OEBPS/p002.xhtml");
    assert!(second.contains(">書籍</span>"));
    assert!(second.contains("writing-mode: vertical-rl"));
    assert!(!second.contains("しょせき"));

    assert_eq!(entry_text(&entries, "OEBPS/nav.xhtml"), NAV_XHTML);
    let original = png(320, 480);
    let image = entries
        .iter()
        .find(|entry| entry.0 == "OEBPS/images/p001.png")
        .expect("image entry");
    assert_eq!(image.2, original);
}

#[tokio::test]
async fn book_without_images_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("book.epub");
    let output = dir.path().join("out.epub");
    let book = build_book(true, false);
    fs::write(&input, &book).expect("write input");

    let report = converter(WidthKeyedAnalyzer::default())
        .convert(&input, &output)
        .await
        .expect("convert");
    assert_eq!(report.processed, 0);
    assert_eq!(report.skipped, 1);

    let strip = |entries: Vec<(String, CompressionMethod, Vec<u8>)>| {
        entries
            .into_iter()
            .map(|(name, _, data)| (name, data))
            .collect::<Vec<_>>()
    };
    let original = strip(epub::read_entries(Cursor::new(book)).expect("input entries"));
    assert_eq!(strip(entry_map(&output)), original);
}

#[tokio::test]
async fn missing_mimetype_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("book.epub");
    let output = dir.path().join("out.epub");
    fs::write(&input, build_book(false, true)).expect("write input");

    let report = converter(scripted_analyzer())
        .convert(&input, &output)
        .await
        .expect("convert");
    assert!(report.mimetype_missing);
    assert!(report.summary_line().ends_with("mimetype=missing"));
    let entries = entry_map(&output);
    assert!(entries.iter().all(|entry| entry.0 != "mimetype"));
}

#[tokio::test]
async fn failed_page_keeps_original_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("book.epub");
    let output = dir.path().join("out.epub");
    fs::write(&input, build_book(true, true)).expect("write input");

    let mut analyzer = scripted_analyzer();
    analyzer.pages.remove(&330);
    let report = converter(analyzer)
        .convert(&input, &output)
        .await
        .expect("convert");
    assert_eq!(report.failed, 1);
    let (document, cause) = report.failures().next().expect("failure");
    assert_eq!(document, "OEBPS/p002.xhtml");
    assert!(cause.contains("no scripted page"));

    let entries = entry_map(&output);
    assert_eq!(
        entry_text(&entries, "OEBPS/p002.xhtml"),
        page_xhtml("二", "./images/p002.png")
    );
}
