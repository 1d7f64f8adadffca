use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::ConvertError;

/// What the driver needs from one document fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMarkup {
    pub image_reference: Option<String>,
    pub title: Option<String>,
}

/// Reads the first image reference and the title.
///
/// The XML pass tolerates mismatched end tags and unknown entities. When it
/// still fails, whatever it found so far is kept and the gaps are filled from
/// an HTML parse.
pub fn read_document_markup(bytes: &[u8]) -> DocumentMarkup {
    let (markup, failure) = read_markup_xml(bytes);
    let Some(err) = failure else {
        return markup;
    };
    debug!("xml parse failed, falling back to html: {}", err);
    let html = read_markup_html(bytes);
    DocumentMarkup {
        image_reference: markup.image_reference.or(html.image_reference),
        title: markup.title.or(html.title),
    }
}

fn html_entity(name: &str) -> Option<&'static str> {
    match name {
        "nbsp" => Some("\u{a0}"),
        "ensp" => Some("\u{2002}"),
        "emsp" => Some("\u{2003}"),
        "thinsp" => Some("\u{2009}"),
        "copy" => Some("\u{a9}"),
        "hellip" => Some("\u{2026}"),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        _ => None,
    }
}

fn read_markup_xml(bytes: &[u8]) -> (DocumentMarkup, Option<quick_xml::Error>) {
    let mut reader = Reader::from_reader(Cursor::new(bytes));
    reader.trim_text(false);
    reader.check_end_names(false);
    let mut buf = Vec::new();
    let mut markup = DocumentMarkup::default();
    let mut in_title = false;
    let mut title = String::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(err) => return (markup, Some(err)),
        };
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"title" && markup.title.is_none() {
                    in_title = true;
                } else if markup.image_reference.is_none() && (name == b"img" || name == b"image") {
                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref();
                        let wanted = match name {
                            b"img" => key == b"src",
                            _ => key == b"xlink:href" || key == b"href",
                        };
                        if !wanted {
                            continue;
                        }
                        let value = match attr.unescape_value_with(html_entity) {
                            Ok(value) => value.trim().to_string(),
                            Err(_) => String::from_utf8_lossy(&attr.value).trim().to_string(),
                        };
                        if !value.is_empty() {
                            markup.image_reference = Some(value);
                            break;
                        }
                    }
                }
            }
            Event::Text(e) => {
                if in_title {
                    match e.unescape_with(html_entity) {
                        Ok(text) => title.push_str(&text),
                        Err(_) => title.push_str(&String::from_utf8_lossy(&e)),
                    }
                }
            }
            Event::End(e) => {
                if in_title && e.local_name().as_ref() == b"title" {
                    in_title = false;
                    let value = title.trim();
                    if !value.is_empty() {
                        markup.title = Some(value.to_string());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    (markup, None)
}

fn read_markup_html(bytes: &[u8]) -> DocumentMarkup {
    use kuchiki::traits::*;

    let html = String::from_utf8_lossy(bytes);
    let document = kuchiki::parse_html().one(html.as_ref());
    let image_reference = document.select("img, image").ok().and_then(|mut nodes| {
        nodes.find_map(|node| {
            let wanted = if &*node.name.local == "img" { "src" } else { "href" };
            let attrs = node.attributes.borrow();
            attrs
                .map
                .iter()
                .find(|(name, _)| &*name.local == wanted)
                .map(|(_, attr)| attr.value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    });
    let title = document
        .select_first("title")
        .ok()
        .map(|node| node.as_node().text_contents().trim().to_string())
        .filter(|value| !value.is_empty());
    DocumentMarkup {
        image_reference,
        title,
    }
}

/// Resolves an image reference relative to its document, confined to `root`.
pub fn resolve_image_path(
    root: &Path,
    document: &Path,
    reference: &str,
) -> Result<PathBuf, ConvertError> {
    let unresolved = |reason: &str| ConvertError::ImageUnresolved {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = reference
        .split(['#', '?'])
        .next()
        .unwrap_or_default()
        .trim();
    if trimmed.is_empty() {
        return Err(unresolved("empty reference"));
    }
    if trimmed.contains("://") || trimmed.starts_with("data:") {
        return Err(unresolved("not a file inside the archive"));
    }
    let decoded = percent_decode(trimmed);
    let base = if decoded.starts_with('/') {
        PathBuf::new()
    } else {
        document.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let relative = normalize(&base.join(decoded.trim_start_matches('/')))
        .ok_or_else(|| unresolved("escapes the archive root"))?;
    let path = root.join(&relative);
    if !path.is_file() {
        return Err(unresolved("file not found"));
    }
    Ok(path)
}

fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Document fragments under `root` matching `patterns`, relative and sorted.
pub fn discover_documents(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let matcher = build_globset(patterns)?;
    let mut found = Vec::new();
    walk(root, root, &matcher, &mut found)?;
    found.sort();
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("invalid document pattern: {}", pattern))?;
        builder.add(glob);
    }
    builder.build().with_context(|| "failed to build document patterns")
}

fn walk(root: &Path, dir: &Path, matcher: &GlobSet, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read dir: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| "failed to read dir entry")?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, matcher, found)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if matcher.is_match(relative) {
            found.push(relative.to_path_buf());
        }
    }
    Ok(())
}

/// Reading order from `META-INF/container.xml` and the OPF spine, relative to `root`.
///
/// `None` when the book carries no usable container or package document.
pub fn spine_order(root: &Path) -> Result<Option<Vec<PathBuf>>> {
    let container = root.join("META-INF").join("container.xml");
    let Ok(container_xml) = fs::read(&container) else {
        return Ok(None);
    };
    let Some(rootfile) = find_rootfile(&container_xml)? else {
        return Ok(None);
    };
    let Some(opf_relative) = normalize(Path::new(&percent_decode(&rootfile))) else {
        return Ok(None);
    };
    let Ok(opf_xml) = fs::read(root.join(&opf_relative)) else {
        return Ok(None);
    };
    let opf_dir = opf_relative.parent().map(Path::to_path_buf).unwrap_or_default();

    let package = parse_package(&opf_xml)
        .with_context(|| format!("failed to parse package document: {}", opf_relative.display()))?;
    let mut order = Vec::new();
    for idref in package.spine {
        let Some(href) = package.manifest.get(&idref) else {
            continue;
        };
        let href = href.split('#').next().unwrap_or_default();
        if let Some(path) = normalize(&opf_dir.join(percent_decode(href))) {
            order.push(path);
        }
    }
    if order.is_empty() {
        return Ok(None);
    }
    Ok(Some(order))
}

/// Discovered documents, spine items first in spine order, the rest sorted.
pub fn ordered_documents(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let discovered = discover_documents(root, patterns)?;
    let Some(spine) = spine_order(root)? else {
        return Ok(discovered);
    };
    let mut ordered: Vec<PathBuf> = spine
        .into_iter()
        .filter(|path| discovered.contains(path))
        .collect();
    for path in discovered {
        if !ordered.contains(&path) {
            ordered.push(path);
        }
    }
    Ok(ordered)
}

fn find_rootfile(xml: &[u8]) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(Some(attr.unescape_value()?.into_owned()));
                    }
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

#[derive(Debug, Default)]
struct PackageDocument {
    manifest: HashMap<String, String>,
    spine: Vec<String>,
}

fn parse_package(xml: &[u8]) -> Result<PackageDocument> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    let mut buf = Vec::new();
    let mut package = PackageDocument::default();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    let mut id = None;
                    let mut href = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"id" => id = Some(attr.unescape_value()?.into_owned()),
                            b"href" => href = Some(attr.unescape_value()?.into_owned()),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        package.manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"idref" {
                            package.spine.push(attr.unescape_value()?.into_owned());
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(package)
}

/// MIME type of an image file, by content first, then extension.
pub fn image_mime(path: &Path, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        if kind.mime_type().starts_with("image/") {
            return kind.mime_type().to_string();
        }
    }
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_img_src_and_title() {
        let xhtml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title> 第一章 &amp; 序 </title></head>
<body><div><img src="../images/p001.jpg" alt=""/></div></body>
</html>"#;
        let markup = read_document_markup(xhtml.as_bytes());
        assert_eq!(markup.image_reference.as_deref(), Some("../images/p001.jpg"));
        assert_eq!(markup.title.as_deref(), Some("第一章 & 序"));
    }

    #[test]
    fn finds_svg_image_href() {
        let xhtml = br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:xlink="http://www.w3.org/1999/xlink">
<body><svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 600 800">
<image width="600" height="800" xlink:href="images/p002.png"/></svg></body></html>"#;
        let markup = read_document_markup(xhtml);
        assert_eq!(markup.image_reference.as_deref(), Some("images/p002.png"));
    }

    #[test]
    fn unclosed_void_element_keeps_svg_image() {
        let xhtml = br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:xlink="http://www.w3.org/1999/xlink">
<head><title>p</title></head>
<body><p>cover<br></p>
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 600 800">
<image width="600" height="800" xlink:href="images/p002.png"/></svg></body></html>"#;
        let markup = read_document_markup(xhtml);
        assert_eq!(markup.image_reference.as_deref(), Some("images/p002.png"));
        assert_eq!(markup.title.as_deref(), Some("p"));
    }

    #[test]
    fn html_entities_do_not_hide_svg_image() {
        let xhtml = br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:xlink="http://www.w3.org/1999/xlink">
<head><title>A&nbsp;B</title></head>
<body><svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 600 800">
<image width="600" height="800" xlink:href="images/p003.png"/></svg></body></html>"#;
        let markup = read_document_markup(xhtml);
        assert_eq!(markup.image_reference.as_deref(), Some("images/p003.png"));
        assert_eq!(markup.title.as_deref(), Some("A\u{a0}B"));
    }

    #[test]
    fn html_fallback_reads_svg_image_href() {
        let html = br#"<html><head><title>Tag soup</title></head><body><p>a &bogus; b
<svg viewBox="0 0 600 800"><image width="600" height="800" xlink:href="images/p004.png"></svg></body>"#;
        let markup = read_markup_html(html);
        assert_eq!(markup.image_reference.as_deref(), Some("images/p004.png"));
        assert_eq!(markup.title.as_deref(), Some("Tag soup"));
    }

    #[test]
    fn malformed_markup_falls_back_to_html_parser() {
        let html = b"<html><head><title>Loose</title></head><body><p>text<img src=\"a.png\"><br></body>";
        let markup = read_document_markup(html);
        assert_eq!(markup.image_reference.as_deref(), Some("a.png"));
        assert_eq!(markup.title.as_deref(), Some("Loose"));
    }

    #[test]
    fn document_without_image() {
        let xhtml = br#"<html xmlns="http://www.w3.org/1999/xhtml"><body><p>nav</p></body></html>"#;
        assert_eq!(read_document_markup(xhtml).image_reference, None);
    }

    #[test]
    fn resolves_relative_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("OEBPS/images")).expect("mkdir");
        fs::write(dir.path().join("OEBPS/images/p 1.png"), b"x").expect("write");
        let document = Path::new("OEBPS/text/p001.xhtml");
        let path = resolve_image_path(dir.path(), document, "../images/p%201.png#frag").expect("resolve");
        assert_eq!(path, dir.path().join("OEBPS/images/p 1.png"));
    }

    #[test]
    fn unresolvable_references_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = Path::new("OEBPS/p001.xhtml");
        for reference in ["missing.png", "../../../etc/passwd", "https://example.com/a.png", ""] {
            let err = resolve_image_path(dir.path(), document, reference).unwrap_err();
            assert!(matches!(err, ConvertError::ImageUnresolved { .. }), "{}", reference);
        }
    }

    #[test]
    fn spine_orders_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("META-INF")).expect("mkdir");
        fs::create_dir_all(root.join("OEBPS/text")).expect("mkdir");
        fs::write(
            root.join("META-INF/container.xml"),
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .expect("write");
        fs::write(
            root.join("OEBPS/content.opf"),
            br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="p1" href="text/b.xhtml" media-type="application/xhtml+xml"/>
    <item id="p2" href="text/a.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="p1"/><itemref idref="p2"/></spine>
</package>"#,
        )
        .expect("write");
        for name in ["a.xhtml", "b.xhtml", "c.xhtml"] {
            fs::write(root.join("OEBPS/text").join(name), b"<html/>").expect("write");
        }
        let patterns = vec!["**/*.xhtml".to_string()];
        let ordered = ordered_documents(root, &patterns).expect("order");
        assert_eq!(
            ordered,
            vec![
                PathBuf::from("OEBPS/text/b.xhtml"),
                PathBuf::from("OEBPS/text/a.xhtml"),
                PathBuf::from("OEBPS/text/c.xhtml"),
            ]
        );
    }

    #[test]
    fn discovery_without_spine_is_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("OEBPS")).expect("mkdir");
        for name in ["p2.html", "p1.xhtml", "style.css"] {
            fs::write(root.join("OEBPS").join(name), b"x").expect("write");
        }
        let patterns = vec!["**/*.xhtml".to_string(), "**/*.html".to_string()];
        let found = ordered_documents(root, &patterns).expect("discover");
        assert_eq!(
            found,
            vec![PathBuf::from("OEBPS/p1.xhtml"), PathBuf::from("OEBPS/p2.html")]
        );
    }

    #[test]
    fn image_mime_by_extension_fallback() {
        assert_eq!(image_mime(Path::new("a.PNG"), b""), "image/png");
        assert_eq!(image_mime(Path::new("a.jpg"), b""), "image/jpeg");
    }
}
