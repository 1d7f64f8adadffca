mod document;

pub use document::{
    DocumentMarkup, discover_documents, image_mime, ordered_documents, read_document_markup,
    resolve_image_path, spine_order,
};

use anyhow::{Context, Result};
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::packaging;

pub const MIMETYPE_ENTRY: &str = "mimetype";
pub const EPUB_MIME: &str = "application/epub+zip";

/// An archive unpacked into a working directory.
#[derive(Debug, Clone)]
pub struct ExtractedBook {
    pub root: PathBuf,
    /// File entries in archive order, `/`-separated.
    pub entries: Vec<String>,
    pub mimetype_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepackageSummary {
    pub entries: usize,
    pub mimetype_missing: bool,
}

pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<ExtractedBook> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| packaging(format!("failed to read zip archive: {}", err)))?;
    let mut entries = Vec::new();
    let mut mimetype_present = false;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|err| packaging(format!("failed to read zip entry: {}", err)))?;
        let Some(relative) = file.enclosed_name().map(|path| path.to_path_buf()) else {
            warn!("skipping unsafe archive entry: {}", file.name());
            continue;
        };
        let target = dest.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| packaging(format!("failed to create {}: {}", target.display(), err)))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| packaging(format!("failed to create {}: {}", parent.display(), err)))?;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|err| packaging(format!("failed to read zip entry content: {}", err)))?;
        fs::write(&target, &data)
            .map_err(|err| packaging(format!("failed to write {}: {}", target.display(), err)))?;

        let name = entry_name(&relative);
        if name == MIMETYPE_ENTRY {
            mimetype_present = true;
        }
        entries.push(name);
    }

    debug!("extracted {} entries into {}", entries.len(), dest.display());
    Ok(ExtractedBook {
        root: dest.to_path_buf(),
        entries,
        mimetype_present,
    })
}

/// Zips `entries` from `root`: `mimetype` first and stored, the rest deflated.
pub fn repackage<W: Write + Seek>(root: &Path, entries: &[String], output: W) -> Result<RepackageSummary> {
    let mut writer = ZipWriter::new(output);
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mimetype_missing = !entries.iter().any(|name| name == MIMETYPE_ENTRY);
    if mimetype_missing {
        warn!("archive has no mimetype entry; writing without the leading stored entry");
    } else {
        let data = read_entry(root, MIMETYPE_ENTRY)?;
        write_entry(&mut writer, MIMETYPE_ENTRY, stored, &data)?;
    }

    let mut count = usize::from(!mimetype_missing);
    for name in entries.iter().filter(|name| name.as_str() != MIMETYPE_ENTRY) {
        let data = read_entry(root, name)?;
        write_entry(&mut writer, name, deflated, &data)?;
        count += 1;
    }

    writer
        .finish()
        .map_err(|err| packaging(format!("failed to finalize zip output: {}", err)))?;
    Ok(RepackageSummary {
        entries: count,
        mimetype_missing,
    })
}

fn read_entry(root: &Path, name: &str) -> Result<Vec<u8>> {
    let path = root.join(name);
    fs::read(&path).map_err(|err| packaging(format!("failed to read {}: {}", path.display(), err)))
}

fn write_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    options: FileOptions,
    data: &[u8],
) -> Result<()> {
    writer
        .start_file(name, options)
        .map_err(|err| packaging(format!("failed to write zip entry {}: {}", name, err)))?;
    writer
        .write_all(data)
        .map_err(|err| packaging(format!("failed to write zip content {}: {}", name, err)))?;
    Ok(())
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// True when the bytes look like an EPUB container.
pub fn is_epub(bytes: &[u8]) -> bool {
    if let Some(kind) = infer::get(bytes) {
        if kind.mime_type() == EPUB_MIME {
            return true;
        }
    }
    let Ok(mut archive) = ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    let Ok(mut file) = archive.by_name(MIMETYPE_ENTRY) else {
        return false;
    };
    let mut value = String::new();
    file.read_to_string(&mut value).is_ok() && value.trim() == EPUB_MIME
}

/// Reads the container back as `(name, compression, bytes)` in entry order.
pub fn read_entries<R: Read + Seek>(reader: R) -> Result<Vec<(String, CompressionMethod, Vec<u8>)>> {
    let mut archive = ZipArchive::new(reader).with_context(|| "failed to read zip archive")?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).with_context(|| "failed to read zip entry")?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| "failed to read zip entry content")?;
        out.push((file.name().to_string(), file.compression(), data));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in entries {
            writer.start_file(*name, options).expect("start");
            writer.write_all(data).expect("write");
        }
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn round_trip_keeps_contents() {
        let input = build_zip(&[
            ("mimetype", EPUB_MIME.as_bytes()),
            ("META-INF/container.xml", b"<container/>"),
            ("OEBPS/p001.xhtml", b"<html/>"),
        ]);
        let dir = tempfile::tempdir().expect("tempdir");
        let book = extract_archive(&input, dir.path()).expect("extract");
        assert!(book.mimetype_present);
        assert_eq!(book.entries.len(), 3);

        let mut out = Cursor::new(Vec::new());
        let summary = repackage(&book.root, &book.entries, &mut out).expect("repackage");
        assert_eq!(summary.entries, 3);
        assert!(!summary.mimetype_missing);

        let original = read_entries(Cursor::new(input)).expect("input");
        let repacked = read_entries(Cursor::new(out.into_inner())).expect("output");
        assert_eq!(repacked[0].0, "mimetype");
        assert_eq!(repacked[0].1, CompressionMethod::Stored);
        assert!(repacked[1..].iter().all(|entry| entry.1 == CompressionMethod::Deflated));
        let strip = |entries: Vec<(String, CompressionMethod, Vec<u8>)>| {
            entries
                .into_iter()
                .map(|(name, _, data)| (name, data))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(original), strip(repacked));
    }

    #[test]
    fn mimetype_moves_to_front() {
        let input = build_zip(&[
            ("OEBPS/p001.xhtml", b"<html/>"),
            ("mimetype", EPUB_MIME.as_bytes()),
        ]);
        let dir = tempfile::tempdir().expect("tempdir");
        let book = extract_archive(&input, dir.path()).expect("extract");
        let mut out = Cursor::new(Vec::new());
        repackage(&book.root, &book.entries, &mut out).expect("repackage");
        let repacked = read_entries(Cursor::new(out.into_inner())).expect("output");
        assert_eq!(repacked[0].0, "mimetype");
        assert_eq!(repacked[1].0, "OEBPS/p001.xhtml");
    }

    #[test]
    fn missing_mimetype_is_flagged() {
        let input = build_zip(&[("OEBPS/p001.xhtml", b"<html/>")]);
        let dir = tempfile::tempdir().expect("tempdir");
        let book = extract_archive(&input, dir.path()).expect("extract");
        assert!(!book.mimetype_present);
        let mut out = Cursor::new(Vec::new());
        let summary = repackage(&book.root, &book.entries, &mut out).expect("repackage");
        assert!(summary.mimetype_missing);
        assert_eq!(summary.entries, 1);
    }

    #[test]
    fn garbage_is_a_packaging_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = extract_archive(b"not a zip", dir.path()).unwrap_err();
        let kind = err.downcast_ref::<crate::error::ConvertError>().expect("kind");
        assert!(matches!(kind, crate::error::ConvertError::Packaging(_)));
    }

    #[test]
    fn detects_epub_by_mimetype_entry() {
        let epub = build_zip(&[("mimetype", EPUB_MIME.as_bytes())]);
        assert!(is_epub(&epub));
        let plain = build_zip(&[("readme.txt", b"hi")]);
        assert!(!is_epub(&plain));
        assert!(!is_epub(b"\x89PNG\r\n\x1a\n"));
    }
}
