use anyhow::{Context, Result, anyhow};
use image::RgbImage;
use std::process::Command;
use tracing::{debug, warn};

use crate::ocr::TextFragment;

use super::parse::parse_hocr_fragments;
use super::{Analyzer, write_temp_png};

pub struct TesseractAnalyzer {
    languages: String,
    psm: u32,
    vertical_hint: bool,
}

impl TesseractAnalyzer {
    pub fn new(requested_languages: &str, psm: u32) -> Result<Self> {
        let languages = normalize_ocr_languages(requested_languages)?;
        let vertical_hint = languages.split('+').any(|lang| lang.ends_with("_vert"));
        Ok(Self {
            languages,
            psm,
            vertical_hint,
        })
    }
}

impl Analyzer for TesseractAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        let tmp = write_temp_png(image)?;
        let hocr = run_tesseract_hocr(tmp.path(), &self.languages, self.psm)?;
        let fragments = parse_hocr_fragments(&hocr, self.vertical_hint);
        debug!(
            "tesseract: {} fragment(s) (lang={}, psm={})",
            fragments.len(),
            self.languages,
            self.psm
        );
        Ok(fragments)
    }
}

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut langs = Vec::new();
    for (idx, line) in stdout.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let value = line.trim();
        if !value.is_empty() {
            langs.push(value.to_string());
        }
    }
    Ok(langs)
}

fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(split_languages(trimmed).join("+")),
    };

    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for lang in split_languages(trimmed) {
        if available.iter().any(|value| *value == lang) {
            chosen.push(lang);
        } else {
            missing.push(lang);
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

fn split_languages(value: &str) -> Vec<String> {
    value
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
        .collect()
}

fn run_tesseract_hocr(path: &std::path::Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string())
        .arg("hocr")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_mixed_language_separators() {
        assert_eq!(
            split_languages(" jpn+jpn_vert, eng "),
            vec!["jpn".to_string(), "jpn_vert".to_string(), "eng".to_string()]
        );
    }
}
