use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::furigana::FuriganaConfig;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngine {
    Tesseract,
    Command,
}

/// Destination canvas for each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    /// Canvas equals the image, scale 1.
    Image,
    /// A4 portrait, image letterboxed and centered.
    A4,
}

impl std::str::FromStr for PageSize {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(PageSize::Image),
            "a4" => Ok(PageSize::A4),
            other => Err(anyhow!(
                "unknown page size '{}' (expected image or a4)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub furigana: FuriganaConfig,
    pub ocr_engine: OcrEngine,
    pub ocr_languages: String,
    pub ocr_psm: u32,
    pub ocr_command: Option<Vec<String>>,
    pub ocr_jobs: usize,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub font_fallback: Vec<String>,
    pub page_size: PageSize,
    pub overlay_language: String,
    pub document_patterns: Vec<String>,
    pub strict: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            furigana: FuriganaConfig::default(),
            ocr_engine: OcrEngine::Tesseract,
            ocr_languages: "jpn+jpn_vert".to_string(),
            ocr_psm: 3,
            ocr_command: None,
            ocr_jobs: 0,
            font_path: None,
            font_family: None,
            font_fallback: Vec::new(),
            page_size: PageSize::Image,
            overlay_language: "ja".to_string(),
            document_patterns: vec![
                "**/*.xhtml".to_string(),
                "**/*.html".to_string(),
                "**/*.htm".to_string(),
            ],
            strict: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    furigana: Option<FuriganaSettings>,
    ocr: Option<OcrSettings>,
    font: Option<FontSettings>,
    overlay: Option<OverlaySettings>,
    epub: Option<EpubSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct FuriganaSettings {
    max_font_size: Option<f32>,
    max_minor_extent: Option<f32>,
    vertical_max_distance: Option<f32>,
    horizontal_max_distance: Option<f32>,
    min_overlap_ratio: Option<f32>,
    keep_unpaired: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    engine: Option<OcrEngine>,
    languages: Option<String>,
    psm: Option<u32>,
    command: Option<Vec<String>>,
    jobs: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    path: Option<String>,
    family: Option<String>,
    fallback: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySettings {
    page_size: Option<PageSize>,
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EpubSettings {
    document_patterns: Option<Vec<String>>,
    strict: Option<bool>,
}

/// Loads the embedded defaults, then every settings file that exists, in order.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            settings.merge_file(&path)?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(furigana) = incoming.furigana {
            let config = &mut self.furigana;
            if let Some(value) = furigana.max_font_size.filter(|v| *v > 0.0) {
                config.max_font_size = value;
            }
            if let Some(value) = furigana.max_minor_extent.filter(|v| *v > 0.0) {
                config.max_minor_extent = value;
            }
            if let Some(value) = furigana.vertical_max_distance.filter(|v| *v >= 0.0) {
                config.vertical_max_distance = value;
            }
            if let Some(value) = furigana.horizontal_max_distance.filter(|v| *v >= 0.0) {
                config.horizontal_max_distance = value;
            }
            if let Some(value) = furigana.min_overlap_ratio.filter(|v| (0.0..=1.0).contains(v)) {
                config.min_overlap_ratio = value;
            }
            if let Some(value) = furigana.keep_unpaired {
                config.keep_unpaired = value;
            }
        }
        if let Some(ocr) = incoming.ocr {
            if let Some(engine) = ocr.engine {
                self.ocr_engine = engine;
            }
            if let Some(languages) = ocr.languages {
                if !languages.trim().is_empty() {
                    self.ocr_languages = languages;
                }
            }
            if let Some(psm) = ocr.psm {
                self.ocr_psm = psm;
            }
            if let Some(command) = ocr.command {
                if !command.is_empty() {
                    self.ocr_command = Some(command);
                }
            }
            if let Some(jobs) = ocr.jobs {
                self.ocr_jobs = jobs;
            }
        }
        if let Some(font) = incoming.font {
            if let Some(path) = font.path {
                if !path.trim().is_empty() {
                    self.font_path = Some(path);
                }
            }
            if let Some(family) = font.family {
                if !family.trim().is_empty() {
                    self.font_family = Some(family);
                }
            }
            if let Some(fallback) = font.fallback {
                self.font_fallback = fallback;
            }
        }
        if let Some(overlay) = incoming.overlay {
            if let Some(page_size) = overlay.page_size {
                self.page_size = page_size;
            }
            if let Some(language) = overlay.language {
                if !language.trim().is_empty() {
                    self.overlay_language = language;
                }
            }
        }
        if let Some(epub) = incoming.epub {
            if let Some(patterns) = epub.document_patterns {
                if !patterns.is_empty() {
                    self.document_patterns = patterns;
                }
            }
            if let Some(strict) = epub.strict {
                self.strict = strict;
            }
        }
    }

    /// Worker pool size for analyzer calls.
    pub fn effective_jobs(&self) -> usize {
        if self.ocr_jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.ocr_jobs
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".searchable-epub-rust"))
        }
    })
}
