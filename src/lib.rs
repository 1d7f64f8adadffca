use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

pub mod convert;
pub mod epub;
pub mod error;
pub mod furigana;
pub mod logging;
pub mod ocr;
pub mod overlay;
pub mod settings;

#[cfg(test)]
mod test_util;

pub use convert::{ConversionReport, Converter, PageOutcome, PageReport};
pub use error::ConvertError;
pub use settings::{PageSize, Settings};

const FONT_EXTENSIONS: [&str; 5] = ["ttf", "otf", "ttc", "otc", "woff"];

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Font file path or family name.
    pub font: Option<String>,
    pub settings_path: Option<String>,
    pub page_size: Option<PageSize>,
    pub jobs: Option<usize>,
    pub ocr_languages: Option<String>,
    pub debug_ocr: Option<PathBuf>,
    pub strict: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

pub async fn convert(config: Config) -> Result<ConversionReport> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    apply_overrides(&mut settings, &config);

    let font_path = settings.font_path.as_deref().map(Path::new);
    let font = ocr::resolve_overlay_font(
        font_path,
        settings.font_family.as_deref(),
        &settings.font_fallback,
    )?;
    info!("using font family {}", font.family);

    let analyzer = ocr::build_analyzer(&settings)?;
    let mut converter = Converter::new(settings, analyzer, font);
    if let Some(dir) = config.debug_ocr.as_deref() {
        converter = converter.with_debug_dir(dir)?;
    }
    if let Some(cancel) = config.cancel.clone() {
        converter = converter.with_cancel_flag(cancel);
    }
    converter.convert(&config.input, &config.output).await
}

fn apply_overrides(settings: &mut Settings, config: &Config) {
    if let Some(font) = config.font.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        if looks_like_font_file(font) {
            settings.font_path = Some(font.to_string());
            settings.font_family = None;
        } else {
            settings.font_path = None;
            settings.font_family = Some(font.to_string());
        }
    }
    if let Some(page_size) = config.page_size {
        settings.page_size = page_size;
    }
    if let Some(jobs) = config.jobs {
        settings.ocr_jobs = jobs;
    }
    if let Some(languages) = config
        .ocr_languages
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        settings.ocr_languages = languages.to_string();
    }
    if config.strict {
        settings.strict = true;
    }
}

fn looks_like_font_file(value: &str) -> bool {
    let path = Path::new(value);
    if path.is_file() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FONT_EXTENSIONS.iter().any(|want| ext.eq_ignore_ascii_case(want)))
        .unwrap_or(false)
}
