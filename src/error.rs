use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds surfaced by a document conversion.
///
/// Page-level kinds (`InvalidGeometry`, `ImageUnresolved`, `OcrFailure`) are
/// recorded in the report and never abort sibling pages. The remaining kinds
/// abort the whole document after cleanup.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("image unresolved: {reference} ({reason})")]
    ImageUnresolved { reference: String, reason: String },

    #[error("ocr failed for {image}: {message}")]
    OcrFailure { image: PathBuf, message: String },

    #[error("font configuration error: {0}")]
    FontConfiguration(String),

    #[error("packaging error: {0}")]
    Packaging(String),

    #[error("conversion cancelled ({pending} page(s) not started)")]
    Cancelled { pending: usize },
}

impl ConvertError {
    /// True for kinds that abort the whole document.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConvertError::FontConfiguration(_)
                | ConvertError::Packaging(_)
                | ConvertError::Cancelled { .. }
        )
    }
}

pub(crate) fn packaging(err: impl std::fmt::Display) -> anyhow::Error {
    ConvertError::Packaging(err.to_string()).into()
}

pub(crate) fn font_configuration(err: impl std::fmt::Display) -> anyhow::Error {
    ConvertError::FontConfiguration(err.to_string()).into()
}
