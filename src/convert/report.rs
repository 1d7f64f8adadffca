use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    Processed { runs: usize, readings: usize },
    Skipped { reason: String },
    Failed { cause: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageReport {
    /// Document fragment path inside the book, or the input image name.
    pub document: String,
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Fragments left out of the text layer because of unusable geometry.
    pub fragments_dropped: usize,
    pub mimetype_missing: bool,
    pub pages: Vec<PageReport>,
}

impl ConversionReport {
    pub fn record(&mut self, document: impl Into<String>, outcome: PageOutcome) {
        match &outcome {
            PageOutcome::Processed { .. } => self.processed += 1,
            PageOutcome::Skipped { .. } => self.skipped += 1,
            PageOutcome::Failed { .. } => self.failed += 1,
            PageOutcome::Cancelled => self.cancelled += 1,
        }
        self.pages.push(PageReport {
            document: document.into(),
            outcome,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pages.iter().filter_map(|page| match &page.outcome {
            PageOutcome::Failed { cause } => Some((page.document.as_str(), cause.as_str())),
            _ => None,
        })
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "processed={} skipped={} failed={}",
            self.processed, self.skipped, self.failed
        );
        if self.cancelled > 0 {
            line.push_str(&format!(" cancelled={}", self.cancelled));
        }
        if self.mimetype_missing {
            line.push_str(" mimetype=missing");
        }
        line
    }
}
