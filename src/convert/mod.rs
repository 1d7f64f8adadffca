mod report;

pub use report::{ConversionReport, PageOutcome, PageReport};

use anyhow::{Context, Result, anyhow};
use futures_util::stream::{self, StreamExt};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::epub::{self, ExtractedBook};
use crate::error::{ConvertError, packaging};
use crate::furigana::{classify_page, pair_fragments};
use crate::ocr::{Analyzer, FontMetrics, MeasureWidth, ResolvedOverlayFont, to_analyzer_rgb};
use crate::overlay::{
    DebugPage, MarkupOverlay, OcrDebugConfig, OverlayRenderer, PageContext, PageSource, PdfOverlay,
    ProjectedPage, project_page,
};
use crate::settings::{PageSize, Settings};

const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff", "gif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Epub,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Epub,
    Pdf,
}

pub fn detect_input_kind(path: &Path, bytes: &[u8]) -> Result<InputKind> {
    if epub::is_epub(bytes) || has_extension(path, &["epub"]) {
        return Ok(InputKind::Epub);
    }
    let sniffed_image = infer::get(bytes)
        .map(|kind| kind.mime_type().starts_with("image/"))
        .unwrap_or(false);
    if sniffed_image || has_extension(path, &IMAGE_EXTENSIONS) {
        return Ok(InputKind::Image);
    }
    Err(anyhow!(
        "unsupported input: {} (expected .epub or a page image)",
        path.display()
    ))
}

pub fn detect_output_kind(path: &Path) -> Result<OutputKind> {
    if has_extension(path, &["epub"]) {
        Ok(OutputKind::Epub)
    } else if has_extension(path, &["pdf"]) {
        Ok(OutputKind::Pdf)
    } else {
        Err(anyhow!(
            "unsupported output: {} (expected .epub or .pdf)",
            path.display()
        ))
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
        .unwrap_or(false)
}

/// One page ready for analysis.
#[derive(Debug, Clone)]
struct PagePlan {
    /// Position in reading order.
    ordinal: usize,
    label: String,
    document: Option<PathBuf>,
    image_path: PathBuf,
    image_href: String,
    title: Option<String>,
}

/// Analyzed page handed back to the committing task.
struct PageWork {
    plan: PagePlan,
    projected: ProjectedPage,
    image_bytes: Vec<u8>,
    image_mime: String,
    readings: usize,
    dropped: usize,
}

enum PageResult {
    Done(Box<PageWork>),
    Skipped { label: String, reason: String },
    Failed { label: String, cause: String },
    Cancelled { label: String },
}

/// Shared, read-only inputs of every page worker.
struct PageEnv {
    analyzer: Arc<dyn Analyzer>,
    measure: Arc<dyn MeasureWidth + Send + Sync>,
    settings: Settings,
    debug: Option<OcrDebugConfig>,
}

pub struct Converter {
    env: Arc<PageEnv>,
    font_family: String,
    /// Embeddable font; `None` disables PDF output.
    font: Option<FontMetrics>,
    cancel: Arc<AtomicBool>,
}

impl Converter {
    pub fn new(settings: Settings, analyzer: Arc<dyn Analyzer>, font: ResolvedOverlayFont) -> Self {
        let metrics = font.metrics.clone();
        let mut converter =
            Self::with_measure(settings, analyzer, Arc::new(font.metrics), font.family);
        converter.font = Some(metrics);
        converter
    }

    /// Converter measuring with `measure` and no embeddable font data, so PDF
    /// output is unavailable.
    pub fn with_measure(
        settings: Settings,
        analyzer: Arc<dyn Analyzer>,
        measure: Arc<dyn MeasureWidth + Send + Sync>,
        font_family: impl Into<String>,
    ) -> Self {
        Self {
            env: Arc::new(PageEnv {
                analyzer,
                measure,
                settings,
                debug: None,
            }),
            font_family: font_family.into(),
            font: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_debug_dir(mut self, dir: &Path) -> Result<Self> {
        let debug = OcrDebugConfig::new(dir)?;
        let env = Arc::get_mut(&mut self.env)
            .ok_or_else(|| anyhow!("debug output must be configured before converting"))?;
        env.debug = Some(debug);
        Ok(self)
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn convert(&self, input: &Path, output: &Path) -> Result<ConversionReport> {
        let bytes =
            fs::read(input).with_context(|| format!("failed to read input: {}", input.display()))?;
        let input_kind = detect_input_kind(input, &bytes)?;
        let output_kind = detect_output_kind(output)?;
        info!(
            "converting {} ({:?}) -> {} ({:?})",
            input.display(),
            input_kind,
            output.display(),
            output_kind
        );

        let title = input
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or("document")
            .to_string();
        match (input_kind, output_kind) {
            (InputKind::Epub, _) => self.convert_epub(&bytes, &title, output, output_kind).await,
            (InputKind::Image, OutputKind::Pdf) => self.convert_image(input, output).await,
            (InputKind::Image, OutputKind::Epub) => Err(anyhow!(
                "a page image can only be converted to .pdf"
            )),
        }
    }

    async fn convert_epub(
        &self,
        bytes: &[u8],
        title: &str,
        output: &Path,
        output_kind: OutputKind,
    ) -> Result<ConversionReport> {
        let workdir = tempfile::Builder::new()
            .prefix("searchable-epub-")
            .tempdir()
            .map_err(|err| packaging(format!("failed to create work dir: {}", err)))?;
        let book = epub::extract_archive(bytes, workdir.path())?;
        let documents = epub::ordered_documents(&book.root, &self.env.settings.document_patterns)?;
        info!("found {} document(s)", documents.len());

        let mut report = ConversionReport {
            mimetype_missing: !book.mimetype_present,
            ..ConversionReport::default()
        };
        let mut plans = Vec::new();
        for document in documents {
            match plan_document(&book, &document, plans.len()) {
                Ok(plan) => plans.push(plan),
                Err(reason) => {
                    let label = document_label(&document);
                    info!("skipped {}: {}", label, reason);
                    report.record(label, PageOutcome::Skipped { reason });
                }
            }
        }

        match output_kind {
            OutputKind::Epub => {
                let mut renderer =
                    MarkupOverlay::new(&self.env.settings.overlay_language, &self.font_family);
                self.run_pages(plans, PageSize::Image, &mut report, |work| {
                    let xhtml = renderer.render(&work.projected, &page_source(work))?;
                    let document = work
                        .plan
                        .document
                        .as_ref()
                        .ok_or_else(|| anyhow!("page has no document"))?;
                    let path = book.root.join(document);
                    fs::write(&path, xhtml).map_err(|err| {
                        packaging(format!("failed to write {}: {}", path.display(), err))
                    })?;
                    Ok(())
                })
                .await?;
                self.finish_report(&report)?;
                write_staged(output, |file| {
                    let summary = epub::repackage(&book.root, &book.entries, file)?;
                    debug!("repackaged {} entries", summary.entries);
                    Ok(())
                })?;
            }
            OutputKind::Pdf => {
                let mut renderer = self.pdf_renderer(title)?;
                let page_size = self.env.settings.page_size;
                self.run_pages(plans, page_size, &mut report, |work| {
                    renderer.render(&work.projected, &page_source(work))
                })
                .await?;
                self.finish_report(&report)?;
                write_pdf(output, renderer)?;
            }
        }
        info!("{}", report.summary_line());
        Ok(report)
    }

    async fn convert_image(&self, input: &Path, output: &Path) -> Result<ConversionReport> {
        let name = input
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("page")
            .to_string();
        let plan = PagePlan {
            ordinal: 0,
            label: name.clone(),
            document: None,
            image_path: input.to_path_buf(),
            image_href: name,
            title: input
                .file_stem()
                .and_then(|value| value.to_str())
                .map(|value| value.to_string()),
        };
        let mut report = ConversionReport::default();
        let mut renderer = self.pdf_renderer(&plan.image_href)?;
        let page_size = self.env.settings.page_size;
        self.run_pages(vec![plan], page_size, &mut report, |work| {
            renderer.render(&work.projected, &page_source(work))
        })
        .await?;
        self.finish_report(&report)?;
        write_pdf(output, renderer)?;
        info!("{}", report.summary_line());
        Ok(report)
    }

    fn pdf_renderer(&self, title: &str) -> Result<PdfOverlay> {
        let font = self.font.as_ref().ok_or_else(|| {
            ConvertError::FontConfiguration("PDF output needs an embeddable font file".to_string())
        })?;
        PdfOverlay::from_metrics(title, font)
    }

    /// Dispatches analysis on the worker pool and commits results in page order.
    async fn run_pages<F>(
        &self,
        plans: Vec<PagePlan>,
        page_size: PageSize,
        report: &mut ConversionReport,
        mut commit: F,
    ) -> Result<()>
    where
        F: FnMut(&PageWork) -> Result<()>,
    {
        let jobs = self.env.settings.effective_jobs();
        debug!("dispatching {} page(s) on {} worker(s)", plans.len(), jobs);
        let mut results = stream::iter(plans)
            .map(|plan| {
                let env = self.env.clone();
                let cancel = self.cancel.clone();
                async move {
                    if cancel.load(Ordering::SeqCst) {
                        return PageResult::Cancelled { label: plan.label };
                    }
                    let label = plan.label.clone();
                    tokio::task::spawn_blocking(move || analyze_page(&env, plan, page_size))
                        .await
                        .unwrap_or_else(|err| PageResult::Failed {
                            label,
                            cause: format!("page worker failed: {}", err),
                        })
                }
            })
            .buffered(jobs.max(1));

        while let Some(result) = results.next().await {
            match result {
                PageResult::Done(work) => {
                    let label = work.plan.label.clone();
                    match commit(work.as_ref()) {
                        Ok(()) => {
                            report.fragments_dropped += work.dropped;
                            info!(
                                "processed {}: {} run(s), {} reading(s) hidden",
                                label,
                                work.projected.runs.len(),
                                work.readings
                            );
                            report.record(
                                label,
                                PageOutcome::Processed {
                                    runs: work.projected.runs.len(),
                                    readings: work.readings,
                                },
                            );
                        }
                        Err(err) if is_fatal(&err) => return Err(err),
                        Err(err) => {
                            warn!("failed {}: {:#}", label, err);
                            report.record(label, PageOutcome::Failed { cause: format!("{:#}", err) });
                        }
                    }
                }
                PageResult::Skipped { label, reason } => {
                    info!("skipped {}: {}", label, reason);
                    report.record(label, PageOutcome::Skipped { reason });
                }
                PageResult::Failed { label, cause } => {
                    warn!("failed {}: {}", label, cause);
                    report.record(label, PageOutcome::Failed { cause });
                }
                PageResult::Cancelled { label } => {
                    report.record(label, PageOutcome::Cancelled);
                }
            }
        }
        Ok(())
    }

    fn finish_report(&self, report: &ConversionReport) -> Result<()> {
        if report.cancelled > 0 {
            return Err(ConvertError::Cancelled {
                pending: report.cancelled,
            }
            .into());
        }
        if self.env.settings.strict && report.failed > 0 {
            let causes = report
                .failures()
                .map(|(document, cause)| format!("{}: {}", document, cause))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(anyhow!("{} page(s) failed in strict mode ({})", report.failed, causes));
        }
        Ok(())
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ConvertError>()
        .map(ConvertError::is_fatal)
        .unwrap_or(false)
}

fn plan_document(
    book: &ExtractedBook,
    document: &Path,
    ordinal: usize,
) -> Result<PagePlan, String> {
    let path = book.root.join(document);
    let bytes = fs::read(&path).map_err(|err| format!("failed to read document: {}", err))?;
    let markup = epub::read_document_markup(&bytes);
    let Some(reference) = markup.image_reference else {
        return Err("no image reference".to_string());
    };
    let image_path = epub::resolve_image_path(&book.root, document, &reference)
        .map_err(|err| err.to_string())?;
    Ok(PagePlan {
        ordinal,
        label: document_label(document),
        document: Some(document.to_path_buf()),
        image_path,
        image_href: reference,
        title: markup.title,
    })
}

fn document_label(document: &Path) -> String {
    document.to_string_lossy().replace('\\', "/")
}

fn analyze_page(env: &PageEnv, plan: PagePlan, page_size: PageSize) -> PageResult {
    let image_bytes = match fs::read(&plan.image_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            let reason = ConvertError::ImageUnresolved {
                reference: plan.image_href.clone(),
                reason: err.to_string(),
            };
            return PageResult::Skipped {
                label: plan.label,
                reason: reason.to_string(),
            };
        }
    };
    let image = match image::load_from_memory(&image_bytes) {
        Ok(image) => image,
        Err(err) => {
            let reason = ConvertError::ImageUnresolved {
                reference: plan.image_href.clone(),
                reason: format!("failed to decode image: {}", err),
            };
            return PageResult::Skipped {
                label: plan.label,
                reason: reason.to_string(),
            };
        }
    };
    let rgb = to_analyzer_rgb(&image);
    let fragments = match env.analyzer.analyze(&rgb) {
        Ok(fragments) => fragments,
        Err(err) => {
            let cause = ConvertError::OcrFailure {
                image: plan.image_path.clone(),
                message: format!("{:#}", err),
            };
            return PageResult::Failed {
                label: plan.label,
                cause: cause.to_string(),
            };
        }
    };
    debug!("{}: {} fragment(s)", plan.label, fragments.len());

    let config = &env.settings.furigana;
    let (classified, dropped) = classify_page(fragments, env.measure.as_ref(), config);
    let units = pair_fragments(&classified, config);
    let readings = units.iter().filter(|unit| unit.reading.is_some()).count();
    let context = PageContext::for_page_size(rgb.width(), rgb.height(), page_size);
    let projected = project_page(&units, context);
    let image_mime = epub::image_mime(&plan.image_path, &image_bytes);

    if let Some(debug_config) = env.debug.as_ref() {
        let debug_page = DebugPage::new(&classified, &units);
        let label = debug_config.page_label(plan.ordinal, &plan.label);
        let source = PageSource {
            title: plan.title.as_deref(),
            image_href: &plan.image_href,
            image_bytes: &image_bytes,
            image_mime: &image_mime,
        };
        if let Err(err) =
            debug_config.write_page(&label, &debug_page, &source, rgb.width(), rgb.height())
        {
            warn!("failed to write debug output for {}: {:#}", plan.label, err);
        }
    }

    PageResult::Done(Box::new(PageWork {
        plan,
        projected,
        image_bytes,
        image_mime,
        readings,
        dropped,
    }))
}

fn page_source(work: &PageWork) -> PageSource<'_> {
    PageSource {
        title: work.plan.title.as_deref(),
        image_href: &work.plan.image_href,
        image_bytes: &work.image_bytes,
        image_mime: &work.image_mime,
    }
}

/// Writes next to `output` and moves into place only when `write` succeeds.
fn write_staged<F>(output: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut fs::File) -> Result<()>,
{
    let parent = output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .map_err(|err| packaging(format!("failed to stage output in {}: {}", parent.display(), err)))?;
    write(staged.as_file_mut())?;
    staged
        .as_file_mut()
        .flush()
        .map_err(|err| packaging(format!("failed to flush output: {}", err)))?;
    staged.persist(output).map_err(|err| {
        packaging(format!(
            "failed to move output into place at {}: {}",
            output.display(),
            err.error
        ))
    })?;
    Ok(())
}

fn write_pdf(output: &Path, renderer: PdfOverlay) -> Result<()> {
    if renderer.page_count() == 0 {
        return Err(packaging("no page images to render"));
    }
    let bytes = renderer.finish()?;
    write_staged(output, |file| {
        file.write_all(&bytes)
            .map_err(|err| packaging(format!("failed to write pdf: {}", err)))
    })
}
