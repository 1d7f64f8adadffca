use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use searchable_epub_rust::PageSize;

#[derive(Parser, Debug)]
#[command(
    name = "searchable-epub-rust",
    version,
    about = "Add an invisible, searchable text layer to image-based EPUB pages"
)]
struct Cli {
    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an EPUB (or a page image) into a searchable EPUB or PDF
    Convert {
        /// Input .epub or page image
        input: PathBuf,

        /// Output .epub or .pdf
        output: PathBuf,

        /// Font file or font family used for the text layer
        font: Option<String>,

        /// Destination canvas: image or a4
        #[arg(long = "page-size")]
        page_size: Option<PageSize>,

        /// Concurrent OCR workers (0 = CPU count)
        #[arg(short = 'j', long = "jobs")]
        jobs: Option<usize>,

        /// OCR languages (e.g. jpn+jpn_vert)
        #[arg(long = "ocr-languages")]
        ocr_languages: Option<String>,

        /// Write per-page OCR debug overlays into this directory
        #[arg(long = "debug-ocr")]
        debug_ocr: Option<PathBuf>,

        /// Fail the document when any page fails
        #[arg(long = "strict")]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    searchable_epub_rust::logging::init(cli.verbose)?;
    let Command::Convert {
        input,
        output,
        font,
        page_size,
        jobs,
        ocr_languages,
        debug_ocr,
        strict,
    } = cli.command;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling: waiting for running pages to finish");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let report = searchable_epub_rust::convert(searchable_epub_rust::Config {
        input,
        output,
        font,
        settings_path: cli.read_settings,
        page_size,
        jobs,
        ocr_languages,
        debug_ocr,
        strict,
        cancel: Some(cancel),
    })
    .await?;

    println!("{}", report.summary_line());
    Ok(())
}
