//! PDF ingestion CLI
//!
//! Runs the extraction service over files and prints one JSON document per
//! line (or plain text with `--text`), in the order the files were given.
//! Repeated files are served from the result cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use pdfingest_core::config::CONFIG_PATH_VAR;
use pdfingest_core::{ExtractionResult, ExtractionService, IngestConfig, IngestError, RawDocument};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pdfingest")]
#[command(version, about = "Extract text, metadata and page summaries from PDF files")]
struct Args {
    /// PDF files to extract
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// TOML configuration file (defaults to $PDFINGEST_CONFIG when set)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Print page text instead of JSON
    #[arg(long)]
    text: bool,

    /// Log at DEBUG level
    #[arg(short, long)]
    verbose: bool,
}

/// Outcome for one input file
#[derive(Debug)]
enum FileReport {
    Extracted(Arc<ExtractionResult>),
    Failed { kind: &'static str, message: String },
}

impl FileReport {
    fn from_outcome(outcome: Result<Arc<ExtractionResult>, IngestError>) -> Self {
        match outcome {
            Ok(result) => FileReport::Extracted(result),
            Err(e) => FileReport::Failed {
                kind: e.parse_error().map_or("CACHE", |p| p.kind()),
                message: e.to_string(),
            },
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, FileReport::Failed { .. })
    }

    fn to_json(&self, file: &Path) -> Value {
        match self {
            FileReport::Extracted(result) => json!({
                "file": file.display().to_string(),
                "result": &**result,
            }),
            FileReport::Failed { kind, message } => json!({
                "file": file.display().to_string(),
                "error": { "kind": kind, "message": message },
            }),
        }
    }

    fn to_text(&self, file: &Path) -> String {
        match self {
            FileReport::Extracted(result) => {
                let mut out = format!("==> {} ({} pages) <==\n", file.display(), result.page_count());
                for page in &result.pages {
                    out.push_str(&format!("--- page {} ---\n", page.page_number));
                    for line in &page.lines {
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                out
            }
            FileReport::Failed { kind, message } => {
                format!("==> {} <==\nerror [{}]: {}\n", file.display(), kind, message)
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // stdout carries results, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from))
}

fn read_document(path: &Path) -> Result<RawDocument> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(RawDocument::new(bytes).with_content_id(path.display().to_string()))
}

/// Extract every file on a small pool of scoped threads; reports come back
/// in input order
fn run_pool(service: &ExtractionService, files: &[PathBuf], workers: usize) -> Vec<FileReport> {
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|s| {
        for _ in 0..workers.clamp(1, files.len().max(1)) {
            let tx = tx.clone();
            let next = &next;
            s.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = files.get(index) else {
                    break;
                };
                let report = match read_document(path) {
                    Ok(document) => FileReport::from_outcome(service.extract_document(&document)),
                    Err(e) => FileReport::Failed {
                        kind: "IO",
                        message: format!("{:#}", e),
                    },
                };
                if tx.send((index, report)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut reports: Vec<(usize, FileReport)> = rx.into_iter().collect();
    reports.sort_by_key(|(index, _)| *index);
    reports.into_iter().map(|(_, report)| report).collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let path = config_path(args.config.clone());
    let config = IngestConfig::load(path.as_deref())?;
    tracing::info!(
        config = ?path,
        max_entries = config.cache.max_entries,
        workers = args.workers,
        "Starting pdfingest v{}",
        env!("CARGO_PKG_VERSION")
    );

    let service = ExtractionService::new(config);
    let reports = run_pool(&service, &args.files, args.workers);

    for (file, report) in args.files.iter().zip(&reports) {
        if args.text {
            print!("{}", report.to_text(file));
        } else {
            println!("{}", serde_json::to_string(&report.to_json(file))?);
        }
    }

    let stats = service.cache_stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        computations = stats.computations,
        entries = stats.entries,
        "Cache statistics"
    );

    let failed = reports.iter().filter(|r| r.is_failure()).count();
    if failed > 0 {
        bail!("{} of {} files failed", failed, reports.len());
    }
    Ok(())
}
