//! The `pixvault import` command: run one import job locally.

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use pixvault_core::config::StorageBackend;
use pixvault_core::{
    Config, ImportRequest, JobKind, JobSnapshot, JobState, OutcomeEntry, OutputFormat,
    OutputWriter, Pixvault,
};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Image file, zip archive, or http(s) URL
    #[arg(required = true)]
    pub source: String,

    /// Import kind (guessed from the source when omitted)
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Title for a single upload
    #[arg(long)]
    pub title: Option<String>,

    /// Cap on images taken from a crawl
    #[arg(long)]
    pub max_images: Option<usize>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: FormatArg,

    /// Include the per-item outcome log
    #[arg(long)]
    pub outcomes: bool,

    /// Keep nothing on disk
    #[arg(long)]
    pub memory: bool,

    /// Worker pool size (overrides config)
    #[arg(short, long)]
    pub parallel: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum KindArg {
    Upload,
    Archive,
    Crawl,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Upload => JobKind::SingleUpload,
            KindArg::Archive => JobKind::ArchiveImport,
            KindArg::Crawl => JobKind::UrlCrawl,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FormatArg {
    /// One JSON document
    Json,
    /// Snapshot line followed by one line per outcome
    Jsonl,
}

#[derive(Serialize)]
struct ImportReport<'a> {
    job: &'a JobSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcomes: Option<&'a [OutcomeEntry]>,
}

/// Turn the CLI source argument into a request.
fn build_request(args: &ImportArgs) -> ImportRequest {
    let is_url = args.source.starts_with("http://") || args.source.starts_with("https://");
    let location = if is_url {
        args.source.clone()
    } else {
        shellexpand::tilde(&args.source).into_owned()
    };

    let mut request =
        ImportRequest::from_location(&location, args.kind.map(JobKind::from), args.title.clone());
    if let ImportRequest::UrlCrawl { max_images, .. } = &mut request {
        *max_images = args.max_images;
    }
    request
}

pub async fn execute(args: ImportArgs) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    if let Some(parallel) = args.parallel {
        config.workers.pool_size = parallel;
    }

    let request = build_request(&args);
    let pixvault = Pixvault::new(config).await?;
    let start = Instant::now();
    let job = pixvault.submit(request).await?;
    tracing::info!("Started job {}", job);

    let progress = create_progress_bar();
    if let Some(mut rx) = pixvault.subscribe(job) {
        let pb = progress.clone();
        tokio::spawn(async move {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    pb.set_length(snap.total.max(snap.processed()));
                    pb.set_position(snap.processed());
                    pb.set_message(format!("{} failed", snap.failed));
                    if snap.state.is_terminal() {
                        break;
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    let snapshot = tokio::select! {
        result = pixvault.wait(job) => result?,
        _ = tokio::signal::ctrl_c() => {
            progress.set_message("cancelling...");
            pixvault.cancel(job).await?;
            pixvault.wait(job).await?
        }
    };
    progress.finish_and_clear();

    let outcomes = if args.outcomes {
        Some(pixvault.outcomes(job).await?)
    } else {
        None
    };
    write_report(&args, &snapshot, outcomes.as_deref())?;
    print_summary(&snapshot, start.elapsed());

    if snapshot.state == JobState::Failed {
        anyhow::bail!("import job {} failed", job);
    }
    Ok(())
}

fn write_report(
    args: &ImportArgs,
    snapshot: &JobSnapshot,
    outcomes: Option<&[OutcomeEntry]>,
) -> anyhow::Result<()> {
    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };

    match args.format {
        FormatArg::Json => {
            let mut writer = OutputWriter::new(sink, OutputFormat::Json, true);
            writer.write(&ImportReport {
                job: snapshot,
                outcomes,
            })?;
            writer.flush()?;
        }
        FormatArg::Jsonl => {
            let mut writer = OutputWriter::new(sink, OutputFormat::JsonLines, false);
            writer.write(snapshot)?;
            for entry in outcomes.unwrap_or_default() {
                writer.write(entry)?;
            }
            writer.flush()?;
        }
    }

    if let Some(path) = &args.output {
        tracing::info!("Output written to {:?}", path);
    }
    Ok(())
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_summary(snapshot: &JobSnapshot, elapsed: Duration) {
    eprintln!();
    eprintln!("  ====================================");
    eprintln!("    Job {}", snapshot.state);
    eprintln!("  ====================================");
    eprintln!("    Created:      {:>8}", snapshot.succeeded);
    if snapshot.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", snapshot.skipped);
    }
    if snapshot.failed > 0 {
        eprintln!("    Failed:       {:>8}", snapshot.failed);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", snapshot.total);
    eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    eprintln!("  ====================================");
    for error in snapshot.errors.iter().take(10) {
        eprintln!("    {:<12} {}", error.kind.to_string(), error.source);
    }
    if snapshot.errors.len() > 10 {
        eprintln!("    ... and {} more", snapshot.errors.len() - 10);
    }
}
