//! CLI binary for pdf-outline.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! then either serves the HTTP API or runs one command locally.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_outline::pipeline::input;
use pdf_outline::{
    serve, AppState, Coordinator, OutlineCache, PipelineConfig, PipelineProgressCallback,
    ProgressCallback, Stage, ToolsConfig,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner per stage, then a page bar during extraction.
/// Pages may finish out of order when extraction runs concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    total_pages: AtomicUsize,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Staging PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            total_pages: AtomicUsize::new(0),
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn page_elapsed(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&page)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  \
         [{bar:42.green/238}] {pos:>3}/{len} pages  \
         ⏱ {elapsed_precise}  ETA {eta_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        if stage == Stage::Extract {
            self.bar.set_length(self.total_pages.load(Ordering::SeqCst) as u64);
            self.bar.set_style(bar_style());
            self.bar.reset_eta();
        } else {
            self.bar.set_style(spinner_style());
            self.bar.set_message("");
        }
    }

    fn on_stage_complete(&self, stage: Stage, ok: bool) {
        let mark = match (ok, stage.is_fatal()) {
            (true, _) => green("✓"),
            (false, false) => cyan("⚠"),
            (false, true) => red("✗"),
        };
        self.bar.println(format!("{mark} {stage}"));
        if stage == Stage::Assemble || (!ok && stage.is_fatal()) {
            self.bar.finish_and_clear();
        }
    }

    fn on_pages_discovered(&self, total_pages: usize) {
        self.total_pages.store(total_pages, Ordering::SeqCst);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_pages} pages rasterised"))
        ));
    }

    fn on_page_start(&self, page: usize, _total_pages: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(page, Instant::now());
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: usize, total_pages: usize) {
        let secs = self.page_elapsed(page);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page,
            total_pages,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let secs = self.page_elapsed(page);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_cache_hit(&self) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", green("✔"), bold("Served from cache"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP API on port 5001
  pdf-outline serve

  # Outline a local file (JSON on stdout)
  pdf-outline process book.pdf

  # Outline a downloaded file, with per-stage timings
  pdf-outline process https://example.org/report.pdf --json

  # Check that mutool, the scripts and the working directories are present
  pdf-outline check

  # Custom tool commands
  pdf-outline --tools tools.json serve

TOOLS FILE:
  {
    "rasterizer": { "program": "mutool", "args": ["convert", "-o", "{output_pattern}",
                    "-F", "{ext}", "-O", "resolution={dpi}", "{input}"] },
    "extract":    { "program": "python3", "args": ["ocr.py", "{image}", "{json}"] }
  }
  Stages left out keep their defaults. Placeholders: layout {page_images};
  extract {image} {json}; assemble {name} {fragments}.

ENVIRONMENT VARIABLES:
  PDF_OUTLINE_BASE_DIR     Directory tools run in (default: .)
  PDF_OUTLINE_TOOLS        Tools file
  PDF_OUTLINE_ADDR         Listen address for `serve` (default: 0.0.0.0:5001)
  PDF_OUTLINE_CACHE_FILE   Persist the outline cache to this JSON file
  RUST_LOG                 Log filter, overrides -v / -q
"#;

/// Turn PDFs into structured outlines by driving an external toolchain.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-outline",
    version,
    about = "Turn PDFs into structured outlines (title, headings, points)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF_OUTLINE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF_OUTLINE_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Directory the external tools run in; working areas live below it.
    #[arg(long, global = true, env = "PDF_OUTLINE_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// JSON file overriding the stage command templates.
    #[arg(long, global = true, env = "PDF_OUTLINE_TOOLS")]
    tools: Option<PathBuf>,

    /// Rasterisation DPI (72–400).
    #[arg(long, global = true, env = "PDF_OUTLINE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent per-page extraction calls.
    #[arg(long, global = true, env = "PDF_OUTLINE_EXTRACT_CONCURRENCY", default_value_t = 1)]
    extract_concurrency: usize,

    /// Rasteriser timeout in seconds.
    #[arg(long, global = true, env = "PDF_OUTLINE_RASTERIZE_TIMEOUT", default_value_t = 300)]
    rasterize_timeout: u64,

    /// Layout-detection timeout in seconds.
    #[arg(long, global = true, env = "PDF_OUTLINE_LAYOUT_TIMEOUT", default_value_t = 600)]
    layout_timeout: u64,

    /// Per-page extraction timeout in seconds.
    #[arg(long, global = true, env = "PDF_OUTLINE_EXTRACT_TIMEOUT", default_value_t = 300)]
    extract_timeout: u64,

    /// Assembly timeout in seconds.
    #[arg(long, global = true, env = "PDF_OUTLINE_ASSEMBLE_TIMEOUT", default_value_t = 300)]
    assemble_timeout: u64,

    /// Seconds a cached outline stays fresh.
    #[arg(long, global = true, env = "PDF_OUTLINE_CACHE_TTL", default_value_t = 3600)]
    cache_ttl: u64,

    /// Persist the outline cache to this JSON file.
    #[arg(long, global = true, env = "PDF_OUTLINE_CACHE_FILE")]
    cache_file: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "PDF_OUTLINE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, env = "PDF_OUTLINE_ADDR", default_value = "0.0.0.0:5001")]
        addr: SocketAddr,

        /// Largest accepted upload in MiB.
        #[arg(long, env = "PDF_OUTLINE_MAX_UPLOAD_MB", default_value_t = 100)]
        max_upload_mb: usize,
    },

    /// Outline one PDF (local path or HTTP/HTTPS URL) and print it as JSON.
    Process {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Write the outline to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full outcome (outline, cache flag, per-stage report).
        #[arg(long)]
        json: bool,

        /// On a stage failure print the fallback outline instead of failing.
        #[arg(long)]
        fallback: bool,

        /// Disable the progress bar.
        #[arg(long, env = "PDF_OUTLINE_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Report which tools, scripts and working directories are present.
    Check {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Empty the intermediate working directories.
    Cleanup,

    /// Drop every cached outline (only meaningful with --cache-file).
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for `process`.
    let show_progress = match &cli.command {
        Command::Process {
            json, no_progress, ..
        } => !cli.quiet && !json && !no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli.pipeline, progress)?;
    let cache = Arc::new(match cli.pipeline.cache_file {
        Some(ref path) => OutlineCache::with_persistence(config.cache_ttl(), path),
        None => OutlineCache::new(config.cache_ttl()),
    });
    let download_timeout = Duration::from_secs(config.download_timeout_secs);
    let coordinator = Arc::new(Coordinator::with_command_tools(config, cache));

    match cli.command {
        Command::Serve {
            addr,
            max_upload_mb,
        } => {
            let state = AppState::new(coordinator).with_upload_limit(max_upload_mb * 1024 * 1024);
            serve(addr, state)
                .await
                .with_context(|| format!("Server on {addr} failed"))?;
        }

        Command::Process {
            input: source,
            output,
            json,
            fallback,
            ..
        } => {
            let resolved = input::resolve_input(&source, download_timeout)
                .await
                .with_context(|| format!("Cannot read {source}"))?;
            let file_name = resolved.file_name();

            let outcome = if fallback {
                coordinator
                    .process_or_fallback(resolved.path(), &file_name)
                    .await
            } else {
                coordinator.process(resolved.path(), &file_name).await
            }
            .context("Processing failed")?;

            let text = if json {
                serde_json::to_string_pretty(&outcome)
            } else {
                serde_json::to_string_pretty(&outcome.document)
            }
            .context("Failed to serialise outline")?;

            match output {
                Some(ref path) => {
                    tokio::fs::write(path, format!("{text}\n"))
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    if !cli.quiet {
                        eprintln!(
                            "{}  {} headings  →  {}",
                            green("✔"),
                            outcome.document.headings.len(),
                            bold(&path.display().to_string())
                        );
                    }
                }
                None => println!("{text}"),
            }

            if let Some(report) = outcome.report.as_ref().filter(|_| !cli.quiet) {
                eprintln!(
                    "   {}/{} pages extracted  —  {}ms total",
                    report.pages_extracted, report.pages_rasterized, report.total_duration_ms
                );
            }
        }

        Command::Check { json } => {
            let components = coordinator.probe_components();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&components)
                        .context("Failed to serialise report")?
                );
            } else {
                for (name, present) in &components {
                    let mark = if *present { green("✓") } else { red("✗") };
                    println!("{mark} {name}");
                }
            }
            let missing = components.values().filter(|ok| !**ok).count();
            if missing > 0 {
                bail!("{missing} pipeline component(s) missing");
            }
        }

        Command::Cleanup => {
            let report = coordinator.cleanup().await.context("Cleanup failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} Removed {} files{}",
                    green("✔"),
                    report.removed,
                    if report.failed > 0 {
                        red(&format!(" ({} could not be removed)", report.failed))
                    } else {
                        String::new()
                    }
                );
            }
        }

        Command::ClearCache => {
            let cache = coordinator.cache();
            let before = cache.len();
            cache.clear().await;
            if !cli.quiet {
                eprintln!("{} Cleared {} cached outlines", green("✔"), before);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let tools = match args.tools {
        Some(ref path) => ToolsConfig::from_json_file(path)
            .with_context(|| format!("Failed to load tools file {}", path.display()))?,
        None => ToolsConfig::default(),
    };

    let mut builder = PipelineConfig::builder()
        .base_dir(&args.base_dir)
        .tools(tools)
        .dpi(args.dpi)
        .extract_concurrency(args.extract_concurrency)
        .rasterize_timeout_secs(args.rasterize_timeout)
        .layout_timeout_secs(args.layout_timeout)
        .extract_timeout_secs(args.extract_timeout)
        .assemble_timeout_secs(args.assemble_timeout)
        .cache_ttl_secs(args.cache_ttl)
        .download_timeout_secs(args.download_timeout);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}
