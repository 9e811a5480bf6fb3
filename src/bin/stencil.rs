//! CLI binary for stencil-trace.
//!
//! A thin shim over the library crate: maps flags to `TracerConfig` and
//! `ProcessingOptions`, plays the requester's side of the page-selection
//! conversation on stdin, and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use stencil_trace::{
    Inbound, InputArtifact, OutputArtifact, Outcome, PageSelection, ProcessingOptions,
    ProgressCallback, SelectionReply, SessionOrchestrator, TraceProgressCallback, Tracer,
    TracerConfig,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

/// Requester id for the single local user.
const LOCAL_REQUESTER: &str = "local";

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a bar at the bottom of the terminal plus one
/// log line per page. Pages finish out of order when traced concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar stays hidden until `on_conversion_start`, so it never draws
    /// over an interactive page prompt.
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: ProgressBar::hidden(),
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TraceProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Tracing");
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Tracing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, path_count: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{path_count:>5} paths")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            let mut m: String = error.chars().take(79).collect();
            m.push('\u{2026}');
            m
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        if self.errors.load(Ordering::SeqCst) == 0 {
            eprintln!(
                "{} {} pages traced",
                green("✔"),
                bold(&total_pages.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Trace a photo of a drawing
  stencil sketch.jpg

  # Ask interactively which pages of a PDF to trace
  stencil plans.pdf

  # Pages 2 to 4, thicker lines, coarser outlines
  stencil plans.pdf --pages 2-4 --options "stroke=3 precision=0.001"

  # Light lines on a dark background
  stencil chalkboard.png --options "invert=false"

  # Also write one SVG per page
  stencil plans.pdf --pages all --svg ./svg

  # Inspect PDF metadata
  stencil --inspect-only plans.pdf

OPTIONS STRING (--options, whitespace separated key=value):
  invert=true|false   treat dark ink as the shape          (default true)
  stroke=<float>      output line width                    (default 2.0)
  dpi=<int>           render resolution for PDFs           (default 600)
  precision=<float>   simplification, 0 keeps every point  (default 0)
  min_len=<int>       drop outlines shorter than this      (default 10)

PAGE SELECTION (--pages or the interactive prompt):
  all | <n> | <first>-<last>      lists such as 1,3,5 are not supported
  Type cancel at the prompt to stop without output.

ENVIRONMENT VARIABLES:
  STENCIL_OPTIONS      Default for --options
  STENCIL_PAGES        Default for --pages
  STENCIL_WORK_DIR     Default for --work-dir
  STENCIL_CONCURRENCY  Default for --concurrency
  PDFIUM_LIB_PATH      Path to libpdfium
  RUST_LOG             Override the log filter (e.g. stencil_trace=debug)
"#;

/// Redraw scanned PDFs and photos as stencil outlines.
#[derive(Parser, Debug)]
#[command(
    name = "stencil",
    version,
    about = "Redraw scanned PDFs and photos as stencil outlines",
    long_about = "Trace the outlines of dark shapes in a scanned PDF or a photo and write them \
as stroke-only vector paths into a new PDF, ready for a cutting plotter or a stencil print.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or image file.
    input: PathBuf,

    /// Write the stencil PDF here instead of <work-dir>/outlined_<name>.pdf.
    #[arg(short, long, env = "STENCIL_OUTPUT")]
    output: Option<PathBuf>,

    /// Tracing options, e.g. "stroke=3 dpi=300 precision=0.001".
    #[arg(long, env = "STENCIL_OPTIONS", default_value = "")]
    options: String,

    /// Page selection: all, 5 or 2-4. Asked interactively when omitted.
    #[arg(long, env = "STENCIL_PAGES")]
    pages: Option<String>,

    /// Directory for staged uploads and outputs.
    #[arg(long, env = "STENCIL_WORK_DIR", default_value = "./work")]
    work_dir: PathBuf,

    /// Pages traced in parallel (default: number of CPU cores).
    #[arg(short, long, env = "STENCIL_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Also write one SVG per traced page into this directory.
    #[arg(long, env = "STENCIL_SVG_DIR")]
    svg: Option<PathBuf>,

    /// Print the result (paths, pages, stats) as JSON on stdout.
    #[arg(long, env = "STENCIL_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "STENCIL_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no tracing.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STENCIL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STENCIL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives the feedback that matters; keep INFO logs out
    // of its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn TraceProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let tracer = Tracer::new(config);

    let artifact = InputArtifact::from_path(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        if !artifact.is_document() {
            bail!("--inspect-only needs a PDF; {} is an image", cli.input.display());
        }
        let meta = tracer
            .inspect(&cli.input)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input.display());
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let result = match (&artifact, &cli.pages) {
        (InputArtifact::Document { .. }, Some(pages)) => {
            run_with_pages(&tracer, &cli, &artifact, pages).await?
        }
        (InputArtifact::Image { .. }, _) => run_image(&tracer, &cli, artifact).await?,
        (InputArtifact::Document { .. }, None) => {
            let Some(result) = run_interactive(tracer, &cli, artifact).await? else {
                return Ok(());
            };
            result
        }
    };

    report(&cli, &result).await
}

/// Map CLI args to `TracerConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TracerConfig> {
    let mut builder = TracerConfig::builder().work_dir(&cli.work_dir);
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Parse `--options`, reporting rejected tokens.
fn parse_options(cli: &Cli) -> ProcessingOptions {
    let parsed = ProcessingOptions::parse(&cli.options);
    if !cli.quiet {
        for e in &parsed.rejected {
            eprintln!("{} {}", cyan("⚠"), e);
        }
    }
    parsed.options
}

fn output_path(cli: &Cli, tracer: &Tracer, artifact: &InputArtifact) -> PathBuf {
    cli.output
        .clone()
        .unwrap_or_else(|| tracer.config().work_dir.join(artifact.output_name()))
}

async fn run_with_pages(
    tracer: &Tracer,
    cli: &Cli,
    artifact: &InputArtifact,
    pages: &str,
) -> Result<OutputArtifact> {
    let options = parse_options(cli);
    let total = tracer
        .page_count(&cli.input)
        .await
        .context("Failed to open PDF")?;
    let selection: PageSelection = pages
        .parse::<SelectionReply>()
        .and_then(|r| r.resolve(total))
        .context("Invalid --pages")?;

    tracer
        .trace_document(
            &cli.input,
            &output_path(cli, tracer, artifact),
            &options,
            Some(selection),
        )
        .await
        .context("Tracing failed")
}

async fn run_image(tracer: &Tracer, cli: &Cli, artifact: InputArtifact) -> Result<OutputArtifact> {
    let options = parse_options(cli);
    let output = output_path(cli, tracer, &artifact);
    let InputArtifact::Image { bytes, name } = artifact else {
        bail!("{} is not an image", cli.input.display());
    };
    tracer
        .trace_image(bytes, &name, &output, &options)
        .await
        .context("Tracing failed")
}

/// Play the page-selection conversation on stdin.
///
/// Returns None when the user cancels.
async fn run_interactive(
    tracer: Tracer,
    cli: &Cli,
    artifact: InputArtifact,
) -> Result<Option<OutputArtifact>> {
    let dest = output_path(cli, &tracer, &artifact);
    let orchestrator = SessionOrchestrator::new(tracer);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let mut outcome = orchestrator
        .handle(
            LOCAL_REQUESTER,
            Inbound::Artifact {
                artifact,
                caption: cli.options.clone(),
            },
        )
        .await;

    loop {
        match outcome {
            Outcome::Completed(mut result) => {
                if result.path != dest {
                    move_file(&result.path, &dest).await?;
                    result.path = dest.clone();
                }
                if !cli.quiet {
                    for notice in &result.notices {
                        eprintln!("{} {}", cyan("⚠"), notice);
                    }
                }
                return Ok(Some(result));
            }
            Outcome::Failed(e) => return Err(e).context("Tracing failed"),
            Outcome::Cancelled => {
                if !cli.quiet {
                    eprintln!("{}", dim(&Outcome::Cancelled.text()));
                }
                return Ok(None);
            }
            Outcome::NeedsInput(ref prompt) | Outcome::Message(ref prompt) => {
                if orchestrator.pending(LOCAL_REQUESTER).await.is_none() {
                    bail!("{}", prompt);
                }
                eprintln!("{}", prompt);
                eprint!("{} ", bold("›"));

                outcome = match stdin.next_line().await.context("Failed to read stdin")? {
                    Some(line) => {
                        orchestrator
                            .handle(LOCAL_REQUESTER, Inbound::Reply(line))
                            .await
                    }
                    None => orchestrator.handle(LOCAL_REQUESTER, Inbound::Cancel).await,
                };
            }
        }
    }
}

/// Move `from` to `to`, copying when they sit on different file systems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to)
            .await
            .with_context(|| format!("Failed to write {}", to.display()))?;
        tokio::fs::remove_file(from).await.ok();
    }
    Ok(())
}

/// Write SVGs if asked, then print the result.
async fn report(cli: &Cli, result: &OutputArtifact) -> Result<()> {
    if let Some(ref dir) = cli.svg {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let stem = result
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        for page in &result.pages {
            let svg = page.to_svg().context("SVG rendering failed")?;
            let path = dir.join(format!("{}_p{}.svg", stem, page.page_num));
            tokio::fs::write(&path, svg)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialise output")?
        );
        return Ok(());
    }

    println!("{}", result.path.display());
    if !cli.quiet {
        let s = &result.stats;
        eprintln!(
            "{}  {}/{} pages  {} paths  {} points  {}ms  →  {}",
            green("✔"),
            s.processed_pages,
            s.total_pages,
            s.total_paths,
            s.total_points,
            s.total_duration_ms,
            bold(&result.path.display().to_string()),
        );
    }
    Ok(())
}
