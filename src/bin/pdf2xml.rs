//! CLI binary for pdf2xml-client.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ClientConfig`, wires up credentials, and prints reports.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2xml_client::{
    ClientConfig, ConversionReport, EngineState, FileStatus, HistoryStore, HttpGateway,
    Orchestrator, PollProgressCallback, ProgressCallback, SessionStore, TokenSession, UploadFile,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over the jobs of a batch. Jobs finish out of order, so
/// the bar only counts terminal jobs and prints one line per job.
struct CliPollCallback {
    bar: ProgressBar,
}

impl CliPollCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Submitting");
        bar.set_message("uploading PDFs…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} jobs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Polling");
        self.bar.set_message("");
    }
}

impl PollProgressCallback for CliPollCallback {
    fn on_batch_start(&self, total_jobs: usize) {
        self.activate_bar(total_jobs);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Polling {total_jobs} job(s)…"))
        ));
    }

    fn on_tick(&self, job_id: &str, attempt: u32, max_attempts: u32, state: EngineState) {
        self.bar
            .set_message(dim(&format!("{job_id} {state} {attempt}/{max_attempts}")));
    }

    fn on_job_complete(&self, job_id: &str, attempts: u32) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            job_id,
            dim(&format!("{attempts} poll(s)"))
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, job_id: &str, reason: &str) {
        let msg: String = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), job_id, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_jobs: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_jobs.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} job(s) finished successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} job(s) succeeded  ({} failed)",
                if failed == total_jobs {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_jobs,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Register PDFs for this session
  pdf2xml upload notas/*.pdf

  # Convert every uploaded file (checks credits first)
  pdf2xml convert

  # Convert a selection
  pdf2xml convert nota-01.pdf nota-02.pdf

  # Finish a batch interrupted by Ctrl-C, a crash or an expired login
  pdf2xml resume

  # Merge PDFs on the backend
  pdf2xml merge a.pdf b.pdf -o merged.pdf

  # Forward generated XML to the external API
  pdf2xml send

  # Ledger, in-flight batch and download links
  pdf2xml status

ENVIRONMENT VARIABLES:
  PDF2XML_BACKEND_URL     Backend base URL
  PDF2XML_STATE_DIR       Directory for session.json, history.json, uploads/
  PDF2XML_TOKEN           Bearer access token
  PDF2XML_REFRESH_TOKEN   Refresh token used on 401
  PDF2XML_USERNAME        Login user (with PDF2XML_PASSWORD)
  PDF2XML_PASSWORD        Login password
  RUST_LOG                Overrides the log filter

Ctrl-C stops polling; pending jobs are reported as timed out and the
session state stays consistent.
"#;

/// Submit PDFs to the extraction backend and collect the generated XML.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2xml",
    version,
    about = "Submit PDFs to the extraction backend and collect the generated XML",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Backend base URL.
    #[arg(long, global = true, env = "PDF2XML_BACKEND_URL", default_value = "http://localhost:8000")]
    backend_url: String,

    /// Directory holding session state, history and uploads.
    #[arg(long, global = true, env = "PDF2XML_STATE_DIR", default_value = "data")]
    state_dir: PathBuf,

    /// Bearer access token.
    #[arg(long, global = true, env = "PDF2XML_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refresh token, used once when a call returns 401.
    #[arg(long, global = true, env = "PDF2XML_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Login user (requires --password).
    #[arg(long, global = true, env = "PDF2XML_USERNAME")]
    username: Option<String>,

    /// Login password.
    #[arg(long, global = true, env = "PDF2XML_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds between two status polls of the same job.
    #[arg(long, global = true, env = "PDF2XML_POLL_INTERVAL", default_value_t = 5)]
    poll_interval: u64,

    /// Jobs polled at the same time.
    #[arg(long, global = true, env = "PDF2XML_MAX_CONCURRENT_POLLS", default_value_t = 10)]
    max_concurrent_polls: usize,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF2XML_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2XML_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2XML_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store PDFs for this session.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Convert uploaded PDFs (all pending ones when none are named).
    Convert { names: Vec<String> },
    /// Finish the batch left in flight by an earlier run.
    Resume,
    /// Merge several PDFs into one.
    Merge {
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,
        /// Where to write the merged PDF.
        #[arg(short, long, default_value = "merged.pdf")]
        output: PathBuf,
    },
    /// Forward generated XML to the external API (all unsent when none are named).
    Send { names: Vec<String> },
    /// Show the ledger, any batch in flight and download links.
    Status,
    /// Show processed files and time saved.
    History {
        /// Value of one minute, for the savings estimate.
        #[arg(long)]
        rate: Option<f64>,
    },
}

impl Command {
    fn polls(&self) -> bool {
        matches!(
            self,
            Command::Convert { .. } | Command::Resume | Command::Merge { .. } | Command::Send { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback while polling; keep library
    // logs to errors unless asked otherwise.
    let show_progress = !g.quiet && !g.no_progress && cli.command.polls();
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliPollCallback::new() as Arc<dyn PollProgressCallback>)
    } else {
        None
    };
    let config = build_config(g, progress_cb)?;

    // ── Offline commands ─────────────────────────────────────────────────
    match &cli.command {
        Command::Status => return print_status(&config),
        Command::History { rate } => return print_history(&config, *rate),
        _ => {}
    }

    // ── Backend commands ─────────────────────────────────────────────────
    let client = connect(g, config).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} Cancelling…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Upload { files } => {
            for path in files {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let name = file_name(&path)?;
                client
                    .upload(&name, &bytes)
                    .await
                    .with_context(|| format!("Upload of '{name}' failed"))?;
                if !g.quiet {
                    eprintln!("{} {}", green("✓"), name);
                }
            }
        }
        Command::Convert { names } => {
            let selection = if names.is_empty() {
                client
                    .ledger()
                    .pending()
                    .iter()
                    .map(|f| f.name.clone())
                    .collect()
            } else {
                names
            };
            if selection.is_empty() {
                bail!("No uploaded files are waiting for conversion");
            }
            let report = client
                .convert(&selection, &cancel)
                .await
                .context("Conversion failed")?;
            print_report(&client, &report, g.quiet);
        }
        Command::Resume => match client.resume(&cancel).await.context("Resume failed")? {
            Some(report) => print_report(&client, &report, g.quiet),
            None => {
                if !g.quiet {
                    eprintln!("Nothing to resume");
                }
            }
        },
        Command::Merge { files, output } => {
            let mut inputs = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                inputs.push(UploadFile::new(file_name(path)?, bytes));
            }
            let out_name = file_name(&output)?;
            let merged = client
                .merge(&inputs, &out_name, &cancel)
                .await
                .context("Merge failed")?;
            tokio::fs::write(&output, &merged.bytes)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            if !g.quiet {
                eprintln!(
                    "{}  {} PDFs merged  →  {}  {}",
                    green("✔"),
                    inputs.len(),
                    bold(&output.display().to_string()),
                    dim(&format!("{} bytes", merged.bytes.len()))
                );
            }
        }
        Command::Send { names } => {
            let report = client.send(&names, &cancel).await.context("Send failed")?;
            if !g.quiet {
                for (name, detail) in &report.sent {
                    eprintln!("  {} {}  {}", green("✓"), name, dim(detail));
                }
                for (name, reason) in &report.failed {
                    eprintln!("  {} {}  {}", red("✗"), name, red(reason));
                }
                let (sent, failed) = report.counts();
                eprintln!("{} sent, {} failed", bold(&sent.to_string()), failed);
            }
        }
        Command::Status | Command::History { .. } => {}
    }

    Ok(())
}

/// Map global flags to `ClientConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder()
        .backend_url(&g.backend_url)
        .state_dir(&g.state_dir)
        .poll_interval_ms(g.poll_interval.saturating_mul(1000))
        .max_concurrent_polls(g.max_concurrent_polls);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Build the authenticated client: token flags first, then username/password.
async fn connect(g: &GlobalArgs, config: ClientConfig) -> Result<Orchestrator> {
    let session = TokenSession::new(&config).context("Failed to create HTTP client")?;
    let session = match (&g.token, &g.username, &g.password) {
        (Some(token), _, _) => session.with_tokens(token.clone(), g.refresh_token.clone()),
        (None, Some(user), Some(pass)) => {
            session.login(user, pass).await.context("Login failed")?;
            session
        }
        _ => bail!("No credentials: pass --token, or --username and --password"),
    };
    let gateway = Arc::new(
        HttpGateway::new(&config, Arc::new(session)).context("Failed to create HTTP client")?,
    );
    Orchestrator::open(config, gateway.clone(), gateway).context("Failed to open session state")
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("'{}' has no file name", path.display()))
}

fn print_report(client: &Orchestrator, report: &ConversionReport, quiet: bool) {
    if quiet {
        return;
    }
    for name in &report.completed {
        eprintln!("  {} {}", green("✓"), name);
    }
    for (name, reason) in &report.failed {
        eprintln!("  {} {}  {}", red("✗"), name, red(reason));
    }
    for e in &report.entry_errors {
        eprintln!("  {} {}", yellow("!"), e);
    }
    for w in &report.warnings {
        eprintln!("  {} {}", yellow("!"), w);
    }
    for doc in &report.unmatched {
        eprintln!("  {} {} matches no uploaded file", yellow("?"), doc);
    }
    let (ok, failed) = report.file_counts();
    eprintln!(
        "{}  {}  {} converted, {} failed  {}",
        if failed == 0 { green("✔") } else { cyan("⚠") },
        report.outcome,
        bold(&ok.to_string()),
        failed,
        dim(&format!("{} credit(s) used", report.credits_used)),
    );
    for h in &report.download_handles {
        eprintln!("   {} {}", dim("zip:"), client.download_url(h));
    }
}

fn print_status(config: &ClientConfig) -> Result<()> {
    let store = SessionStore::open(config.session_path()).context("Failed to open session state")?;
    let state = store.snapshot();

    if state.ledger.is_empty() {
        println!("No files uploaded");
    }
    for f in state.ledger.files() {
        let status = match f.status {
            FileStatus::Completed => green(&f.status.to_string()),
            FileStatus::Failed => red(&f.status.to_string()),
            FileStatus::Submitted => cyan(&f.status.to_string()),
            FileStatus::Uploaded => f.status.to_string(),
        };
        println!(
            "{:<40} {:<20} {:<12} {}",
            f.name,
            status,
            f.send_status.to_string(),
            dim(&f.detail)
        );
    }
    let (completed, failed, in_flight) = state.ledger.counts();
    println!(
        "\n{} completed, {} failed, {} in flight",
        completed, failed, in_flight
    );

    if let Some(batch) = &state.batch {
        println!(
            "\n{} Batch in flight: {} job(s), {} file(s); run `pdf2xml resume`",
            yellow("⚠"),
            batch.jobs.len(),
            batch.files_submitted
        );
        for t in &batch.jobs {
            let (job_state, attempts) = state
                .jobs
                .get(&t.job.id)
                .map(|p| (p.state, p.attempts))
                .unwrap_or((EngineState::Pending, 0));
            println!("  {}  {}  {} poll(s)", t.job, job_state, attempts);
        }
    }

    if !state.sends.is_empty() {
        println!(
            "\n{} {} send job(s) in flight; run `pdf2xml send` to finish them",
            yellow("⚠"),
            state.sends.len()
        );
        for t in &state.sends {
            let attempts = state.jobs.get(&t.job.id).map_or(0, |p| p.attempts);
            println!("  {}  {}  {} poll(s)", t.job, t.file, attempts);
        }
    }

    if !state.download_handles.is_empty() {
        println!("\nDownloads:");
        for h in &state.download_handles {
            println!(
                "  {}",
                pdf2xml_client::gateway::wire::url(
                    &config.backend_url,
                    &pdf2xml_client::gateway::wire::download_zip(h)
                )
            );
        }
    }
    Ok(())
}

fn print_history(config: &ClientConfig, rate: Option<f64>) -> Result<()> {
    let history = HistoryStore::open(config.history_path(), config.time_saved_per_file)
        .context("Failed to open history")?;
    let record = history.snapshot();
    for name in &record.processed_files {
        println!("{name}");
    }
    println!(
        "\n{} file(s) processed, {} minute(s) saved",
        bold(&record.processed_files.len().to_string()),
        bold(&record.time_saved_total.to_string())
    );
    if let Some(rate) = rate {
        println!("Estimated value: {:.2}", record.value_at(rate));
    }
    Ok(())
}
