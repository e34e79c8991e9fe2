//! Application entry point — submission pipeline CLI.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Parse the command line.
//! 3. Load [`AppConfig`] from disk (returns default on first run) and apply
//!    command-line overrides.
//! 4. Open the session store ([`DirStore`] when a session directory is in
//!    play, [`MemoryStore`] otherwise).
//! 5. Build the [`PipelineOrchestrator`] from config.
//! 6. Spawn the progress watcher and the Ctrl-C handler.
//! 7. Run the requested command and print the resulting record (or, for
//!    `config`, the effective settings).

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use submission_pipeline::{
    config::{AppConfig, AppPaths, OrchestrationMode},
    pipeline::{PipelineError, PipelineOrchestrator},
    submission::{DirStore, MemoryStore, Payload, SubmissionId, SubmissionRecord, SubmissionStore},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Direct,
    Polling,
}

impl From<ModeArg> for OrchestrationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => OrchestrationMode::Direct,
            ModeArg::Polling => OrchestrationMode::Polling,
        }
    }
}

/// Turn a spoken or typed submission into a consultation response and a
/// letter to your representative.
#[derive(Parser)]
#[command(name = "submission-pipeline", version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Orchestration mode override
    #[arg(long, global = true, value_enum)]
    mode: Option<ModeArg>,

    /// Stage host base URL override
    #[arg(long, global = true, env = "SUBMISSION_PIPELINE_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the stage host
    #[arg(long, global = true, env = "SUBMISSION_PIPELINE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Keep records in this session directory
    #[arg(long, global = true)]
    session_dir: Option<PathBuf>,

    /// Keep records in the default session directory
    #[arg(long, global = true)]
    persist: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an audio file
    Audio {
        /// Path to the recording (webm, mp3, wav, m4a, ogg)
        file: PathBuf,
    },

    /// Submit typed text ("-" reads stdin)
    Text {
        text: String,
    },

    /// Retry or resume a stored submission
    Resume {
        id: SubmissionId,
        /// Audio to re-supply when the transcript is still missing
        #[arg(long)]
        audio: Option<PathBuf>,
    },

    /// Print a stored submission
    Show {
        id: SubmissionId,
    },

    /// Print the effective settings as TOML
    Config {
        /// Also write them to the settings file
        #[arg(long)]
        write: bool,
    },
}

impl Commands {
    /// Commands that read earlier records need an on-disk store.
    fn needs_persistence(&self) -> bool {
        matches!(self, Commands::Resume { .. } | Commands::Show { .. })
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };

    if let Some(mode) = cli.mode {
        config.pipeline.mode = mode.into();
    }
    if let Some(url) = &cli.base_url {
        config.stages.base_url = url.clone();
    }
    if let Some(key) = &cli.api_key {
        config.stages.api_key = Some(key.clone());
    }
    if let Some(dir) = &cli.session_dir {
        config.store.session_dir = Some(dir.clone());
    } else if cli.persist || (config.store.session_dir.is_none() && cli.command.needs_persistence())
    {
        config.store.session_dir = Some(AppPaths::new().sessions_dir);
    }
    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn SubmissionStore>> {
    match &config.store.session_dir {
        Some(dir) => {
            let store = DirStore::open(dir)
                .with_context(|| format!("failed to open session directory {}", dir.display()))?;
            log::info!("Session records kept in {}", store.dir().display());
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

fn read_audio(path: &Path, config: &AppConfig) -> Result<Payload> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Payload::from_file_name(&file_name, bytes, &config.submission)
        .with_context(|| format!("{} cannot be submitted", path.display()))
}

fn read_text(text: &str, config: &AppConfig) -> Result<Payload> {
    let text = if text == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        text.to_string()
    };
    Payload::text(text, &config.submission).context("text cannot be submitted")
}

/// Print each status change to stderr while a run is in progress.
fn spawn_progress_watcher(orchestrator: &PipelineOrchestrator) -> tokio::task::JoinHandle<()> {
    let mut updates = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(record) => {
                    let status = record.status();
                    match status.progress() {
                        Some(progress) => eprintln!("[{progress:>3}%] {}", status.label()),
                        None => eprintln!(
                            "[  !] {}: {}",
                            status.label(),
                            record.last_error().unwrap_or("unknown error")
                        ),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Progress watcher skipped {skipped} updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Cancel `token` on the first Ctrl-C.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping the current run");
            token.cancel();
        }
    });
}

fn print_record(record: &SubmissionRecord) {
    println!("Submission {}", record.id());
    println!("Status: {}", record.status().label());
    if let Some(content_type) = record.content_type() {
        println!("Input: {content_type}");
    }
    if let Some(transcript) = record.transcript() {
        println!("\n== Transcript ==\n{transcript}");
    }
    if let Some(analysis) = record.analysis() {
        println!("\n== Analysis ==\n{analysis}");
    }
    if let Some(draft) = record.consultation_draft() {
        println!("\n== Consultation response ==\n{draft}");
    }
    if let Some(letter) = record.representative_letter() {
        println!("\n== Letter to your representative ==\n{letter}");
    }
    if let Some(error) = record.last_error() {
        println!("\nError: {error}");
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn show_config(cli: &Cli, config: &AppConfig, write: bool) -> Result<()> {
    print!("{}", toml::to_string_pretty(config).context("failed to render settings")?);
    if !write {
        return Ok(());
    }
    match &cli.config {
        Some(path) => {
            config.save_to(path)?;
            log::info!("Settings written to {}", path.display());
        }
        None => {
            config.save()?;
            log::info!("Settings written to {}", AppPaths::new().settings_file.display());
        }
    }
    Ok(())
}

/// The command that resumes a failed run, when its record outlives the
/// process.
fn retry_hint(config: &AppConfig) -> Option<String> {
    // Memory-only records are gone once the process exits.
    let dir = config.store.session_dir.as_ref()?;
    Some(format!("submission-pipeline --session-dir {} resume", dir.display()))
}

async fn execute(
    orchestrator: &PipelineOrchestrator,
    id: SubmissionId,
    payload: Option<Payload>,
    retry_hint: Option<&str>,
    cancel: CancellationToken,
) -> Result<()> {
    match orchestrator.run_with_cancel(id, payload, cancel).await {
        Ok(record) => {
            print_record(&record);
            Ok(())
        }
        Err(e) => {
            if let Ok(record) = orchestrator.snapshot(&id) {
                print_record(&record);
            }
            if let Some(hint) = retry_hint {
                if !matches!(e, PipelineError::AlreadyRunning(_) | PipelineError::NotFound(_)) {
                    log::info!("Retry with: {hint} {id}");
                }
            }
            Err(e).with_context(|| format!("submission {id} did not complete"))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    if let Commands::Config { write } = cli.command {
        return show_config(&cli, &config, write);
    }

    let retry_hint = retry_hint(&config);
    let store = open_store(&config)?;
    let orchestrator = PipelineOrchestrator::from_config(&config, store);
    log::info!(
        "Stage host {} ({:?} mode)",
        config.stages.base_url,
        orchestrator.mode()
    );

    if let Commands::Show { id } = &cli.command {
        print_record(&orchestrator.snapshot(id)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let watcher = spawn_progress_watcher(&orchestrator);

    let outcome = match cli.command {
        Commands::Audio { file } => {
            let payload = read_audio(&file, &config)?;
            let record = orchestrator.create(&payload)?;
            execute(&orchestrator, record.id(), Some(payload), retry_hint.as_deref(), cancel).await
        }
        Commands::Text { text } => {
            let payload = read_text(&text, &config)?;
            let record = orchestrator.create(&payload)?;
            execute(&orchestrator, record.id(), Some(payload), retry_hint.as_deref(), cancel).await
        }
        Commands::Resume { id, audio } => {
            let payload = audio
                .as_deref()
                .map(|path| read_audio(path, &config))
                .transpose()?;
            execute(&orchestrator, id, payload, retry_hint.as_deref(), cancel).await
        }
        Commands::Show { .. } | Commands::Config { .. } => Ok(()),
    };

    watcher.abort();
    outcome
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Command line
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("{e:#}");
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
