//! Scratch CLI - run-on-edit fragment execution

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, warn};

use scratch_runner::{
    CompositeOutputHandler, ExpressionSource, FileEvent, FileWatcher, FixSuggestion,
    OutputEventKind, OutputLog, ReplBackend, ScratchConfig, ScratchDocument, ScratchError,
    SequentialExecutor, TerminalSink,
};

#[derive(Parser)]
#[command(name = "scratch")]
#[command(about = "Scratch runner - run-on-edit, cancel-on-change fragment execution")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/scratch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every fragment of a scratch file once
    Run {
        /// Path to the scratch file
        file: PathBuf,

        #[command(flatten)]
        opts: RunOpts,
    },

    /// Execute, then re-execute on every save
    Watch {
        /// Path to the scratch file
        file: PathBuf,

        #[command(flatten)]
        opts: RunOpts,
    },

    /// List the fragments of a scratch file
    Fragments {
        /// Path to the scratch file
        file: PathBuf,
    },
}

#[derive(Args)]
struct RunOpts {
    /// Interpreter program (overrides config and SCRATCH_PROGRAM)
    #[arg(short, long)]
    program: Option<String>,

    /// Interpreter argument (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Per-fragment timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Write the output log to a .json or .yaml file
    #[arg(long)]
    trace: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file, opts } => match load_config(cli.config.as_deref(), &opts) {
            Ok(config) => run_file(&file, config, opts.trace.as_deref()).await,
            Err(e) => Err(e),
        },
        Commands::Watch { file, opts } => match load_config(cli.config.as_deref(), &opts) {
            Ok(config) => watch_file(&file, config, opts.trace.as_deref())
                .await
                .map(|_| true),
            Err(e) => Err(e),
        },
        Commands::Fragments { file } => list_fragments(&file).map(|_| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

/// Config file, then env vars, then CLI flags
fn load_config(path: Option<&Path>, opts: &RunOpts) -> Result<ScratchConfig, ScratchError> {
    let mut config = match path {
        Some(path) => ScratchConfig::load_from(path)?,
        None => ScratchConfig::load()?,
    }
    .with_env();

    if let Some(program) = &opts.program {
        config.process.program = program.clone();
    }
    if !opts.args.is_empty() {
        config.process.args = opts.args.clone();
    }
    if let Some(secs) = opts.timeout {
        config.process.fragment_timeout_secs = secs;
    }
    Ok(config)
}

async fn read_scratch(file: &Path) -> Result<String, ScratchError> {
    tokio::fs::read_to_string(file)
        .await
        .map_err(|e| read_error(file, e))
}

fn read_error(file: &Path, e: std::io::Error) -> ScratchError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ScratchError::FileNotFound {
            path: file.display().to_string(),
        },
        _ => ScratchError::Io(e),
    }
}

fn build_executor(
    document: Arc<ScratchDocument>,
    config: &ScratchConfig,
) -> (SequentialExecutor, OutputLog) {
    let log = OutputLog::new();
    let sink = CompositeOutputHandler::new()
        .with(Arc::new(TerminalSink::stdout()))
        .with(Arc::new(log.clone()));
    let executor = SequentialExecutor::new(
        document,
        Arc::new(ReplBackend::new(config.process.clone())),
        Arc::new(sink),
        config.engine.clone(),
    );
    (executor, log)
}

fn write_trace(log: &OutputLog, trace: Option<&Path>) -> Result<(), ScratchError> {
    if let Some(path) = trace {
        log.write_to(path)?;
        println!("{} Trace written to {}", "→".cyan(), path.display());
    }
    Ok(())
}

/// Returns whether every fragment succeeded
async fn run_file(
    file: &Path,
    config: ScratchConfig,
    trace: Option<&Path>,
) -> Result<bool, ScratchError> {
    let text = read_scratch(file).await?;
    let document = Arc::new(ScratchDocument::new(&text));
    let (executor, log) = build_executor(document, &config);

    executor.start().await?;
    executor.execute().await?;
    let stopped = executor.stop_and_wait().await;

    write_trace(&log, trace)?;
    stopped?;

    let failures = log.count(|kind| match kind {
        OutputEventKind::Record { record } => record.is_fatal(),
        OutputEventKind::Error { .. } => true,
        _ => false,
    });
    Ok(failures == 0)
}

async fn watch_file(
    file: &Path,
    config: ScratchConfig,
    trace: Option<&Path>,
) -> Result<(), ScratchError> {
    let text = read_scratch(file).await?;
    let document = Arc::new(ScratchDocument::new(&text));
    let (executor, log) = build_executor(Arc::clone(&document), &config);

    executor.start().await?;
    executor.execute().await?;

    let mut watcher = FileWatcher::new(file.to_path_buf())?;
    let path = watcher.path().to_path_buf();
    println!(
        "{} Watching {} {}",
        "→".cyan(),
        path.display(),
        "(Ctrl+C to stop)".dimmed()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = watcher.next_debounced(Duration::from_millis(100)) => match event {
                Some(FileEvent::Modified(_)) => match tokio::fs::read_to_string(&path).await {
                    Ok(text) => {
                        document.set_text(&text)?;
                        executor.execute().await?;
                    }
                    Err(e) => warn!(error = %e, "failed to re-read scratch file"),
                },
                Some(FileEvent::Removed(_)) => debug!("scratch file removed, waiting for it to return"),
                None => break,
            },
        }
    }

    let stopped = executor.stop_and_wait().await;
    write_trace(&log, trace)?;
    stopped
}

fn list_fragments(file: &Path) -> Result<(), ScratchError> {
    let text = std::fs::read_to_string(file).map_err(|e| read_error(file, e))?;
    let document = ScratchDocument::new(&text);
    let fragments = document.expressions();

    for (index, fragment) in fragments.iter().enumerate() {
        let first = fragment.text().lines().next().unwrap_or("");
        let more = if fragment.range().len() > 1 { " …" } else { "" };
        println!(
            "  {} {} {}{}",
            format!("{:>3}", index).dimmed(),
            format!("[{}]", fragment.range()).cyan(),
            first,
            more.dimmed()
        );
    }
    println!("{} {} fragments", "✓".green(), fragments.len());
    Ok(())
}
