//! Multi-role game generator.
//!
//! `genesis generate "<request>"` runs one session in-process and streams its
//! progress to stdout. `genesis check <file>` validates an existing artifact.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};

use genesis::core::types::{ProgressEvent, SessionOutcome};
use genesis::exit_codes;
use genesis::io::artifact_store::list_games;
use genesis::io::config::{DEFAULT_CONFIG_FILE, GenesisConfig, load_config, write_config};
use genesis::io::progress::ProgressHub;
use genesis::io::sessions::InMemorySessions;
use genesis::logging;
use genesis::pipeline::Orchestrator;
use genesis::validate::Validator;

#[derive(Parser)]
#[command(
    name = "genesis",
    version,
    about = "Generate, validate and repair single-file browser games"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one session for a natural-language game request.
    Generate {
        /// What to build, e.g. "a bouncing ball".
        request: String,
    },
    /// Run static and dynamic validation on an existing artifact.
    Check { file: PathBuf },
    /// List completed games under the output directory.
    Games,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Generate { request } => cmd_generate(&cli.config, &request).await,
        Command::Check { file } => cmd_check(&cli.config, &file).await,
        Command::Games => cmd_games(&cli.config).await,
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    write_config(path, &GenesisConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

async fn cmd_generate(config: &Path, request: &str) -> Result<i32> {
    let cfg = load_config(config)?;
    let hub = ProgressHub::new();
    let orchestrator =
        Orchestrator::from_config(&cfg, Arc::new(InMemorySessions::new()), hub.clone())?;

    let session = orchestrator.create_session(request)?;
    let events = hub
        .stream(&session.id)
        .context("progress log missing for new session")?;
    let printer = tokio::spawn(print_progress(events));

    let outcome = orchestrator.run_session(session).await;
    printer.await.context("progress printer")?;

    println!("{outcome}");
    Ok(match outcome {
        SessionOutcome::Complete { .. } => exit_codes::OK,
        SessionOutcome::Failed { .. } => exit_codes::FAILED,
    })
}

/// Print events until the terminal one.
async fn print_progress(events: impl Stream<Item = ProgressEvent>) {
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        print_event(&event);
    }
}

fn print_event(event: &ProgressEvent) {
    println!(
        "[{:>3.0}%] {:?}: {}",
        event.progress * 100.0,
        event.category,
        event.message
    );
}

async fn cmd_check(config: &Path, file: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let artifact = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    let report = Validator::from_config(&cfg).validate(&artifact).await;

    for warning in report.warnings() {
        println!("warning: {warning}");
    }
    if report.success() {
        println!("{} passed validation", file.display());
        return Ok(exit_codes::OK);
    }
    for error in report.errors() {
        println!("error: {error}");
    }
    Ok(exit_codes::FAILED)
}

async fn cmd_games(config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    for game in list_games(&cfg.output_dir).await? {
        println!("{}\t{}", game.name, game.artifact.display());
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["genesis", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_generate_with_config() {
        let cli = Cli::parse_from([
            "genesis",
            "generate",
            "a bouncing ball",
            "--config",
            "x.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        let Command::Generate { request } = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(request, "a bouncing ball");
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("genesis.toml");
        assert_eq!(cmd_init(&path, false).expect("first init"), exit_codes::OK);
        assert!(cmd_init(&path, false).is_err());
        assert_eq!(cmd_init(&path, true).expect("forced init"), exit_codes::OK);
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg, GenesisConfig::default());
    }
}
