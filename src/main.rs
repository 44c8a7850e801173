//! RxScan - Prescription scanner
//!
//! Digitizes paper prescriptions: acquire an image, recognize its text, let
//! the user correct it, and keep a bounded offline archive of past scans.

mod app;
mod capture;
mod clipboard;
mod config;
mod shared;
mod storage;
mod vision;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::ScanSession;
use crate::clipboard::SystemClipboard;
use crate::config::AppConfig;
use crate::storage::{ArchiveEntry, CommitOutcome, CommitRejected, FileRecordStore, PersistStatus};
use crate::vision::TesseractEngine;

/// RxScan - scan and archive paper prescriptions
#[derive(Parser, Debug)]
#[command(name = "rx-scan")]
#[command(about = "Scan prescriptions, correct the recognized text and keep an offline archive")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the archive (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Session(SessionCommand),

    /// Print the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Commands that work on an open scan session
#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Recognize a prescription image and optionally archive it
    Scan {
        /// Image or single-page PDF to scan
        file: PathBuf,

        /// Corrected text replacing the recognized text
        #[arg(long, conflicts_with = "text_file")]
        text: Option<String>,

        /// Read the corrected text from a file
        #[arg(long)]
        text_file: Option<PathBuf>,

        /// Archive the (corrected) text
        #[arg(long)]
        save: bool,
    },

    /// List archived scans, newest first
    List {
        /// Print the full text of each scan
        #[arg(long)]
        full: bool,
    },

    /// Print one archived scan
    Show { id: String },

    /// Copy an archived scan's text to the clipboard
    Copy { id: String },

    /// Delete an archived scan
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::get_config_dir()?.join("config.toml"),
    };

    let command = match args.command {
        Command::Config { init } => return run_config(&config_path, init),
        Command::Session(command) => command,
    };

    let config = load_or_create_config(&config_path);
    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => storage::get_data_dir()?,
    };

    debug!("Archive directory {:?}", data_dir);
    let clipboard = SystemClipboard::new(config.clipboard.serve_for());
    let clipboard_persists = clipboard.persists_after_exit();

    let session = ScanSession::open(
        &config,
        Box::new(FileRecordStore::new(&data_dir)),
        Arc::new(TesseractEngine::new(config.recognition.clone())),
        Box::new(clipboard),
    );

    let outcome = run_command(&session, command, clipboard_persists).await;

    if session.has_unsaved_changes() {
        info!("Retrying archive write before exit");
    }
    if let PersistStatus::Failed(reason) = session.close() {
        eprintln!("warning: archive changes were not saved: {reason}");
    }

    outcome
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(config_path: &Path) -> AppConfig {
    if config_path.exists() {
        match config::load_config(config_path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
            Err(e) => tracing::warn!("Ignoring invalid configuration {:?}: {}", config_path, e),
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn run_config(config_path: &Path, init: bool) -> Result<()> {
    if init {
        if config_path.exists() {
            bail!("{} already exists", config_path.display());
        }
        config::save_config(&AppConfig::default(), config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let config = load_or_create_config(config_path);
    println!("# {}", config_path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn run_command(
    session: &ScanSession,
    command: SessionCommand,
    clipboard_persists: bool,
) -> Result<()> {
    match command {
        SessionCommand::Scan {
            file,
            text,
            text_file,
            save,
        } => run_scan(session, &file, text, text_file, save).await,
        SessionCommand::List { full } => {
            let entries = session.list();
            if entries.is_empty() {
                println!("No prescriptions archived");
            }
            for entry in &entries {
                print_entry(entry, full);
            }
            Ok(())
        }
        SessionCommand::Show { id } => {
            let entry = session
                .entry(&id)
                .with_context(|| format!("no archived scan with id {id}"))?;
            print_entry(&entry, true);
            Ok(())
        }
        SessionCommand::Copy { id } => {
            if clipboard_persists && cfg!(target_os = "linux") && session.entry(&id).is_some() {
                eprintln!("Keeping the clipboard available until another application takes it over");
            }
            let export = tokio::task::block_in_place(|| session.export_text(&id))
                .with_context(|| format!("no archived scan with id {id}"))?;
            match export.copied {
                Ok(()) if clipboard_persists => {
                    println!("Copied {} characters to the clipboard", export.text.chars().count())
                }
                Ok(()) => {
                    eprintln!("warning: the clipboard is cleared when rx-scan exits (clipboard.serve_secs = 0)");
                    println!("{}", export.text);
                }
                Err(e) => {
                    eprintln!("warning: {e}");
                    println!("{}", export.text);
                }
            }
            Ok(())
        }
        SessionCommand::Delete { id } => {
            match session.remove(&id) {
                Some(PersistStatus::Persisted) => println!("Deleted {id}"),
                Some(PersistStatus::Failed(reason)) => {
                    println!("Deleted {id}");
                    eprintln!("warning: deletion not saved: {reason}");
                }
                None => println!("No archived scan with id {id}"),
            }
            Ok(())
        }
    }
}

async fn run_scan(
    session: &ScanSession,
    file: &Path,
    text: Option<String>,
    text_file: Option<PathBuf>,
    save: bool,
) -> Result<()> {
    let scan = session.scan(file);
    tokio::pin!(scan);
    let result = tokio::select! {
        result = &mut scan => result?,
        _ = tokio::signal::ctrl_c() => {
            if session.is_busy() && session.cancel_recognition() {
                eprintln!("Cancelling recognition");
            }
            scan.await?
        }
    };

    if let Some(image) = session.current_image() {
        match image.dimensions() {
            Some((width, height)) => info!("Scanned {} ({}x{})", image.source_name(), width, height),
            None => info!("Scanned {} ({:?})", image.source_name(), image.kind()),
        }
    }
    if !result.succeeded {
        eprintln!("warning: no text could be recognized");
    }

    let correction = match (text, text_file) {
        (Some(text), _) => Some(text),
        (None, Some(path)) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?,
        ),
        (None, None) => None,
    };
    if let Some(correction) = correction {
        session.edit(correction);
    }

    println!("{}", session.display_text());

    if save {
        match session.commit() {
            CommitOutcome::Committed { entry, persisted } => {
                println!("Saved as {}", entry.id);
                if let PersistStatus::Failed(reason) = persisted {
                    eprintln!("warning: saved for this session only: {reason}");
                }
            }
            CommitOutcome::Rejected(CommitRejected::EmptyText) => {
                eprintln!("Nothing to save: the text is empty");
            }
            CommitOutcome::Rejected(CommitRejected::RecognitionInFlight) => {
                eprintln!("Nothing to save: recognition is still running");
            }
        }
    }

    Ok(())
}

fn print_entry(entry: &ArchiveEntry, full: bool) {
    let created = entry.created_at.with_timezone(&chrono::Local);
    println!("{}  {}  {}", entry.id, created.format("%Y-%m-%d %H:%M"), entry.file_name);
    if full {
        for line in entry.text.lines() {
            println!("    {line}");
        }
        println!();
    }
}
