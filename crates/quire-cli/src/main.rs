//! Quire CLI
//!
//! Command-line interface for Quire - plain-file notes with folder sync.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quire_core::sync::ConflictPolicy;
use quire_core::{Config, FileNoteStore};

mod commands;
mod editor;
mod output;
mod resolver;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Quire - plain-file notes that sync through any shared folder")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Synchronize with the configured sync location
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// How to resolve conflicts (keep-remote, keep-local, keep-both, ask)
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// Show status (storage, sync)
    Status,
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a new note
    #[command(alias = "create")]
    Add {
        /// Note title
        title: String,
        /// Note body (opens editor if not provided)
        #[arg(short, long)]
        body: Option<String>,
    },
    /// List all notes
    #[command(alias = "ls")]
    List,
    /// Show a note
    Show {
        /// Note ID (full UUID or prefix)
        id: String,
    },
    /// Edit a note (opens editor if no field is given)
    Edit {
        /// Note ID (full UUID or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Delete a note
    #[command(alias = "delete")]
    Rm {
        /// Note ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, sync_path, conflict_policy, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Show sync pairing and pending local changes
    Status,
    /// Check a sync location and save it
    Setup {
        /// Shared folder or mount point
        path: PathBuf,
        /// Command that mounts the folder before each sync
        #[arg(long)]
        mount_command: Option<String>,
        /// Command that unmounts the folder after each sync
        #[arg(long)]
        unmount_command: Option<String>,
    },
    /// Forget the sync location and local sync state
    Unlink,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Commands that manage the config file itself
    match cli.command {
        Commands::Config { command } => {
            return handle_config_command(command, config_path, &output);
        }
        Commands::Sync {
            command: Some(SyncCommands::Setup {
                path,
                mount_command,
                unmount_command,
            }),
            ..
        } => {
            return commands::sync::setup(
                path,
                mount_command,
                unmount_command,
                config_path,
                &output,
            );
        }
        Commands::Sync {
            command: Some(SyncCommands::Unlink),
            ..
        } => {
            return commands::sync::unlink(config_path, &output);
        }
        command => {
            let config = Config::load_with_cli_override(config_path)
                .context("Failed to load configuration")?;
            init_logging(&config);
            run(command, &config, &output).await
        }
    }
}

async fn run(command: Commands, config: &Config, output: &Output) -> Result<()> {
    match command {
        Commands::Note { command } => {
            let mut store = FileNoteStore::open(config.notes_dir())?;
            handle_note_command(command, &mut store, output)
        }
        Commands::Status => {
            let store = FileNoteStore::open(config.notes_dir())?;
            commands::status::show(config, &store, output)
        }
        Commands::Sync {
            command: Some(SyncCommands::Status),
            ..
        } => commands::sync::status(config, output),
        Commands::Sync { policy, .. } => commands::sync::sync(config, policy, output).await,
        Commands::Config { .. } => unreachable!(), // Handled in main
    }
}

fn handle_note_command(
    command: NoteCommands,
    store: &mut FileNoteStore,
    output: &Output,
) -> Result<()> {
    match command {
        NoteCommands::Add { title, body } => commands::note::add(store, title, body, output),
        NoteCommands::List => commands::note::list(store, output),
        NoteCommands::Show { id } => commands::note::show(store, id, output),
        NoteCommands::Edit { id, title, body } => {
            commands::note::edit(store, id, title, body, output)
        }
        NoteCommands::Rm { id } => commands::note::delete(store, id, output),
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Only initializes if QUIRE_LOG is set. Logs go to the configured log file,
/// or stderr when none is set.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("QUIRE_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "quire_core={},quire_cli={}",
        log_level, log_level
    ));

    let Some(ref log_path) = config.log_file else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    tracing::info!("Logging initialized to {:?}", log_path);
}
