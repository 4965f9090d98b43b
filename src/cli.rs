use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use clap::{Parser, ValueEnum};
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "savekeeper")]
#[command(version)]
#[command(about = "Keeps a rolling history of the files in a directory so you can roll them back")]
#[command(long_about = "savekeeper watches a directory (typically a game's save folder), snapshots every file whenever it changes, keeps the most recent snapshots per file, and lets you restore any of them from a terminal UI or console.")]
pub struct Cli {
    /// Directory to watch for changes
    #[arg(value_name = "PATH", help = "Directory to watch (defaults to the configured one)")]
    pub path: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = "savekeeper.toml", help = "Path of the config file")]
    pub config: PathBuf,

    /// Where snapshots are stored
    #[arg(long, help = "Backup root directory (overrides the config file)")]
    pub backup_root: Option<PathBuf>,

    /// Output mode
    #[arg(long, default_value = "tui", help = "Output format")]
    pub output: OutputFormat,

    /// Log file used while the TUI owns the terminal
    #[arg(long, default_value = "savekeeper.log", help = "Log file for TUI mode")]
    pub log_file: PathBuf,

    /// Never ring the terminal bell
    #[arg(long, help = "Disable feedback sounds")]
    pub no_sound: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Terminal user interface (default)
    Tui,
    /// Plain text snapshot summaries, commands on stdin
    Text,
    /// One JSON snapshot per line, commands on stdin
    Json,
}

impl Cli {
    /// Remember `PATH` as the watched directory. This is the only flag that
    /// is written back to the config file.
    pub fn apply_path(&self, config: &mut AppConfig) {
        if let Some(path) = &self.path {
            config.watch_dir = Some(path.clone());
        }
    }

    /// Overrides that only last for this run.
    pub fn apply_session_flags(&self, config: &mut AppConfig) {
        if let Some(root) = &self.backup_root {
            config.backup_root = root.clone();
        }
        if self.no_sound {
            config.play_sounds = false;
        }
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        let builder = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false);

        if self.output == OutputFormat::Tui {
            match File::create(&self.log_file) {
                Ok(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).init(),
                Err(err) => {
                    eprintln!("Could not open log file {}: {}", self.log_file.display(), err);
                    builder.with_writer(std::io::sink).init();
                }
            }
        } else {
            builder.with_writer(std::io::stderr).init();
        }
    }

    pub fn validate(config: &AppConfig) -> Result<PathBuf, String> {
        let Some(path) = config.watch_dir.clone() else {
            return Err("No directory to watch: pass PATH or set watch_dir in the config".to_string());
        };

        if !path.exists() {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        if !path.is_dir() {
            return Err(format!("Path is not a directory: {}", path.display()));
        }

        config.validate()?;

        Ok(path)
    }
}
