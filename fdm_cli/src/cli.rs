use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "fdm", about = "FFF motion/thermal core front end", version)]
pub struct Cli {
    /// Path to the machine TOML configuration.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error|warn|info|debug|trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Log rotation when --log-file is set: never|daily|hourly.
    #[arg(long, global = true)]
    pub log_rotation: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream a move file through the planner against simulated hardware.
    Print {
        /// G-code-style move file (G0/G1/G92/M104/M109/M140/M190/...).
        file: PathBuf,
        /// Print a JSON summary line when done.
        #[arg(long)]
        summary: bool,
    },
    /// Parse and validate the configuration, then exit.
    CheckConfig,
    /// Inspect or write the persisted settings image.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Print the image at PATH (or defaults when absent).
    Show { path: PathBuf },
    /// Write factory defaults to PATH.
    Reset { path: PathBuf },
}
