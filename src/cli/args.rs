//! CLI argument parsing with clap.

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Pick a webcam, initialize capture and preview it live
#[derive(Parser, Debug)]
#[command(name = "camview")]
#[command(version, about = "Pick a webcam and preview it live", long_about = None)]
#[command(after_help = "EXAMPLES:
    # List cameras
    camview list-devices

    # Preview the second camera until Ctrl+C
    camview preview --device 1

    # Drive capture and preview step by step
    camview interactive")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Log level requested on the command line.
    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            return log::LevelFilter::Error;
        }
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available video capture devices
    ListDevices {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture and preview one device until Ctrl+C
    Preview(SessionArgs),
    /// Drive the session with typed actions (default)
    Interactive(SessionArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by the session-driving subcommands.
#[derive(ClapArgs, Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionArgs {
    /// Device index (from list-devices); overrides the config file
    #[arg(long, short)]
    pub device: Option<usize>,

    /// Buffer the preview instead of favoring latency
    #[arg(long)]
    pub no_real_time: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
