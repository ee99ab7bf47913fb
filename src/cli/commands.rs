//! Command definitions for the Pomodoro Timer CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Overrides;
use crate::types::Preset;

// ============================================================================
// CLI Structure
// ============================================================================

/// Pomodoro Timer CLI - cyclic pomodoro timer with terminal viewers
#[derive(Parser, Debug)]
#[command(
    name = "pomodoro",
    version,
    about = "サイクル型ポモドーロタイマー",
    long_about = "作業25分・短い休憩5分を4回、最後に長い休憩15分を繰り返すポモドーロタイマー。\n\
                  Daemonが残り時間を管理し、watchで複数の端末から表示できます。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Unix socket path of the daemon
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// State file path
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Path overrides given on the command line.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            socket_path: self.socket.clone(),
            state_path: self.state.clone(),
            config_path: self.config.clone(),
        }
    }
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the timer daemon in the foreground
    Daemon,

    /// Start or resume the countdown
    Start,

    /// Pause the countdown
    Pause,

    /// Reset to the first work session
    Reset,

    /// Reset, set a preset duration and start
    Preset {
        /// Preset to apply
        #[arg(value_enum)]
        preset: Preset,
    },

    /// Move to a cycle position (1-8) and stop the countdown
    Jump {
        /// Cycle position
        #[arg(value_parser = clap::value_parser!(u8).range(1..=8))]
        position: u8,
    },

    /// Show current timer status
    Status,

    /// Show a live countdown that follows the daemon
    Watch {
        /// Print one line per change instead of redrawing in place
        #[arg(long)]
        plain: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Tests
// ============================================================================
