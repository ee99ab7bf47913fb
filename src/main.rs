//! Pomodoro Timer CLI
//!
//! This tool helps you stay focused using a fixed pomodoro cycle:
//! - 25 minutes of focused work followed by a 5 minute break, three times
//! - a fourth 25 minute work session followed by a 15 minute long break

use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tokio::io::BufReader;

use pomodoro::cli::{Cli, Commands, Display, IpcClient};
use pomodoro::clock::{Clock, SystemClock};
use pomodoro::config::Config;
use pomodoro::daemon;
use pomodoro::store::{FileStore, StateStore};
use pomodoro::types::IpcRequest;
use pomodoro::viewer::{PlainSurface, Surface, TerminalSurface, Viewer, KEY_HELP};

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose, matches!(cli.command, Some(Commands::Daemon)));

    // Execute command
    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
///
/// Logs go to stderr so that `watch` output on stdout stays clean.
fn init_tracing(verbose: bool, is_daemon: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if is_daemon {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let Some(command) = cli.command.clone() else {
        // No command provided, show help
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Completions { shell } = command {
        generate_completions(shell);
        return Ok(());
    }

    let config = Config::load(&cli.overrides())?;
    let client = IpcClient::new(&config.socket_path);

    match command {
        Commands::Daemon => daemon::run(config).await?,
        Commands::Start => Display::show_start_success(&client.start().await?),
        Commands::Pause => Display::show_pause_success(&client.pause().await?),
        Commands::Reset => Display::show_reset_success(&client.reset().await?),
        Commands::Preset { preset } => {
            let response = client.apply_preset(preset).await?;
            Display::show_preset_success(preset, &response);
        }
        Commands::Jump { position } => Display::show_jump_success(&client.jump(position).await?),
        Commands::Status => show_status(&client, &config).await?,
        Commands::Watch { plain } => {
            if plain {
                watch(client, &config, PlainSurface::new()).await?;
            } else {
                watch(client, &config, TerminalSurface::open()?).await?;
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Shows the daemon's state, or the last saved one if it is not running.
async fn show_status(client: &IpcClient, config: &Config) -> Result<()> {
    match client.send_once(&IpcRequest::GetState).await {
        Ok(response) => Display::show_status(&response),
        Err(e) => {
            tracing::debug!("Daemonから状態を取得できません: {:#}", e);
            let store = FileStore::new(&config.state_path);
            let saved = store.load().await?;
            Display::show_offline_status(saved.as_ref(), SystemClock.now_millis());
        }
    }
    Ok(())
}

/// Runs a viewer on stdin until the user quits.
async fn watch<U: Surface>(client: IpcClient, config: &Config, surface: U) -> Result<()> {
    eprintln!("{}", KEY_HELP);

    let store = FileStore::new(&config.state_path);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let viewer = Viewer::init(&store, Arc::new(client), surface, clock, config).await;
    viewer.run(BufReader::new(tokio::io::stdin())).await?;
    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
