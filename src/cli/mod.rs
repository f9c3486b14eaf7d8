//! Command-line interface.
//!
//! `play` (the default) opens the interactive prompt. The one-shot commands
//! drive a single operation through the turn controller, wait for it to
//! settle and print the transcript. `state` edits the session file directly.

mod repl;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::api::HttpGameApi;
use crate::config::Config;
use crate::controller::{ControllerHandle, TurnController};
use crate::render::Renderer;
use crate::session::{SessionStore, TurnEnd};

pub use state::{StateCommand, run_state_command};

#[derive(Parser, Debug)]
#[command(name = "questline", version, about = "Terminal client for the AI quest game")]
pub struct Cli {
    /// Backend base URL (overrides QUEST_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Session file (overrides QUEST_STATE_PATH)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Delay before each status check, in milliseconds
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Maximum status checks per turn
    #[arg(long, global = true)]
    pub max_poll_retries: Option<u32>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Interactive prompt (default)
    Play,

    /// Start a new game and print the opening
    New,

    /// Submit one turn and print the reply
    Say {
        /// Message to send
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Fetch and print the conversation log
    Log,

    /// Poll the last run again after a failed or abandoned turn
    Resume,

    /// Inspect or edit the persisted session fields
    #[command(subcommand)]
    State(StateCommand),
}

impl Cli {
    /// Apply command-line overrides on top of the environment config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api = config.api.clone().with_base_url(url);
        }
        if let Some(path) = &self.state {
            config.state_path = path.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll = config.poll.with_interval(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_poll_retries {
            config.poll = config.poll.with_max_retries(retries);
        }
    }
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    cli.apply_overrides(&mut config);
    tracing::debug!(
        "Using backend {} and session file {}",
        config.api.base_url,
        config.state_path.display()
    );

    let renderer = Renderer::default().with_color(!cli.no_color);

    match cli.command.unwrap_or(Command::Play) {
        Command::State(cmd) => run_state_command(cmd, &config.state_path),
        Command::Play => {
            let handle = start_controller(&config)?;
            let result = repl::run_repl(&handle, renderer).await;
            handle.shutdown().await;
            result
        }
        command => {
            let handle = start_controller(&config)?;
            let result = run_once(command, &handle, renderer).await;
            handle.shutdown().await;
            result
        }
    }
}

/// Open the session file and spawn a controller over the HTTP backend.
pub fn start_controller(config: &Config) -> anyhow::Result<ControllerHandle> {
    let store = SessionStore::open(&config.state_path)?;
    let api = HttpGameApi::new(config.api.clone())?;

    Ok(TurnController::new(Arc::new(api), store)
        .with_poll_config(config.poll)
        .with_init_delay(config.init_delay)
        .spawn())
}

async fn run_once(
    command: Command,
    handle: &ControllerHandle,
    renderer: Renderer,
) -> anyhow::Result<()> {
    // Let a restored poll or log fetch settle first.
    handle.wait_until_idle().await?;

    match command {
        Command::New => handle.start_new_game().await?,
        Command::Say { text } => {
            handle.submit_turn(text.join(" ")).await?;
        }
        Command::Log => handle.fetch_log().await?,
        Command::Resume => {
            handle.resume_polling().await?;
        }
        Command::Play | Command::State(_) => return Ok(()),
    }

    let session = handle.wait_until_idle().await?;
    print!("{}", renderer.transcript(&session.messages, &session.suggestions));

    match session.failure() {
        Some(end) => anyhow::bail!("{}", describe_turn_end(end)),
        None => Ok(()),
    }
}

pub(crate) fn describe_turn_end(end: &TurnEnd) -> String {
    match end {
        TurnEnd::Completed => "Turn completed".to_string(),
        TurnEnd::RunFailed(status) => format!(
            "The run ended with status '{}'. Use resume to poll it again or start a new game.",
            status
        ),
        TurnEnd::GaveUp {
            attempts,
            last_status,
        } => format!(
            "Gave up after {} status checks (last status '{}'). Use resume to keep waiting.",
            attempts, last_status
        ),
        TurnEnd::PollAborted(reason) => {
            format!("Status check failed: {}. Use resume to try again.", reason)
        }
        TurnEnd::SubmitFailed(reason) => format!("Could not send the turn: {}", reason),
        TurnEnd::LogFetchFailed(reason) => format!("Could not load the conversation: {}", reason),
    }
}
