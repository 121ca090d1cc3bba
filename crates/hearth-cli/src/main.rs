//! Hearth CLI - game agent execution core.
//!
//! Single binary that provides:
//! - `hearth init` - write a default config
//! - `hearth check` - screen and stage a script without running it
//! - `hearth run` - run a script against the headless world
//! - `hearth modes` - list or toggle reactive modes
//! - `hearth status` - saved session and recent events
//! - `hearth agent` - run the agent loop

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use hearth_core::{Executor, GameWorld};
use hearth_kernel::{
    adapters, Agent, AgentConfig, AgentError, EventEmitter, HeadlessWorld, SessionState,
    SessionStore, CONFIG_PATH,
};
use hearth_script::{Harness, SafetyFilter, Stager};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Game agent execution core", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config to .hearth/config.yaml
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Screen and stage a script without running it
    Check {
        /// Script body to check
        file: PathBuf,
    },

    /// Run a script against the headless world
    Run {
        /// Script body to run
        file: PathBuf,

        /// Override the configured timeout; zero disables it
        #[arg(long)]
        timeout_mins: Option<f64>,
    },

    /// List reactive modes or toggle them in the saved session
    Modes {
        /// Mode to turn on
        #[arg(long)]
        enable: Vec<String>,

        /// Mode to turn off
        #[arg(long)]
        disable: Vec<String>,
    },

    /// Show the saved session and recent events
    Status,

    /// Run the agent loop until interrupted
    Agent {
        /// Start self-prompting toward this goal
        #[arg(long)]
        goal: Option<String>,

        /// Carry out one instruction before entering the loop
        #[arg(long)]
        instruction: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(false).init(),
    }

    let project_root = match cli.project {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Init { force } => init_project(&project_root, force),
        Commands::Check { file } => check_script(&project_root, &file),
        Commands::Run { file, timeout_mins } => run_script(&project_root, &file, timeout_mins).await,
        Commands::Modes { enable, disable } => toggle_modes(&project_root, &enable, &disable),
        Commands::Status => show_status(&project_root),
        Commands::Agent { goal, instruction } => run_agent(&project_root, goal, instruction).await,
    }
}

fn load_config(project_root: &Path) -> Result<AgentConfig> {
    let mut config = AgentConfig::load_from_project(project_root)?;
    config.resolve_paths(project_root);
    Ok(config)
}

fn stager(config: &AgentConfig) -> Result<Stager> {
    let harness = match &config.harness_path {
        Some(path) => Harness::load(path)
            .with_context(|| format!("Failed to load harness from {}", path.display()))?,
        None => Harness::default(),
    };
    Ok(Stager::new(harness))
}

fn init_project(project_root: &Path, force: bool) -> Result<()> {
    let path = project_root.join(CONFIG_PATH);
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    AgentConfig::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn check_script(project_root: &Path, file: &Path) -> Result<()> {
    let config = load_config(project_root)?;
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let violations = SafetyFilter::new().violations(&code);
    if !violations.is_empty() {
        anyhow::bail!("Script rejected: {}", violations.join(", "));
    }
    let staged = stager(&config)?.stage(&code)?;
    println!("OK: {} staged ({} lines)", file.display(), staged.source().lines().count());
    Ok(())
}

async fn run_script(project_root: &Path, file: &Path, timeout_mins: Option<f64>) -> Result<()> {
    let config = load_config(project_root)?;
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if !SafetyFilter::new().check(&code) {
        anyhow::bail!("Script rejected by the safety filter");
    }

    let mut stager = stager(&config)?;
    if let Some(dir) = &config.code_dir {
        stager = stager.with_code_dir(dir);
    }
    let staged = stager.stage(&code)?;
    if let Some(path) = staged.path() {
        tracing::info!(path = %path.display(), "staged script");
    }

    let world = Arc::new(HeadlessWorld::new(&config.name));
    let executor = Executor::new(world.clone() as Arc<dyn GameWorld>, config.executor_config());
    executor.set_harness_loaded(true);
    let timeout = match timeout_mins {
        Some(mins) => hearth_core::timeout_from_minutes(mins),
        None => config.code_timeout(),
    };

    let result = executor.execute("newAction", staged.into_action(), timeout).await;

    println!("{}", result.message_or_empty().trim_end());
    println!();
    println!(
        "success: {}  interrupted: {}  timed out: {}  skill calls: {}",
        result.success,
        result.interrupted,
        result.timed_out,
        world.calls().len()
    );
    if !result.success {
        anyhow::bail!("Script failed");
    }
    Ok(())
}

fn toggle_modes(project_root: &Path, enable: &[String], disable: &[String]) -> Result<()> {
    let config = load_config(project_root)?;
    let store = SessionStore::new(&config.profile_dir);
    let mut session = store.load()?.unwrap_or_else(|| SessionState {
        modes: config.modes.clone(),
        ..SessionState::default()
    });

    let changes = enable
        .iter()
        .map(|name| (name, true))
        .chain(disable.iter().map(|name| (name, false)));
    let mut changed = false;
    for (name, on) in changes {
        if !hearth_modes::MODE_NAMES.contains(&name.as_str()) {
            anyhow::bail!("Unknown mode: {name}");
        }
        session.modes.insert(name.clone(), on);
        changed = true;
    }
    if changed {
        store.save(&session)?;
    }

    println!("Modes:");
    for name in hearth_modes::MODE_NAMES {
        let on = session
            .modes
            .get(*name)
            .or_else(|| config.modes.get(*name))
            .copied()
            .unwrap_or(false);
        println!("  {:<18} {}", name, if on { "on" } else { "off" });
    }
    Ok(())
}

fn show_status(project_root: &Path) -> Result<()> {
    let config = load_config(project_root)?;
    let session = SessionStore::new(&config.profile_dir).load()?;
    let events = EventEmitter::new(&config.profile_dir);
    let recent_events = events.read_recent(5);

    println!("Hearth Agent Status");
    println!("===================");
    println!();
    println!("Agent: {} ({} / {})", config.name, config.model.provider, config.model.model);
    println!("Profile: {}", config.profile_dir.display());
    println!();
    match session {
        Some(session) => {
            let saved = session
                .saved_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("Session saved: {saved}");
            println!("Turns: {}", session.turns.len());
            match &session.self_prompt {
                Some(goal) if session.self_prompting => println!("Self-prompting: {goal}"),
                Some(goal) => println!("Last goal: {goal}"),
                None => println!("Self-prompting: off"),
            }
        }
        None => println!("No saved session"),
    }
    println!();
    println!("Recent events:");
    for event in &recent_events {
        println!(
            "  {} [{}] {}",
            event.timestamp.format("%H:%M:%S"),
            event.event_type,
            event.message.lines().next().unwrap_or_default()
        );
    }

    Ok(())
}

async fn run_agent(project_root: &Path, goal: Option<String>, instruction: Option<String>) -> Result<()> {
    let config = load_config(project_root)?;
    tracing::info!(project = %project_root.display(), name = %config.name, "Starting agent");

    let model = adapters::build(&config.model)?;
    let world = Arc::new(HeadlessWorld::new(&config.name));
    let agent = Agent::new(config, world, model)?;

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
    events_tx
        .send(hearth_core::WorldEvent::Spawn)
        .await
        .context("Failed to deliver spawn event")?;

    if let Some(instruction) = instruction {
        let outcome = agent.new_action(&instruction).await;
        println!("{}", outcome.message().unwrap_or("(no output)"));
    }
    if goal.is_some() {
        agent.start_self_prompting(goal)?;
    }

    // Closing the channel ends the loop and saves the session.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        tracing::info!("Shutting down");
        drop(events_tx);
    });

    match agent.run(events_rx).await {
        Ok(()) => Ok(()),
        Err(AgentError::Disconnected { reason }) => anyhow::bail!("Disconnected: {reason}"),
    }
}
