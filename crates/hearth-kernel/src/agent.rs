//! The agent: one executor, the reactive modes, the coder and the memory that
//! survives restarts, driven by a tick loop and the world's event stream.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hearth_core::{
    Action, ActionResult, Arbitrator, Executor, ExecutorEvent, FatalHandler, GameWorld,
    SelfPromptHandle, SelfPromptState, WorldEvent,
};
use hearth_modes::survival::UNSTUCK;
use hearth_script::{Harness, Stager};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::adapters::Model;
use crate::coder::{CodeOutcome, Coder, CoderSettings, NEW_ACTION};
use crate::config::AgentConfig;
use crate::history::{History, SessionState, SessionStore, Turn};
use crate::observability::EventEmitter;
use crate::self_prompter::{PromptCycle, SelfPrompter};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("disconnected from the world: {reason}")]
    Disconnected { reason: String },
}

type ExitHook = Box<dyn Fn(&str) + Send + Sync>;

/// Terminates the process when an action refuses to stop. The armed hook
/// runs first so the session can be saved.
#[derive(Default)]
pub struct ProcessExit {
    on_exit: OnceLock<ExitHook>,
}

impl ProcessExit {
    pub fn arm(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        if self.on_exit.set(Box::new(hook)).is_err() {
            tracing::warn!("exit hook already armed");
        }
    }
}

impl FatalHandler for ProcessExit {
    fn stop_refused(&self, action: &str) {
        let reason = format!("Action '{action}' refused to stop. Killing process.");
        tracing::error!(action, "{reason}");
        if let Some(hook) = self.on_exit.get() {
            hook(&reason);
        }
        std::process::exit(1);
    }
}

struct Core {
    config: AgentConfig,
    executor: Executor,
    arbitrator: Mutex<Arbitrator>,
    coder: Coder,
    history: Mutex<History>,
    self_prompter: SelfPrompter,
    store: SessionStore,
    events: EventEmitter,
}

impl Core {
    async fn code(&self) -> CodeOutcome {
        self.arbitrator.lock().pause(UNSTUCK);
        let turns = self.history.lock().turns().to_vec();
        let outcome = self.coder.generate(&turns).await;
        if let Some(message) = outcome.message() {
            self.history.lock().add(Turn::system(message));
        }
        let event = self.events.event(
            "generation_finished",
            Some(NEW_ACTION),
            outcome.message().unwrap_or_default(),
            serde_json::json!({ "outcome": outcome_kind(&outcome) }),
        );
        if let Err(e) = self.events.emit(event) {
            tracing::warn!(error = %e, "failed to record generation");
        }
        outcome
    }

    fn snapshot(&self) -> SessionState {
        SessionState {
            turns: self.history.lock().turns().to_vec(),
            modes: self.arbitrator.lock().enabled_map(),
            self_prompt: self.self_prompter.goal(),
            self_prompting: self.self_prompter.state() != SelfPromptState::Stopped,
            saved_at: None,
        }
    }

    fn save(&self) -> Result<()> {
        self.store.save(&self.snapshot())
    }

    fn note(&self, event_type: &str, message: &str) {
        if let Err(e) = self.events.emit_simple(event_type, message) {
            tracing::warn!(error = %e, event_type, "failed to record event");
        }
    }
}

fn outcome_kind(outcome: &CodeOutcome) -> &'static str {
    match outcome {
        CodeOutcome::Completed(_) => "completed",
        CodeOutcome::Failed(_) => "failed",
        CodeOutcome::Interrupted => "interrupted",
        CodeOutcome::RoundsExhausted => "rounds_exhausted",
    }
}

#[async_trait]
impl PromptCycle for Core {
    async fn step(&self, prompt: &str) -> bool {
        self.history.lock().add(Turn::system(prompt));
        self.code().await.is_success()
    }

    fn notify(&self, message: &str) {
        self.history.lock().add(Turn::system(message));
    }
}

#[derive(Clone)]
pub struct Agent {
    core: Arc<Core>,
}

impl Agent {
    /// Build an agent from config and restore the saved session, if any.
    pub fn new(config: AgentConfig, world: Arc<dyn GameWorld>, model: Arc<dyn Model>) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let handle = SelfPromptHandle::new();
        let fatal = Arc::new(ProcessExit::default());
        let executor = Executor::with_hooks(
            world,
            config.executor_config(),
            handle.clone(),
            fatal.clone(),
        );

        let harness = match &config.harness_path {
            Some(path) => Harness::load(path)
                .with_context(|| format!("Failed to load harness from {}", path.display()))?,
            None => Harness::default(),
        };
        let mut stager = Stager::new(harness);
        if let Some(dir) = &config.code_dir {
            stager = stager.with_code_dir(dir);
        }
        executor.set_harness_loaded(true);

        let coder = Coder::new(
            executor.clone(),
            model,
            stager,
            CoderSettings::from_config(&config),
        );
        let mut arbitrator = Arbitrator::new(
            executor.clone(),
            handle.clone(),
            hearth_modes::default_modes(),
        );
        arbitrator.load_enabled_map(&config.modes);

        let store = SessionStore::new(&config.profile_dir);
        let events = EventEmitter::new(&config.profile_dir).for_run(run_id);
        let mut history = History::new(config.max_history_turns);
        let self_prompter = SelfPrompter::new(handle.clone(), config.self_prompt_cooldown());

        let saved = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %format!("{e:#}"), "ignoring unreadable session");
            None
        });
        if let Some(saved) = saved {
            tracing::info!(turns = saved.turns.len(), "restoring session");
            history.restore(saved.turns);
            arbitrator.load_enabled_map(&saved.modes);
            self_prompter.set_goal(saved.self_prompt.clone());
            // The loop itself is restarted by the tick once the agent idles.
            if saved.self_prompting && saved.self_prompt.is_some() {
                handle.set_state(SelfPromptState::Active);
            }
        }

        let core = Arc::new(Core {
            config,
            executor,
            arbitrator: Mutex::new(arbitrator),
            coder,
            history: Mutex::new(history),
            self_prompter,
            store,
            events,
        });

        let weak: Weak<Core> = Arc::downgrade(&core);
        fatal.arm(move |reason| {
            if let Some(core) = weak.upgrade() {
                core.history.lock().add(Turn::system(reason));
                if let Err(e) = core.save() {
                    tracing::error!(error = %format!("{e:#}"), "failed to save session before exit");
                }
            }
        });

        tracing::info!(name = %core.config.name, run_id = %run_id, "agent ready");
        Ok(Self { core })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.core.config
    }

    pub fn executor(&self) -> &Executor {
        &self.core.executor
    }

    pub fn self_prompter(&self) -> &SelfPrompter {
        &self.core.self_prompter
    }

    pub fn history(&self) -> Vec<Turn> {
        self.core.history.lock().turns().to_vec()
    }

    pub fn describe_modes(&self) -> String {
        self.core.arbitrator.lock().describe()
    }

    /// Turn a mode on or off. False when no mode has that name.
    pub fn set_mode(&self, name: &str, on: bool) -> bool {
        self.core.arbitrator.lock().set_on(name, on)
    }

    /// Ask the model for code that carries out `instruction` and run it.
    pub async fn new_action(&self, instruction: &str) -> CodeOutcome {
        self.core.history.lock().add(Turn::user(instruction));
        self.core.code().await
    }

    /// Run a long-lived action that is picked up again whenever the agent
    /// goes idle, until it completes.
    pub async fn execute_resumable(&self, name: &str, action: Arc<dyn Action>) -> ActionResult {
        self.core
            .executor
            .execute_resume(Some((name, action)), self.core.config.code_timeout())
            .await
    }

    pub fn start_self_prompting(&self, goal: Option<String>) -> Result<()> {
        self.core.self_prompter.start(goal, self.cycle())
    }

    pub async fn stop_self_prompting(&self) {
        self.core.self_prompter.stop(&self.core.executor, true).await;
    }

    pub fn snapshot(&self) -> SessionState {
        self.core.snapshot()
    }

    pub fn save(&self) -> Result<()> {
        self.core.save()
    }

    fn cycle(&self) -> Arc<dyn PromptCycle> {
        self.core.clone()
    }

    /// Drive the agent until the world goes away.
    ///
    /// Returns `Ok` when the event stream closes and
    /// [`AgentError::Disconnected`] when the world disconnects or kicks the
    /// agent. The session is saved in both cases.
    pub async fn run(&self, mut world_events: mpsc::Receiver<WorldEvent>) -> Result<(), AgentError> {
        let core = &self.core;
        let cycle = self.cycle();
        let mut executor_events = core.executor.subscribe();
        let mut ticker = tokio::time::interval(core.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();
        core.note("agent_started", &format!("{} is online", core.config.name));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.tick(now - last_tick, &cycle);
                    last_tick = now;
                }
                event = executor_events.recv() => match event {
                    Ok(ExecutorEvent::Idle) => self.on_idle(),
                    Ok(event) => {
                        if let Err(e) = core.events.record_executor(&event) {
                            tracing::warn!(error = %e, "failed to record executor event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "executor events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                event = world_events.recv() => match event {
                    Some(WorldEvent::Spawn) => {
                        tracing::info!("spawned");
                        core.note("spawn", "");
                    }
                    Some(WorldEvent::Damage { amount }) => {
                        tracing::debug!(amount, "took damage");
                    }
                    Some(WorldEvent::Death) => self.on_death(),
                    Some(WorldEvent::Disconnect { reason }) | Some(WorldEvent::Kicked { reason }) => {
                        return Err(self.shutdown(reason).await);
                    }
                    None => {
                        tracing::info!("world event stream closed");
                        self.persist();
                        return Ok(());
                    }
                },
            }
        }
    }

    fn tick(&self, dt: Duration, cycle: &Arc<dyn PromptCycle>) {
        let core = &self.core;
        let log = {
            let mut arbitrator = core.arbitrator.lock();
            arbitrator.tick();
            arbitrator.flush_behavior_log()
        };
        let log = log.trim();
        if !log.is_empty() {
            core.history.lock().add(Turn::system(log));
        }
        core.self_prompter.update(dt, core.executor.is_idle(), cycle);
    }

    fn on_idle(&self) {
        let core = &self.core;
        core.arbitrator.lock().unpause_all();
        if !core.executor.has_resume() {
            return;
        }
        let executor = core.executor.clone();
        let timeout = core.config.code_timeout();
        tokio::spawn(async move {
            let result = executor.execute_resume(None, timeout).await;
            tracing::debug!(success = result.success, "resume attempt finished");
        });
    }

    fn on_death(&self) {
        let core = &self.core;
        tracing::info!("agent died");
        core.note("death", "");
        core.history.lock().add(Turn::system("You died."));
        core.executor.cancel_resume();
        let executor = core.executor.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.stop().await {
                tracing::error!(error = %e, "failed to stop action after death");
            }
        });
    }

    async fn shutdown(&self, reason: String) -> AgentError {
        let core = &self.core;
        tracing::warn!(reason = %reason, "disconnected");
        core.self_prompter.handle().request_loop_stop();
        if let Err(e) = core.executor.stop().await {
            tracing::error!(error = %e, "action did not stop on disconnect");
        }
        core.history
            .lock()
            .add(Turn::system(format!("Bot disconnected: {reason}")));
        self.persist();
        core.note("disconnected", &reason);
        AgentError::Disconnected { reason }
    }

    fn persist(&self) {
        if let Err(e) = self.core.save() {
            tracing::error!(error = %format!("{e:#}"), "failed to save session");
        }
    }
}
