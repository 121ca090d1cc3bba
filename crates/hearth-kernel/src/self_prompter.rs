//! Self-prompting: the agent keeps working toward a goal without a user.
//!
//! While active, a background loop asks for one action per cycle. A loop that
//! is stopped from outside (for example by a reacting mode) is restarted by
//! [`SelfPrompter::update`] once the agent has been idle for the cooldown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::{Executor, SelfPromptHandle, SelfPromptState};
use parking_lot::Mutex;

/// Consecutive cycles without a successful action before the loop gives up.
pub const MAX_MISSES: u32 = 3;

/// One self-prompted step, supplied by the agent.
#[async_trait]
pub trait PromptCycle: Send + Sync {
    /// Returns true when the step produced a successful action.
    async fn step(&self, prompt: &str) -> bool;

    /// Tell the conversation something about the loop itself.
    fn notify(&self, _message: &str) {}
}

struct Inner {
    handle: SelfPromptHandle,
    goal: Mutex<Option<String>>,
    cooldown: Duration,
    pause_between: Duration,
    idle_for: Mutex<Duration>,
}

#[derive(Clone)]
pub struct SelfPrompter {
    inner: Arc<Inner>,
}

impl SelfPrompter {
    pub fn new(handle: SelfPromptHandle, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                goal: Mutex::new(None),
                cooldown,
                pause_between: Duration::from_secs(2),
                idle_for: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn handle(&self) -> &SelfPromptHandle {
        &self.inner.handle
    }

    pub fn state(&self) -> SelfPromptState {
        self.inner.handle.state()
    }

    pub fn is_active(&self) -> bool {
        self.inner.handle.is_active()
    }

    pub fn goal(&self) -> Option<String> {
        self.inner.goal.lock().clone()
    }

    pub fn set_goal(&self, goal: Option<String>) {
        *self.inner.goal.lock() = goal;
    }

    /// Turn self-prompting on. Without a new goal the previous one is reused.
    pub fn start(&self, goal: Option<String>, cycle: Arc<dyn PromptCycle>) -> anyhow::Result<()> {
        let goal = match goal.or_else(|| self.goal()) {
            Some(goal) if !goal.trim().is_empty() => goal,
            _ => anyhow::bail!("No goal specified. Ignoring request."),
        };
        tracing::info!(goal = %goal, "self-prompting started");
        self.set_goal(Some(goal));
        self.inner.handle.set_state(SelfPromptState::Active);
        self.spawn_loop(cycle);
        Ok(())
    }

    fn spawn_loop(&self, cycle: Arc<dyn PromptCycle>) {
        if !self.inner.handle.begin_loop() {
            tracing::warn!("self-prompt loop is already running");
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.run_loop(cycle).await });
    }

    async fn run_loop(&self, cycle: Arc<dyn PromptCycle>) {
        let handle = &self.inner.handle;
        let mut misses = 0;
        while !handle.loop_interrupted() {
            let goal = self.goal().unwrap_or_default();
            let prompt = format!(
                "You are self-prompting with the goal: '{goal}'. Your next response MUST contain \
                 a code block that makes progress toward it. Respond:"
            );
            if cycle.step(&prompt).await {
                misses = 0;
                tokio::time::sleep(self.inner.pause_between).await;
                continue;
            }

            misses += 1;
            if misses >= MAX_MISSES {
                let message = format!(
                    "Agent did not complete an action in the last {MAX_MISSES} self-prompts. Stopping self-prompting."
                );
                tracing::warn!("{message}");
                cycle.notify(&message);
                handle.set_state(SelfPromptState::Stopped);
                break;
            }
        }
        tracing::info!("self-prompt loop stopped");
        handle.end_loop();
    }

    /// Restart a stopped loop once the agent has idled for the cooldown.
    pub fn update(&self, dt: Duration, agent_idle: bool, cycle: &Arc<dyn PromptCycle>) {
        let handle = &self.inner.handle;
        let restart = {
            let mut idle_for = self.inner.idle_for.lock();
            if handle.is_active() && !handle.loop_running() && !handle.loop_interrupted() {
                *idle_for = if agent_idle { *idle_for + dt } else { Duration::ZERO };
                let due = *idle_for >= self.inner.cooldown;
                if due {
                    *idle_for = Duration::ZERO;
                }
                due
            } else {
                *idle_for = Duration::ZERO;
                false
            }
        };
        if restart {
            tracing::info!("restarting self-prompting");
            self.spawn_loop(Arc::clone(cycle));
        }
    }

    /// Turn self-prompting off and wait for the loop to exit.
    pub async fn stop(&self, executor: &Executor, stop_action: bool) {
        self.halt(executor, stop_action).await;
        self.inner.handle.set_state(SelfPromptState::Stopped);
    }

    /// Like [`stop`](Self::stop) but remembers that the agent was self-prompting.
    pub async fn pause(&self, executor: &Executor) {
        self.halt(executor, true).await;
        self.inner.handle.set_state(SelfPromptState::Paused);
    }

    async fn halt(&self, executor: &Executor, stop_action: bool) {
        self.inner.handle.request_loop_stop();
        if stop_action {
            // Abort a generation still waiting on the model as well.
            executor.request_interrupt();
            if let Err(e) = executor.stop().await {
                tracing::error!(error = %e, "action did not stop for self-prompting");
            }
        }
        self.inner.handle.stop_loop().await;
    }
}
