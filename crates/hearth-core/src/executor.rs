//! Action executor - owns the single "currently running action" slot.
//!
//! At most one action runs at a time. Starting a new action force-stops the
//! previous one first; stopping is cooperative (raise the interrupt flag,
//! forward cancellation to the world driver, wait) with a hard deadline after
//! which the stuck action is escalated to the [`FatalHandler`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionContext, Interrupted, OutputBuffer};
use crate::result::{summarize_output, ActionResult, DEFAULT_OUTPUT_BUDGET};
use crate::self_prompt::SelfPromptHandle;
use crate::world::GameWorld;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Characters of captured output kept in a result message.
    pub output_budget: usize,
    /// How often `stop` re-raises the interrupt while waiting.
    pub stop_poll_interval: Duration,
    /// How long `stop` waits before declaring the action unstoppable.
    pub stop_deadline: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            output_budget: DEFAULT_OUTPUT_BUDGET,
            stop_poll_interval: Duration::from_secs(1),
            stop_deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("action '{action}' did not stop within {waited:?}")]
    StopRefused { action: String, waited: Duration },
}

/// Lifecycle notifications broadcast by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Started { action: String },
    Finished { action: String, result: ActionResult },
    /// The agent has nothing running and nothing generating.
    Idle,
    StopRefused { action: String },
}

/// Invoked when a running action ignores cancellation past the hard deadline.
pub trait FatalHandler: Send + Sync {
    fn stop_refused(&self, action: &str);
}

/// Logs the condition and leaves the process running.
#[derive(Debug, Default)]
pub struct LogFatal;

impl FatalHandler for LogFatal {
    fn stop_refused(&self, action: &str) {
        tracing::error!(action, "action refused to stop");
    }
}

/// Read-only copy of the executor's lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorState {
    pub executing: bool,
    pub generating: bool,
    pub last_output: String,
    pub current_action: String,
}

#[derive(Clone)]
struct ResumeSlot {
    name: String,
    action: Arc<dyn Action>,
}

#[derive(Default)]
struct Slot {
    executing: bool,
    current_action: String,
    timed_out: bool,
    resume: Option<ResumeSlot>,
}

struct Inner {
    world: Arc<dyn GameWorld>,
    config: ExecutorConfig,
    slot: Mutex<Slot>,
    generating: AtomicBool,
    harness_loaded: AtomicBool,
    interrupt: Mutex<CancellationToken>,
    output: OutputBuffer,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    finished: Notify,
    events: broadcast::Sender<ExecutorEvent>,
    fatal: Arc<dyn FatalHandler>,
    self_prompt: SelfPromptHandle,
}

#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    pub fn new(world: Arc<dyn GameWorld>, config: ExecutorConfig) -> Self {
        Self::with_hooks(world, config, SelfPromptHandle::new(), Arc::new(LogFatal))
    }

    pub fn with_hooks(
        world: Arc<dyn GameWorld>,
        config: ExecutorConfig,
        self_prompt: SelfPromptHandle,
        fatal: Arc<dyn FatalHandler>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                world,
                config,
                slot: Mutex::new(Slot::default()),
                generating: AtomicBool::new(false),
                harness_loaded: AtomicBool::new(false),
                interrupt: Mutex::new(CancellationToken::new()),
                output: OutputBuffer::new(),
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
                finished: Notify::new(),
                events,
                fatal,
                self_prompt,
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn world(&self) -> Arc<dyn GameWorld> {
        Arc::clone(&self.inner.world)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_harness_loaded(&self, loaded: bool) {
        self.inner.harness_loaded.store(loaded, Ordering::SeqCst);
    }

    pub fn harness_loaded(&self) -> bool {
        self.inner.harness_loaded.load(Ordering::SeqCst)
    }

    pub fn is_executing(&self) -> bool {
        self.inner.slot.lock().executing
    }

    pub fn is_generating(&self) -> bool {
        self.inner.generating.load(Ordering::SeqCst)
    }

    pub fn set_generating(&self, generating: bool) {
        self.inner.generating.store(generating, Ordering::SeqCst);
    }

    /// Mark a generation conversation as in progress until the guard drops.
    pub fn begin_generating(&self) -> GeneratingGuard {
        self.set_generating(true);
        GeneratingGuard {
            executor: self.clone(),
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.is_executing() && !self.is_generating()
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupt.lock().is_cancelled()
    }

    pub fn current_action_name(&self) -> String {
        self.inner.slot.lock().current_action.clone()
    }

    pub fn set_current_action_name(&self, name: impl Into<String>) {
        self.inner.slot.lock().current_action = name.into();
    }

    pub fn has_resume(&self) -> bool {
        self.inner.slot.lock().resume.is_some()
    }

    pub fn resume_name(&self) -> Option<String> {
        self.inner.slot.lock().resume.as_ref().map(|r| r.name.clone())
    }

    pub fn cancel_resume(&self) {
        self.inner.slot.lock().resume = None;
    }

    pub fn state(&self) -> ExecutorState {
        let slot = self.inner.slot.lock();
        ExecutorState {
            executing: slot.executing,
            generating: self.is_generating(),
            last_output: self.inner.output.snapshot(),
            current_action: slot.current_action.clone(),
        }
    }

    /// Reset the output buffer and the interrupt flag. The resume slot is left
    /// alone. Ignored while an action is running, since that action holds the
    /// current flag.
    pub fn clear(&self) {
        if self.is_executing() {
            tracing::warn!("clear requested while an action is running; ignored");
            return;
        }
        self.reset_run_state();
    }

    fn reset_run_state(&self) {
        self.inner.output.clear();
        *self.inner.interrupt.lock() = CancellationToken::new();
        self.inner.slot.lock().timed_out = false;
    }

    /// Raise the interrupt flag and forward cancellation to the world driver
    /// without waiting for anything to exit.
    pub fn request_interrupt(&self) {
        self.inner.interrupt.lock().cancel();
        self.inner.world.interrupt_subtasks();
    }

    /// Broadcast [`ExecutorEvent::Idle`] if nothing is running or generating.
    pub fn signal_idle(&self) {
        if self.is_idle() {
            let _ = self.inner.events.send(ExecutorEvent::Idle);
        }
    }

    /// Stop the running action, if any.
    ///
    /// Re-raises the interrupt every poll interval until the action returns.
    /// Past the hard deadline the fatal handler is invoked and
    /// [`ExecutorError::StopRefused`] is returned.
    pub async fn stop(&self) -> Result<(), ExecutorError> {
        let started = Instant::now();
        loop {
            let finished = self.inner.finished.notified();
            if !self.is_executing() {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.inner.config.stop_deadline {
                let action = self.current_action_name();
                tracing::error!(
                    action = %action,
                    waited_ms = waited.as_millis() as u64,
                    "action ignored cancellation past the hard deadline"
                );
                let _ = self.inner.events.send(ExecutorEvent::StopRefused {
                    action: action.clone(),
                });
                self.inner.fatal.stop_refused(&action);
                return Err(ExecutorError::StopRefused { action, waited });
            }

            self.request_interrupt();
            tracing::info!(action = %self.current_action_name(), "waiting for action to stop");
            let remaining = self.inner.config.stop_deadline - waited;
            let poll = self.inner.config.stop_poll_interval.min(remaining);
            let _ = tokio::time::timeout(poll, finished).await;
        }
    }

    /// Run `action` in the slot, stopping whatever was there first.
    pub async fn execute(
        &self,
        name: &str,
        action: Arc<dyn Action>,
        timeout: Option<Duration>,
    ) -> ActionResult {
        self.run(name, action, timeout, false).await
    }

    /// Run (or store) the resumable action.
    ///
    /// A supplied action replaces the resume slot. The slot is then run only
    /// if the agent is idle and either the self-prompt loop is off or the
    /// action was just supplied. Otherwise nothing happens.
    pub async fn execute_resume(
        &self,
        action: Option<(&str, Arc<dyn Action>)>,
        timeout: Option<Duration>,
    ) -> ActionResult {
        let new_resume = action.is_some();
        let resume = {
            let mut slot = self.inner.slot.lock();
            if let Some((name, action)) = action {
                slot.resume = Some(ResumeSlot {
                    name: name.to_string(),
                    action,
                });
            }
            slot.resume.clone()
        };

        let Some(resume) = resume else {
            return ActionResult::noop();
        };

        if !self.is_idle() || (self.inner.self_prompt.is_active() && !new_resume) {
            return ActionResult::noop();
        }

        tracing::info!(action = %resume.name, "resuming action");
        self.run(&resume.name, resume.action, timeout, true).await
    }

    async fn run(
        &self,
        name: &str,
        action: Arc<dyn Action>,
        timeout: Option<Duration>,
        resuming: bool,
    ) -> ActionResult {
        if !self.harness_loaded() {
            return ActionResult::failure("Action harness is not loaded.");
        }

        let _guard = match self.acquire_slot().await {
            Ok(guard) => guard,
            Err(e) => return ActionResult::failure(e.to_string()),
        };

        self.reset_run_state();
        let token = self.inner.interrupt.lock().clone();
        {
            let mut slot = self.inner.slot.lock();
            slot.executing = true;
            slot.current_action = name.to_string();
        }
        tracing::info!(action = name, "executing action");
        let _ = self.inner.events.send(ExecutorEvent::Started {
            action: name.to_string(),
        });

        let timer = timeout.filter(|t| !t.is_zero()).map(|t| {
            let executor = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(t).await;
                executor.on_timeout().await;
            })
        });

        let cx = ActionContext::new(self.world(), token.clone(), self.inner.output.clone());
        let outcome = action.run(&cx).await;

        let failure = match outcome {
            Ok(()) => None,
            // Only the interrupt itself counts; anything else thrown while
            // stopping is still a failure.
            Err(e) if e.downcast_ref::<Interrupted>().is_some() => {
                cx.log("Code interrupted.");
                None
            }
            Err(e) => Some(e),
        };

        let timed_out = {
            let mut slot = self.inner.slot.lock();
            slot.executing = false;
            slot.timed_out
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        let mut message = summarize_output(&self.inner.output.snapshot(), self.inner.config.output_budget);
        let interrupted = token.is_cancelled() || timed_out;

        let result = match failure {
            None => ActionResult {
                success: true,
                message: Some(message),
                interrupted,
                timed_out,
            },
            Some(e) => {
                tracing::warn!(action = name, error = %e, "action threw");
                message.push_str(&format!("!!Code threw exception!!\nError: {e:#}\n"));
                self.cancel_resume();
                ActionResult {
                    success: false,
                    message: Some(message),
                    interrupted,
                    timed_out,
                }
            }
        };

        {
            let mut slot = self.inner.slot.lock();
            slot.current_action.clear();
            slot.timed_out = false;
            if resuming && result.success && !result.interrupted {
                slot.resume = None;
            }
        }
        self.inner.output.clear();
        *self.inner.interrupt.lock() = CancellationToken::new();
        self.inner.finished.notify_waiters();

        tracing::info!(
            action = name,
            success = result.success,
            interrupted = result.interrupted,
            timed_out = result.timed_out,
            "action finished"
        );
        let _ = self.inner.events.send(ExecutorEvent::Finished {
            action: name.to_string(),
            result: result.clone(),
        });
        if !result.interrupted && !self.is_generating() {
            let _ = self.inner.events.send(ExecutorEvent::Idle);
        }

        result
    }

    /// Stop whatever holds the slot, then take it.
    async fn acquire_slot(&self) -> Result<OwnedMutexGuard<()>, ExecutorError> {
        loop {
            self.stop().await?;
            match Arc::clone(&self.inner.run_lock).try_lock_owned() {
                Ok(guard) => return Ok(guard),
                Err(_) => tokio::task::yield_now().await,
            }
        }
    }

    async fn on_timeout(&self) {
        {
            let mut slot = self.inner.slot.lock();
            if !slot.executing {
                return;
            }
            slot.timed_out = true;
        }
        tracing::warn!(action = %self.current_action_name(), "action timed out");
        if let Err(e) = self.stop().await {
            tracing::error!(error = %e, "timed out action could not be stopped");
        }
    }
}

/// Clears the executor's `generating` flag when dropped.
pub struct GeneratingGuard {
    executor: Executor,
}

impl Drop for GeneratingGuard {
    fn drop(&mut self) {
        self.executor.set_generating(false);
    }
}

/// Convert a minute count from configuration to an optional timeout.
/// Zero or negative disables the timeout.
pub fn timeout_from_minutes(minutes: f64) -> Option<Duration> {
    (minutes > 0.0).then(|| Duration::from_secs_f64(minutes * 60.0))
}
