//! Reactive modes and the behavior arbitrator that schedules them.
//!
//! Modes are held in priority order. Each tick the arbitrator walks the list
//! and lets every eligible mode react; a mode that occupies the executor ends
//! the scan so lower-priority modes wait for it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::executor::Executor;
use crate::self_prompt::SelfPromptHandle;
use crate::world::GameWorld;

/// Which running actions a mode may break into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupts {
    All,
    Actions(Vec<String>),
}

impl Interrupts {
    /// Only runs when the agent is idle.
    pub fn none() -> Self {
        Self::Actions(Vec::new())
    }

    pub fn actions(names: &[&str]) -> Self {
        Self::Actions(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn allows(&self, action: &str) -> bool {
        match self {
            Self::All => true,
            Self::Actions(names) => names.iter().any(|n| n == action),
        }
    }
}

pub trait Mode: Send {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn interrupts(&self) -> Interrupts;

    /// React to the world. Called at most once per tick, only when eligible.
    fn update(&mut self, cx: &mut ModeContext<'_>);
}

/// What a mode can see and do during its update.
pub struct ModeContext<'a> {
    name: &'static str,
    executor: &'a Executor,
    world: Arc<dyn GameWorld>,
    active: &'a Arc<AtomicBool>,
    self_prompt: &'a SelfPromptHandle,
    behavior_log: &'a mut String,
}

impl ModeContext<'_> {
    pub fn world(&self) -> &dyn GameWorld {
        self.world.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.executor.is_idle()
    }

    pub fn current_action(&self) -> String {
        self.executor.current_action_name()
    }

    /// Narrate a behavior; collected into the behavior log.
    pub fn say(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(mode = self.name, message, "mode says");
        self.behavior_log.push_str(message);
        self.behavior_log.push('\n');
    }

    /// Run this mode's reaction through the executor.
    ///
    /// Marks the mode active until the action finishes and asks any
    /// self-prompt loop to stop first.
    pub fn execute(&mut self, action: Arc<dyn Action>, timeout: Option<Duration>) {
        if self.self_prompt.is_active() {
            self.self_prompt.request_loop_stop();
        }
        self.active.store(true, Ordering::SeqCst);

        let executor = self.executor.clone();
        let active = Arc::clone(self.active);
        let label = format!("mode:{}", self.name);
        tokio::spawn(async move {
            let result = executor.execute(&label, action, timeout).await;
            active.store(false, Ordering::SeqCst);
            tracing::debug!(
                action = %label,
                success = result.success,
                interrupted = result.interrupted,
                "mode reaction finished"
            );
        });
    }

    /// Fire-and-forget world call that does not occupy the executor.
    pub fn fire(&self, skill: &'static str, args: Vec<Value>) {
        let world = Arc::clone(&self.world);
        tokio::spawn(async move {
            let token = CancellationToken::new();
            if let Err(e) = world.invoke(skill, &args, &token).await {
                tracing::debug!(skill, error = %e, "background world call failed");
            }
        });
    }
}

struct ModeSlot {
    mode: Box<dyn Mode>,
    on: bool,
    paused: bool,
    active: Arc<AtomicBool>,
}

pub struct Arbitrator {
    slots: Vec<ModeSlot>,
    executor: Executor,
    self_prompt: SelfPromptHandle,
    behavior_log: String,
}

impl Arbitrator {
    /// `modes` in priority order, highest first. All start enabled.
    pub fn new(executor: Executor, self_prompt: SelfPromptHandle, modes: Vec<Box<dyn Mode>>) -> Self {
        let slots = modes
            .into_iter()
            .map(|mode| ModeSlot {
                mode,
                on: true,
                paused: false,
                active: Arc::new(AtomicBool::new(false)),
            })
            .collect();
        Self {
            slots,
            executor,
            self_prompt,
            behavior_log: String::new(),
        }
    }

    /// One scheduling pass. Returns the modes whose update ran, in order.
    pub fn tick(&mut self) -> Vec<&'static str> {
        let idle = self.executor.is_idle();
        if idle {
            self.unpause_all();
        }
        let current = self.executor.current_action_name();

        let Self {
            slots,
            executor,
            self_prompt,
            behavior_log,
        } = self;

        let mut invoked = Vec::new();
        for slot in slots.iter_mut() {
            let interruptible = slot.mode.interrupts().allows(&current);
            let eligible = slot.on
                && !slot.paused
                && !slot.active.load(Ordering::SeqCst)
                && (idle || interruptible);

            if eligible {
                let name = slot.mode.name();
                let mut cx = ModeContext {
                    name,
                    executor: &*executor,
                    world: executor.world(),
                    active: &slot.active,
                    self_prompt: &*self_prompt,
                    behavior_log: &mut *behavior_log,
                };
                slot.mode.update(&mut cx);
                invoked.push(name);
            }

            if slot.active.load(Ordering::SeqCst) {
                break;
            }
        }
        invoked
    }

    fn slot(&self, name: &str) -> Option<&ModeSlot> {
        self.slots.iter().find(|s| s.mode.name() == name)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut ModeSlot> {
        self.slots.iter_mut().find(|s| s.mode.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.mode.name()).collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    /// Returns false if no mode has that name.
    pub fn set_on(&mut self, name: &str, on: bool) -> bool {
        match self.slot_mut(name) {
            Some(slot) => {
                slot.on = on;
                true
            }
            None => false,
        }
    }

    pub fn is_on(&self, name: &str) -> bool {
        self.slot(name).is_some_and(|s| s.on)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.slot(name)
            .is_some_and(|s| s.active.load(Ordering::SeqCst))
    }

    pub fn is_paused(&self, name: &str) -> bool {
        self.slot(name).is_some_and(|s| s.paused)
    }

    /// Transient override, cleared the next time the agent is idle.
    pub fn pause(&mut self, name: &str) {
        if let Some(slot) = self.slot_mut(name) {
            slot.paused = true;
        }
    }

    pub fn unpause(&mut self, name: &str) {
        if let Some(slot) = self.slot_mut(name) {
            slot.paused = false;
        }
    }

    pub fn unpause_all(&mut self) {
        for slot in &mut self.slots {
            slot.paused = false;
        }
    }

    pub fn enabled_map(&self) -> BTreeMap<String, bool> {
        self.slots
            .iter()
            .map(|s| (s.mode.name().to_string(), s.on))
            .collect()
    }

    /// Apply a persisted name -> enabled map. Unknown names are ignored.
    pub fn load_enabled_map(&mut self, map: &BTreeMap<String, bool>) {
        for (name, on) in map {
            if !self.set_on(name, *on) {
                tracing::warn!(mode = %name, "ignoring unknown mode in saved state");
            }
        }
    }

    pub fn flush_behavior_log(&mut self) -> String {
        std::mem::take(&mut self.behavior_log)
    }

    pub fn describe(&self) -> String {
        let mut out = String::from("Agent Modes:\n");
        for slot in &self.slots {
            let state = if slot.on { "ON" } else { "OFF" };
            out.push_str(&format!(
                "- {}({}): {}\n",
                slot.mode.name(),
                state,
                slot.mode.description()
            ));
        }
        out
    }
}
