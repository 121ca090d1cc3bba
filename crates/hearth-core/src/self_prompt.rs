//! Shared switches for the agent's self-prompting loop.
//!
//! The loop itself lives in the kernel; the executor and the arbitrator only
//! need to know whether it is on and to ask it to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfPromptState {
    #[default]
    Stopped,
    Active,
    Paused,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SelfPromptState>,
    loop_running: AtomicBool,
    interrupt: AtomicBool,
    loop_exited: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct SelfPromptHandle {
    shared: Arc<Shared>,
}

impl SelfPromptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SelfPromptState {
        *self.shared.state.lock()
    }

    pub fn set_state(&self, state: SelfPromptState) {
        *self.shared.state.lock() = state;
    }

    pub fn is_active(&self) -> bool {
        self.state() == SelfPromptState::Active
    }

    pub fn loop_running(&self) -> bool {
        self.shared.loop_running.load(Ordering::SeqCst)
    }

    pub fn loop_interrupted(&self) -> bool {
        self.shared.interrupt.load(Ordering::SeqCst)
    }

    /// Ask a running loop to exit at its next check. Does not wait.
    pub fn request_loop_stop(&self) {
        if self.loop_running() {
            self.shared.interrupt.store(true, Ordering::SeqCst);
        }
    }

    /// Ask the loop to exit and wait until it has.
    pub async fn stop_loop(&self) {
        while self.loop_running() {
            let exited = self.shared.loop_exited.notified();
            self.shared.interrupt.store(true, Ordering::SeqCst);
            if !self.loop_running() {
                break;
            }
            exited.await;
        }
        self.shared.interrupt.store(false, Ordering::SeqCst);
    }

    /// Called by the loop when it starts. Returns false if one is already running.
    pub fn begin_loop(&self) -> bool {
        if self.shared.loop_running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.interrupt.store(false, Ordering::SeqCst);
        true
    }

    /// Called by the loop when it exits.
    pub fn end_loop(&self) {
        self.shared.loop_running.store(false, Ordering::SeqCst);
        self.shared.interrupt.store(false, Ordering::SeqCst);
        self.shared.loop_exited.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_loop_waits_for_loop_exit() {
        let handle = SelfPromptHandle::new();
        handle.set_state(SelfPromptState::Active);
        assert!(handle.begin_loop());
        assert!(!handle.begin_loop());

        let looper = handle.clone();
        let task = tokio::spawn(async move {
            while !looper.loop_interrupted() {
                tokio::task::yield_now().await;
            }
            looper.end_loop();
        });

        handle.stop_loop().await;
        task.await.unwrap();

        assert!(!handle.loop_running());
        assert!(!handle.loop_interrupted());
        // Stopping the loop leaves the on/off state alone.
        assert!(handle.is_active());
    }

    #[test]
    fn request_stop_without_loop_is_ignored() {
        let handle = SelfPromptHandle::new();
        handle.request_loop_stop();
        assert!(!handle.loop_interrupted());
    }
}
