//! Execution core for an autonomous game-world agent.
//!
//! The [`Executor`] runs one action at a time with a timeout, cooperative
//! cancellation and output capture. The [`Arbitrator`] holds the ordered
//! reactive modes that may preempt it.

#![forbid(unsafe_code)]

pub mod action;
pub mod executor;
pub mod mode;
pub mod result;
pub mod self_prompt;
pub mod world;

pub use action::{action_fn, Action, ActionContext, FnAction, Interrupted, OutputBuffer, SkillAction};
pub use executor::{
    timeout_from_minutes, Executor, ExecutorConfig, ExecutorError, ExecutorEvent, ExecutorState,
    FatalHandler, GeneratingGuard, LogFatal,
};
pub use mode::{Arbitrator, Interrupts, Mode, ModeContext};
pub use result::{summarize_output, ActionResult, DEFAULT_OUTPUT_BUDGET};
pub use self_prompt::{SelfPromptHandle, SelfPromptState};
pub use world::{BotStatus, EntityInfo, EntityKind, GameWorld, Vec3, WorldEvent};
