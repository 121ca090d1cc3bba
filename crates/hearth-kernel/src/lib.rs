//! Agent kernel.
//!
//! Wires the execution core to a language model: configuration, model
//! adapters, the script generation loop, self-prompting, session memory and
//! the agent's event loop.

#![forbid(unsafe_code)]

pub mod adapters;
pub mod agent;
pub mod coder;
pub mod config;
pub mod headless;
pub mod history;
pub mod observability;
pub mod self_prompter;

pub use adapters::{Model, Provider};
pub use agent::{Agent, AgentError, ProcessExit};
pub use coder::{extract_code, CodeOutcome, Coder, CoderSettings};
pub use config::{AgentConfig, ModelConfig, CONFIG_PATH};
pub use headless::HeadlessWorld;
pub use history::{History, Role, SessionState, SessionStore, Turn};
pub use observability::{AgentEvent, EventEmitter};
pub use self_prompter::{PromptCycle, SelfPrompter};
