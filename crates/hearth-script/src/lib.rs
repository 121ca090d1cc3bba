//! Generated-script support for the agent.
//!
//! Scripts are written by the model in a small JavaScript-like language.
//! [`SafetyFilter`] screens them, [`Stager`] parses and instruments them, and
//! the resulting [`StagedScript`] runs through the executor as an ordinary
//! action. The interpreter only reaches the world through the skill surface.

#![forbid(unsafe_code)]

pub mod ast;
mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod safety;
pub mod stager;
pub mod value;

pub use error::{ScriptError, StagingError};
pub use interpreter::{Interpreter, ENTRY_POINT};
pub use parser::{parse_expression, parse_program};
pub use safety::SafetyFilter;
pub use stager::{sanitize, Harness, StagedScript, Stager, CODE_PLACEHOLDER, DEFAULT_HARNESS};
