//! Script generation loop.
//!
//! Each round sends the conversation to the model, pulls the fenced code out
//! of the reply, screens and stages it, and runs it through the executor.
//! Failures are fed back to the model as system turns until a script
//! succeeds or the rounds run out.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::Executor;
use hearth_script::{sanitize, SafetyFilter, Stager};

use crate::adapters::Model;
use crate::config::AgentConfig;
use crate::history::Turn;

/// Executor label for generated scripts.
pub const NEW_ACTION: &str = "newAction";

/// Marker a model may use to ask for another round without writing code.
pub const NEW_ACTION_MARKER: &str = "!newAction";

const FENCE: &str = "```";

const GENERATION_STARTED: &str = "Code generation started. Write code in codeblock in your response:";
const NO_CODE_CORRECTION: &str =
    "Error: no code provided. Write code in codeblock in your response. ``` // example ```";
const UNSAFE_CORRECTION: &str = "Error: Code insecurity detected. Do not import, read/write files, \
     execute dynamic code, or access the internet. Please try again:";
const MODEL_UNAVAILABLE: &str = "My brain disconnected, try again.";

pub const CODING_DISABLED: &str =
    "newAction not allowed! Code writing is disabled in settings. Notify the user.";
pub const NO_CODE_FAILURE: &str = "Action failed, agent would not write code.";
pub const STAGING_FAILED: &str = "Failed to stage code, something is wrong.";

/// How a generation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeOutcome {
    /// A script ran; carries the summary of the code and its output.
    Completed(String),
    /// Gave up for good. The message, if any, belongs in the history.
    Failed(Option<String>),
    /// Stopped from outside.
    Interrupted,
    /// Every round produced a failing script.
    RoundsExhausted,
}

impl CodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Completed(message) | Self::Failed(Some(message)) => Some(message),
            _ => None,
        }
    }
}

/// Body of the first fenced block: everything between the first and the
/// last fence. An unclosed fence runs to the end of the reply.
pub fn extract_code(response: &str) -> Option<&str> {
    let start = response.find(FENCE)? + FENCE.len();
    let end = response.rfind(FENCE).filter(|&end| end >= start);
    Some(match end {
        Some(end) => &response[start..end],
        None => &response[start..],
    })
}

#[derive(Debug, Clone)]
pub struct CoderSettings {
    pub rounds: usize,
    pub max_no_code_failures: usize,
    pub timeout: Option<Duration>,
    pub allow_insecure_coding: bool,
    pub system_prompt: String,
}

impl CoderSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            rounds: config.max_generation_rounds,
            max_no_code_failures: config.max_no_code_failures,
            timeout: config.code_timeout(),
            allow_insecure_coding: config.allow_insecure_coding,
            system_prompt: config.coding_prompt.clone(),
        }
    }
}

pub struct Coder {
    executor: Executor,
    model: Arc<dyn Model>,
    stager: Stager,
    filter: SafetyFilter,
    settings: CoderSettings,
}

impl Coder {
    pub fn new(executor: Executor, model: Arc<dyn Model>, stager: Stager, settings: CoderSettings) -> Self {
        Self {
            executor,
            model,
            stager,
            filter: SafetyFilter::new(),
            settings,
        }
    }

    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    /// Write and run code for the conversation so far.
    ///
    /// Holds the executor's generating flag for the whole attempt and
    /// signals idle afterwards unless the attempt was interrupted.
    pub async fn generate(&self, history: &[Turn]) -> CodeOutcome {
        if !self.settings.allow_insecure_coding {
            tracing::warn!("code generation requested while disabled");
            return CodeOutcome::Failed(Some(CODING_DISABLED.to_string()));
        }

        // A stale interrupt from before this attempt must not abort it.
        self.executor.clear();
        let outcome = {
            let _generating = self.executor.begin_generating();
            self.generate_loop(history).await
        };
        tracing::info!(outcome = ?outcome, "code generation finished");

        if outcome != CodeOutcome::Interrupted {
            self.executor.signal_idle();
        }
        outcome
    }

    async fn generate_loop(&self, history: &[Turn]) -> CodeOutcome {
        let mut turns = history.to_vec();
        turns.push(Turn::system(GENERATION_STARTED));
        let mut no_code_failures = 0;

        for round in 0..self.settings.rounds {
            if self.executor.is_interrupted() {
                return CodeOutcome::Interrupted;
            }
            let response = match self
                .model
                .send_request(&turns, &self.settings.system_prompt)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(round, model = self.model.name(), error = %format!("{e:#}"), "model request failed");
                    MODEL_UNAVAILABLE.to_string()
                }
            };
            if self.executor.is_interrupted() {
                return CodeOutcome::Interrupted;
            }

            let Some(code) = extract_code(&response) else {
                if let Some(at) = response.find(NEW_ACTION_MARKER) {
                    turns.push(Turn::assistant(&response[..at]));
                    continue;
                }
                if no_code_failures >= self.settings.max_no_code_failures {
                    return CodeOutcome::Failed(Some(NO_CODE_FAILURE.to_string()));
                }
                tracing::debug!(round, "model reply had no code");
                turns.push(Turn::system(NO_CODE_CORRECTION));
                no_code_failures += 1;
                continue;
            };

            if !self.filter.check(code) {
                tracing::warn!(round, violations = ?self.filter.violations(code), "rejected unsafe script");
                turns.push(Turn::system(UNSAFE_CORRECTION));
                continue;
            }

            let staged = match self.stager.stage(code) {
                Ok(staged) => staged,
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(round, error = %e, "script failed lint");
                    turns.push(Turn::system(format!("Error: Code lint error:\n{e}\nPlease try again.")));
                    continue;
                }
                Err(e) => {
                    tracing::error!(round, error = %e, "failed to stage script");
                    return CodeOutcome::Failed(Some(STAGING_FAILED.to_string()));
                }
            };

            let source = sanitize(code);
            let result = self
                .executor
                .execute(NEW_ACTION, staged.into_action(), self.settings.timeout)
                .await;
            if result.interrupted && !result.timed_out {
                return CodeOutcome::Interrupted;
            }
            if result.success {
                return CodeOutcome::Completed(format!(
                    "Summary of newAction\nAgent wrote this code: \n```{source}```\nCode Output:\n{}",
                    result.message_or_empty()
                ));
            }

            turns.push(Turn::assistant(response));
            turns.push(Turn::system(format!(
                "{}\nCode failed. Please try again:",
                result.message_or_empty()
            )));
        }
        CodeOutcome::RoundsExhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_spans_first_to_last_fence() {
        let reply = "Sure!\n```js\nlog('a');\n```\nand\n```\nlog('b');\n```";
        assert_eq!(extract_code(reply), Some("js\nlog('a');\n```\nand\n```\nlog('b');\n"));
        assert_eq!(extract_code("```log(1);"), Some("log(1);"));
        assert_eq!(extract_code("no code here"), None);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(CodeOutcome::Completed("done".into()).message(), Some("done"));
        assert_eq!(CodeOutcome::Failed(None).message(), None);
        assert!(!CodeOutcome::RoundsExhausted.is_success());
    }
}
