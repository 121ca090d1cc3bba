use serde::{Deserialize, Serialize};

/// Default character budget for captured action output.
pub const DEFAULT_OUTPUT_BUDGET: usize = 500;

/// Outcome of a single run through the executor.
///
/// `timed_out` implies `interrupted`: a timeout is delivered through the same
/// stop path as any other external cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: Option<String>,
    pub interrupted: bool,
    pub timed_out: bool,
}

impl ActionResult {
    /// The no-op result: nothing ran, nothing was interrupted.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            interrupted: false,
            timed_out: false,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            interrupted: false,
            timed_out: false,
        }
    }

    /// Externally interrupted, no message, not a timeout.
    pub fn interrupted() -> Self {
        Self {
            success: false,
            message: None,
            interrupted: true,
            timed_out: false,
        }
    }

    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// Shorten captured output to `budget` characters.
///
/// Output within budget is returned verbatim. Longer output keeps the first and
/// last `budget / 2` characters around a skip notice.
pub fn summarize_output(output: &str, budget: usize) -> String {
    let total = output.chars().count();
    if total <= budget {
        return output.to_string();
    }

    let half = budget / 2;
    let head: String = output.chars().take(half).collect();
    let tail: String = output.chars().skip(total - half).collect();
    format!(
        "Action output is very long ({total} chars) and has been shortened.\n  First outputs:\n{head}\n...skipping many lines.\nFinal outputs:\n{tail}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        let raw = "collected 3 oak_log\n";
        assert_eq!(summarize_output(raw, 500), raw);
        assert_eq!(summarize_output("", 500), "");
    }

    #[test]
    fn output_at_budget_is_untouched() {
        let raw = "x".repeat(500);
        assert_eq!(summarize_output(&raw, 500), raw);
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let raw = format!("{}{}{}", "a".repeat(300), "q".repeat(400), "z".repeat(300));
        let summary = summarize_output(&raw, 500);

        assert!(summary.contains(&"a".repeat(250)));
        assert!(summary.contains(&"z".repeat(250)));
        assert!(!summary.contains('q'));
        assert!(summary.contains("skipping many lines"));
        assert!(summary.contains("(1000 chars)"));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let raw = "é".repeat(12);
        let summary = summarize_output(&raw, 10);
        assert!(summary.contains(&"é".repeat(5)));
    }
}
