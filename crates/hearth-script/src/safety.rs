//! Screening of generated scripts for forbidden constructs.
//!
//! The screen is lexical and deliberately coarse: any mention of a dynamic
//! loading, evaluation, process, global-state or network primitive rejects
//! the whole script, even inside a string or comment.

use std::sync::LazyLock;

use regex::Regex;

/// A named forbidden construct.
pub struct Rule {
    pub name: &'static str,
    pattern: Regex,
}

impl Rule {
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

const PATTERNS: &[(&str, &str)] = &[
    // Dynamic code loading
    ("import", r"\bimport\b"),
    ("require", r"\brequire\s*\("),
    ("eval", r"\beval\s*\("),
    ("Function", r"\bFunction\s*\("),
    ("new Function", r"\bnew\s+Function\b"),
    ("constructor", r"\bconstructor\b"),
    ("__proto__", r"__proto__"),
    // Process, environment and global state
    ("process", r"\bprocess\b"),
    ("globalThis", r"\bglobalThis\b"),
    ("global", r"\bglobal\s*[.\[]"),
    ("child_process", r"\bchild_process\b"),
    ("fs", r"\bfs\s*\."),
    ("os", r"\bos\s*\."),
    // Network
    ("fetch", r"\bfetch\s*\("),
    ("XMLHttpRequest", r"\bXMLHttpRequest\b"),
    ("WebSocket", r"\bWebSocket\b"),
    ("net", r"\bnet\s*\."),
    ("http", r"\bhttps?\s*\."),
];

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .map(|(name, pattern)| Rule {
            name,
            pattern: Regex::new(pattern).expect("forbidden-construct patterns are valid"),
        })
        .collect()
});

/// Rejects scripts that reach outside the skill surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyFilter;

impl SafetyFilter {
    pub fn new() -> Self {
        Self
    }

    /// True when no forbidden construct appears in `script`.
    pub fn check(&self, script: &str) -> bool {
        let safe = !RULES.iter().any(|rule| rule.is_match(script));
        if !safe {
            tracing::warn!(violations = ?self.violations(script), "script rejected");
        }
        safe
    }

    /// Names of every forbidden construct found in `script`.
    pub fn violations(&self, script: &str) -> Vec<&'static str> {
        RULES
            .iter()
            .filter(|rule| rule.is_match(script))
            .map(|rule| rule.name)
            .collect()
    }
}

/// Shorthand for [`SafetyFilter::check`].
pub fn check(script: &str) -> bool {
    SafetyFilter.check(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(RULES.len(), PATTERNS.len());
    }

    #[test]
    fn plain_skill_script_is_safe() {
        let script = r#"
            let wood = 0;
            for (const log of ["oak_log", "birch_log"]) {
                await skills.collectBlock(bot, log, 4);
                wood += 4;
            }
            log(`collected ${wood} logs`);
        "#;
        assert!(check(script));
    }

    #[test]
    fn identifiers_containing_keywords_are_not_flagged() {
        assert!(check("let processed = 1; let globalCount = 2; let imported = false;"));
        assert!(check("await skills.goToPosition(bot, nethers.x, 64, 0);"));
    }

    #[test]
    fn forbidden_constructs_are_reported_by_name() {
        let filter = SafetyFilter::new();
        assert!(!filter.check("const fs = require('fs');"));
        assert_eq!(filter.violations("fetch('http://example.com')"), vec!["fetch"]);
        assert_eq!(filter.violations("process.exit(1)"), vec!["process"]);
        assert_eq!(filter.violations("globalThis.x = 1"), vec!["globalThis"]);
        assert_eq!(filter.violations("x.constructor.constructor('return 1')()"), vec!["constructor"]);
        assert_eq!(
            filter.violations("new Function('return this')"),
            vec!["Function", "new Function"]
        );
        assert_eq!(filter.violations("import('net')"), vec!["import"]);
    }
}
