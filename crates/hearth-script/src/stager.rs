//! Turns a validated script body into a runnable action.
//!
//! Staging strips echoed language tags, parses the body, inserts a
//! cancellation checkpoint after every top-level statement and splices the
//! result into the harness template at its placeholder. Each attempt gets a
//! unique number; when a code directory is configured the composed source is
//! also written to `<dir>/<n>.js` for inspection.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hearth_core::{Action, ActionContext, Interrupted};

use crate::ast::{skill_calls, Program, Stmt};
use crate::error::{ScriptError, StagingError};
use crate::interpreter::{Interpreter, ENTRY_POINT};
use crate::parser::parse_program;

/// Marker the harness template carries where staged code goes.
pub const CODE_PLACEHOLDER: &str = "/* CODE HERE */";

pub const DEFAULT_HARNESS: &str = "\
async function main(bot) {
    /* CODE HERE */
    log(bot, 'Code finished.');
}
";

/// Language tags models sometimes echo at the start of a code block.
const LANGUAGE_TAGS: &[&str] = &["javascript", "Javascript", "js"];

/// Drop a leading language tag left over from a code fence.
pub fn sanitize(code: &str) -> String {
    let trimmed = code.trim();
    for tag in LANGUAGE_TAGS {
        if let Some(rest) = trimmed.strip_prefix(tag) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Parsed harness template.
#[derive(Debug, Clone)]
pub struct Harness {
    source: String,
    program: Program,
}

impl Harness {
    /// Parse a template. It must define the entry function and contain the
    /// code placeholder exactly once.
    pub fn parse(source: &str) -> Result<Self, StagingError> {
        let program = parse_program(source).map_err(|e| StagingError::Template(e.to_string()))?;
        let has_entry = program
            .body
            .iter()
            .any(|s| matches!(s, Stmt::Function(f) if f.name == ENTRY_POINT));
        if !has_entry {
            return Err(StagingError::Template(format!(
                "no `{ENTRY_POINT}` function defined"
            )));
        }
        let placeholders = count_placeholders(&program.body);
        if placeholders != 1 {
            return Err(StagingError::Template(format!(
                "expected one `{CODE_PLACEHOLDER}` marker, found {placeholders}"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            program,
        })
    }

    pub fn load(path: &Path) -> Result<Self, StagingError> {
        let source = std::fs::read_to_string(path).map_err(|source| StagingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn splice(&self, code: Vec<Stmt>) -> Program {
        let mut program = self.program.clone();
        let mut code = Some(code);
        replace_placeholder(&mut program.body, &mut code);
        program
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            source: DEFAULT_HARNESS.to_string(),
            program: parse_program(DEFAULT_HARNESS).unwrap_or(Program { body: Vec::new() }),
        }
    }
}

fn count_placeholders(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|stmt| match stmt {
            Stmt::Placeholder => 1,
            Stmt::Function(f) => count_placeholders(&f.body),
            Stmt::Block(body) => count_placeholders(body),
            _ => 0,
        })
        .sum()
}

fn replace_placeholder(stmts: &mut Vec<Stmt>, code: &mut Option<Vec<Stmt>>) {
    let mut i = 0;
    while i < stmts.len() {
        match &mut stmts[i] {
            Stmt::Placeholder => {
                let replacement = code.take().unwrap_or_default();
                let len = replacement.len();
                stmts.splice(i..=i, replacement);
                i += len;
                continue;
            }
            Stmt::Function(f) => {
                let mut function = (**f).clone();
                replace_placeholder(&mut function.body, code);
                *f = Arc::new(function);
            }
            Stmt::Block(body) => replace_placeholder(body, code),
            _ => {}
        }
        i += 1;
    }
}

/// Insert a checkpoint after every top-level statement.
fn instrument(body: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(body.len() * 2);
    for stmt in body {
        let is_function = matches!(stmt, Stmt::Function(_));
        out.push(stmt);
        if !is_function {
            out.push(Stmt::Checkpoint);
        }
    }
    out
}

pub struct Stager {
    harness: Harness,
    code_dir: Option<PathBuf>,
    known_skills: Option<BTreeSet<String>>,
    attempts: AtomicU64,
}

impl Stager {
    pub fn new(harness: Harness) -> Self {
        Self {
            harness,
            code_dir: None,
            known_skills: None,
            attempts: AtomicU64::new(0),
        }
    }

    /// Write each staged attempt to `<dir>/<n>.js`.
    pub fn with_code_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.code_dir = Some(dir.into());
        self
    }

    /// Reject scripts that call skills outside this set.
    pub fn with_known_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_skills = Some(skills.into_iter().map(Into::into).collect());
        self
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Names of skills the script calls that the world does not offer.
    fn lint(&self, body: &[Stmt]) -> Result<(), StagingError> {
        let Some(known) = &self.known_skills else {
            return Ok(());
        };
        let missing: BTreeSet<String> = skill_calls(body)
            .into_iter()
            .filter(|(name, _)| name != "wait" && !known.contains(name))
            .map(|(name, _)| name)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let lines: Vec<String> = missing
            .iter()
            .map(|name| format!("Function {name} does not exist."))
            .collect();
        Err(StagingError::Lint(lines.join("\n")))
    }

    pub fn stage(&self, code: &str) -> Result<StagedScript, StagingError> {
        let code = sanitize(code);
        let body = parse_program(&code).map_err(StagingError::Syntax)?.body;
        if body.iter().any(|s| matches!(s, Stmt::Placeholder)) {
            return Err(StagingError::Syntax(ScriptError::Syntax {
                line: 1,
                message: format!("`{CODE_PLACEHOLDER}` may only appear in the harness"),
            }));
        }
        self.lint(&body)?;

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let program = self.harness.splice(instrument(body));

        let path = match &self.code_dir {
            Some(dir) => Some(self.write_attempt(dir, attempt, &code)?),
            None => None,
        };
        tracing::debug!(attempt, path = ?path, "staged script");

        Ok(StagedScript {
            attempt,
            source: code,
            path,
            program: Arc::new(program),
        })
    }

    fn write_attempt(&self, dir: &Path, attempt: u64, code: &str) -> Result<PathBuf, StagingError> {
        let path = dir.join(format!("{attempt}.js"));
        let io_err = |source| StagingError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let composed = self.harness.source.replacen(CODE_PLACEHOLDER, code, 1);
        std::fs::write(&path, composed).map_err(io_err)?;
        Ok(path)
    }
}

impl Default for Stager {
    fn default() -> Self {
        Self::new(Harness::default())
    }
}

/// A staged attempt, runnable through the executor.
#[derive(Debug, Clone)]
pub struct StagedScript {
    attempt: u64,
    source: String,
    path: Option<PathBuf>,
    program: Arc<Program>,
}

impl StagedScript {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// The sanitized script body.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_action(self) -> Arc<dyn Action> {
        Arc::new(self)
    }
}

#[async_trait]
impl Action for StagedScript {
    async fn run(&self, cx: &ActionContext) -> anyhow::Result<()> {
        let mut interpreter = Interpreter::new(cx);
        match interpreter.run(&self.program).await {
            Ok(_) => Ok(()),
            Err(ScriptError::Interrupted) => Err(Interrupted.into()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_echoed_language_tags() {
        assert_eq!(sanitize("javascript\nlog('x')"), "log('x')");
        assert_eq!(sanitize("js log('x')"), "log('x')");
        assert_eq!(sanitize("  Javascript\n\nlet a = 1;  "), "let a = 1;");
        assert_eq!(sanitize("jsonData = 1"), "jsonData = 1");
    }

    #[test]
    fn checkpoints_follow_each_top_level_statement() {
        let body = parse_program("let a = 1; function f() {} a = 2;").unwrap().body;
        let out = instrument(body);
        assert!(matches!(out[0], Stmt::Let { .. }));
        assert_eq!(out[1], Stmt::Checkpoint);
        assert!(matches!(out[2], Stmt::Function(_)));
        assert!(matches!(out[3], Stmt::Expr(_)));
        assert_eq!(out[4], Stmt::Checkpoint);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn default_harness_is_valid() {
        let harness = Harness::parse(DEFAULT_HARNESS).unwrap();
        assert_eq!(harness.source(), DEFAULT_HARNESS);
        assert_eq!(Harness::default().program, harness.program);
    }

    #[test]
    fn code_is_spliced_at_the_placeholder() {
        let stager = Stager::default();
        let staged = stager.stage("log('hi');").unwrap();
        let [Stmt::Function(main)] = staged.program().body.as_slice() else {
            panic!("expected only main");
        };
        assert_eq!(main.body.len(), 3);
        assert!(matches!(main.body[0], Stmt::Expr(_)));
        assert_eq!(main.body[1], Stmt::Checkpoint);
        assert!(matches!(main.body[2], Stmt::Expr(_)));
    }
}
