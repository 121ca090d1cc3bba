use std::path::PathBuf;

/// Failure while parsing or running a script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { line: usize, message: String },

    #[error("ReferenceError: {name} is not defined (line {line})")]
    Reference { line: usize, name: String },

    #[error("TypeError: {message} (line {line})")]
    Type { line: usize, message: String },

    #[error("Uncaught {0}")]
    Thrown(String),

    /// A skill or world call failed inside the driver.
    #[error("{skill} failed: {message}")]
    Skill { skill: String, message: String },

    #[error("code interrupted")]
    Interrupted,
}

impl ScriptError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

/// Failure turning a script body into a runnable unit.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// The script does not parse. Recoverable by asking for a new script.
    #[error("{0}")]
    Syntax(ScriptError),

    /// The script parses but calls something the world does not offer.
    #[error("{0}")]
    Lint(String),

    #[error("harness template is invalid: {0}")]
    Template(String),

    #[error("failed to write staged script {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagingError {
    /// Errors in the script itself rather than in the staging machinery.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Syntax(_) | Self::Lint(_))
    }
}
