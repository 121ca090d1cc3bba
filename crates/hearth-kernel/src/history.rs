//! Conversation history and the persisted session.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in the conversation with the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Bounded conversation log. The oldest turns are dropped first.
#[derive(Debug, Clone)]
pub struct History {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl History {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn add(&mut self, turn: Turn) {
        tracing::debug!(role = turn.role.as_str(), chars = turn.content.len(), "history turn");
        self.turns.push(turn);
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replace the log with saved turns, keeping only the newest.
    pub fn restore(&mut self, turns: Vec<Turn>) {
        self.turns.clear();
        for turn in turns {
            self.add(turn);
        }
    }
}

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Mode name -> enabled.
    #[serde(default)]
    pub modes: BTreeMap<String, bool>,
    #[serde(default)]
    pub self_prompt: Option<String>,
    /// Whether the self-prompt loop was on when the session was saved.
    #[serde(default)]
    pub self_prompting: bool,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Reads and writes `<profile>/memory.json`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(profile_dir: &Path) -> Self {
        Self {
            path: profile_dir.join("memory.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<SessionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session from {}", self.path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session from {}", self.path.display()))?;
        Ok(Some(state))
    }

    /// Stamp and write the session. The file is replaced by rename.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut state = state.clone();
        state.saved_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&state)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write session to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), turns = state.turns.len(), "session saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_drops_oldest_turns() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.add(Turn::user(format!("msg {i}")));
        }
        let contents: Vec<_> = history.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn session_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(&dir.path().join("profile"));
        assert_eq!(store.load().unwrap(), None);

        let state = SessionState {
            turns: vec![Turn::user("hi"), Turn::system("Code finished.")],
            modes: BTreeMap::from([("hunting".to_string(), false)]),
            self_prompt: Some("build a house".into()),
            self_prompting: true,
            saved_at: None,
        };
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.turns, state.turns);
        assert_eq!(loaded.modes, state.modes);
        assert_eq!(loaded.self_prompt.as_deref(), Some("build a house"));
        assert!(loaded.saved_at.is_some());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
