//! Observability - agent events appended to `<profile>/events.jsonl`.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hearth_core::ExecutorEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An agent event for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub run_id: Option<Uuid>,
    pub action: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Event emitter for agent observability.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    events_path: PathBuf,
    run_id: Option<Uuid>,
}

impl EventEmitter {
    pub fn new(profile_dir: &Path) -> Self {
        Self {
            events_path: profile_dir.join("events.jsonl"),
            run_id: None,
        }
    }

    /// Tag every event from this emitter with `run_id`.
    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn path(&self) -> &Path {
        &self.events_path
    }

    /// Emit an event.
    pub fn emit(&self, event: AgentEvent) -> Result<()> {
        if let Some(parent) = self.events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .with_context(|| format!("Failed to open {}", self.events_path.display()))?;

        let line = serde_json::to_string(&event)?;
        writeln!(file, "{}", line)?;

        Ok(())
    }

    /// Emit a simple event.
    pub fn emit_simple(&self, event_type: &str, message: &str) -> Result<()> {
        self.emit(self.event(event_type, None, message, serde_json::Value::Null))
    }

    /// Record an executor lifecycle event. Idle notifications are skipped.
    pub fn record_executor(&self, event: &ExecutorEvent) -> Result<()> {
        let event = match event {
            ExecutorEvent::Started { action } => {
                self.event("action_started", Some(action.as_str()), "", serde_json::Value::Null)
            }
            ExecutorEvent::Finished { action, result } => self.event(
                "action_finished",
                Some(action.as_str()),
                result.message_or_empty(),
                serde_json::json!({
                    "success": result.success,
                    "interrupted": result.interrupted,
                    "timed_out": result.timed_out,
                }),
            ),
            ExecutorEvent::StopRefused { action } => self.event(
                "stop_refused",
                Some(action.as_str()),
                "action ignored cancellation past the hard deadline",
                serde_json::Value::Null,
            ),
            ExecutorEvent::Idle => return Ok(()),
        };
        self.emit(event)
    }

    /// Build an event tagged with this emitter's run.
    pub fn event(
        &self,
        event_type: &str,
        action: Option<&str>,
        message: &str,
        metadata: serde_json::Value,
    ) -> AgentEvent {
        AgentEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            run_id: self.run_id,
            action: action.map(str::to_string),
            message: message.to_string(),
            metadata,
        }
    }

    /// Read recent events.
    pub fn read_recent(&self, limit: usize) -> Vec<AgentEvent> {
        let file = match std::fs::File::open(&self.events_path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let reader = BufReader::new(file);
        let mut events: Vec<AgentEvent> = reader
            .lines()
            .filter_map(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        // Return last N events
        if events.len() > limit {
            events.drain(0..events.len() - limit);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use hearth_core::ActionResult;

    use super::*;

    #[test]
    fn events_append_and_read_back_newest_last() {
        let dir = tempfile::tempdir().unwrap();
        let run = Uuid::new_v4();
        let emitter = EventEmitter::new(dir.path()).for_run(run);

        emitter.emit_simple("agent_started", "hello").unwrap();
        emitter
            .record_executor(&ExecutorEvent::Started {
                action: "newAction".into(),
            })
            .unwrap();
        emitter.record_executor(&ExecutorEvent::Idle).unwrap();
        emitter
            .record_executor(&ExecutorEvent::Finished {
                action: "newAction".into(),
                result: ActionResult::success("Code finished.\n"),
            })
            .unwrap();

        let events = emitter.read_recent(2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "action_started");
        assert_eq!(events[1].event_type, "action_finished");
        assert_eq!(events[1].metadata["success"], serde_json::json!(true));
        assert!(events.iter().all(|e| e.run_id == Some(run)));
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EventEmitter::new(dir.path()).read_recent(10).is_empty());
    }
}
