//! A world with no server behind it.
//!
//! Used by the CLI to run scripts and the agent loop offline. Skill calls are
//! logged and recorded, then succeed with `null`.

use async_trait::async_trait;
use hearth_core::{BotStatus, EntityInfo, GameWorld};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct HeadlessWorld {
    status: BotStatus,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl HeadlessWorld {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            status: BotStatus {
                username: username.into(),
                ..BotStatus::default()
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every skill invoked so far, oldest first.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GameWorld for HeadlessWorld {
    fn status(&self) -> BotStatus {
        self.status.clone()
    }

    fn nearby_entities(&self, _radius: f64) -> Vec<EntityInfo> {
        Vec::new()
    }

    async fn invoke(
        &self,
        skill: &str,
        args: &[Value],
        interrupt: &CancellationToken,
    ) -> anyhow::Result<Value> {
        if interrupt.is_cancelled() {
            anyhow::bail!("{skill} interrupted");
        }
        let shown = Value::Array(args.to_vec());
        tracing::info!(skill, args = %shown, "skill call");
        self.calls.lock().push((skill.to_string(), args.to_vec()));
        tokio::task::yield_now().await;
        Ok(Value::Null)
    }

    fn interrupt_subtasks(&self) {
        tracing::debug!("interrupting sub-tasks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn skill_calls_are_recorded_until_interrupted() {
        let world = HeadlessWorld::new("andy");
        let token = CancellationToken::new();

        let result = world
            .invoke("collectBlock", &[json!("oak_log"), json!(2)], &token)
            .await
            .unwrap();
        assert_eq!(result, Value::Null);

        token.cancel();
        let err = world.invoke("goToPlayer", &[json!("sam")], &token).await.unwrap_err();
        assert_eq!(err.to_string(), "goToPlayer interrupted");

        assert_eq!(
            world.calls(),
            vec![("collectBlock".to_string(), vec![json!("oak_log"), json!(2)])]
        );
        assert_eq!(world.status().username, "andy");
    }
}
