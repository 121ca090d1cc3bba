use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::world::GameWorld;

/// Returned by cancellation checkpoints once the interrupt flag is raised.
///
/// The executor treats an action that fails with this error as having
/// returned normally after an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("action interrupted")]
pub struct Interrupted;

/// Text produced by the running action.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    text: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&self, line: &str) {
        let mut text = self.text.lock();
        text.push_str(line);
        text.push('\n');
    }

    pub fn push_str(&self, s: &str) {
        self.text.lock().push_str(s);
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().clone()
    }

    pub fn clear(&self) {
        self.text.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.text.lock().is_empty()
    }
}

/// Everything an action may touch while it runs.
#[derive(Clone)]
pub struct ActionContext {
    world: Arc<dyn GameWorld>,
    interrupt: CancellationToken,
    output: OutputBuffer,
}

impl ActionContext {
    pub fn new(world: Arc<dyn GameWorld>, interrupt: CancellationToken, output: OutputBuffer) -> Self {
        Self {
            world,
            interrupt,
            output,
        }
    }

    pub fn world(&self) -> &dyn GameWorld {
        self.world.as_ref()
    }

    pub fn world_handle(&self) -> Arc<dyn GameWorld> {
        Arc::clone(&self.world)
    }

    pub fn interrupt(&self) -> &CancellationToken {
        &self.interrupt
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Append a line to the captured output.
    pub fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::debug!(output = line, "action output");
        self.output.push_line(line);
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.interrupt.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep that ends early when the interrupt flag is raised.
    pub async fn wait(&self, duration: Duration) -> Result<(), Interrupted> {
        tokio::select! {
            _ = self.interrupt.cancelled() => Err(Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Invoke a world skill with this action's interrupt token.
    ///
    /// A skill that fails after the interrupt was raised reports
    /// [`Interrupted`] rather than its own error.
    pub async fn skill(&self, name: &str, args: &[Value]) -> anyhow::Result<Value> {
        self.checkpoint()?;
        match self.world.invoke(name, args, &self.interrupt).await {
            Err(e) if self.interrupt.is_cancelled() => {
                tracing::debug!(skill = name, error = %format!("{e:#}"), "skill ended by interrupt");
                Err(Interrupted.into())
            }
            other => other,
        }
    }
}

/// A unit of behavior the executor can run: a hand-written skill sequence or
/// a staged script.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, cx: &ActionContext) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`Action`].
pub struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, cx: &ActionContext) -> anyhow::Result<()> {
        (self.f)(cx.clone()).await
    }
}

pub fn action_fn<F, Fut>(f: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnAction { f })
}

/// Single skill call as an action, used by the reactive modes.
pub struct SkillAction {
    skill: &'static str,
    args: Vec<Value>,
}

impl SkillAction {
    pub fn new(skill: &'static str, args: Vec<Value>) -> Self {
        Self { skill, args }
    }
}

#[async_trait]
impl Action for SkillAction {
    async fn run(&self, cx: &ActionContext) -> anyhow::Result<()> {
        let result = cx.skill(self.skill, &self.args).await?;
        if let Some(text) = result.as_str() {
            if !text.is_empty() {
                cx.log(text);
            }
        }
        Ok(())
    }
}
