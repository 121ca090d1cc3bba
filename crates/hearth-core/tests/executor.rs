use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::{
    action_fn, ActionResult, BotStatus, EntityInfo, Executor, ExecutorConfig, ExecutorError,
    ExecutorEvent, FatalHandler, GameWorld, SelfPromptHandle, SelfPromptState,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingWorld {
    interrupts: AtomicUsize,
    calls: Mutex<Vec<String>>,
    /// Fail cancelled skills instead of returning `false`.
    fail_on_cancel: bool,
}

#[async_trait]
impl GameWorld for RecordingWorld {
    fn status(&self) -> BotStatus {
        BotStatus::default()
    }

    fn nearby_entities(&self, _radius: f64) -> Vec<EntityInfo> {
        Vec::new()
    }

    async fn invoke(
        &self,
        skill: &str,
        _args: &[Value],
        interrupt: &CancellationToken,
    ) -> anyhow::Result<Value> {
        self.calls.lock().push(skill.to_string());
        // Long pathfinding that honors cancellation.
        tokio::select! {
            _ = interrupt.cancelled(), if self.fail_on_cancel => anyhow::bail!("{skill} was cancelled"),
            _ = interrupt.cancelled() => Ok(Value::Bool(false)),
            _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(Value::Bool(true)),
        }
    }

    fn interrupt_subtasks(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingFatal {
    refused: Mutex<Vec<String>>,
}

impl FatalHandler for RecordingFatal {
    fn stop_refused(&self, action: &str) {
        self.refused.lock().push(action.to_string());
    }
}

fn ready_executor(world: Arc<RecordingWorld>) -> Executor {
    let executor = Executor::new(world, ExecutorConfig::default());
    executor.set_harness_loaded(true);
    executor
}

async fn wait_until_executing(executor: &Executor) {
    while !executor.is_executing() {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ExecutorEvent>) -> Vec<ExecutorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn execute_without_harness_fails_without_side_effects() {
    let executor = Executor::new(Arc::new(RecordingWorld::default()), ExecutorConfig::default());
    let mut rx = executor.subscribe();

    let result = executor
        .execute("action:noop", action_fn(|_cx| async { Ok(()) }), None)
        .await;

    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some("Action harness is not loaded."));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn successful_action_captures_output_and_signals_idle() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));
    let mut rx = executor.subscribe();

    let result = executor
        .execute(
            "action:greet",
            action_fn(|cx| async move {
                cx.log("hello");
                cx.log("world");
                Ok(())
            }),
            None,
        )
        .await;

    assert_eq!(
        result,
        ActionResult {
            success: true,
            message: Some("hello\nworld\n".to_string()),
            interrupted: false,
            timed_out: false,
        }
    );

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        ExecutorEvent::Started {
            action: "action:greet".to_string()
        }
    );
    assert!(matches!(events[1], ExecutorEvent::Finished { .. }));
    assert_eq!(events[2], ExecutorEvent::Idle);

    let state = executor.state();
    assert!(!state.executing);
    assert!(state.current_action.is_empty());
    assert!(state.last_output.is_empty());
}

#[tokio::test]
async fn thrown_error_is_reported_and_cancels_resume() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));

    let failing = action_fn(|cx| async move {
        cx.log("crafting planks");
        anyhow::bail!("no oak_log in inventory")
    });
    let result = executor
        .execute_resume(Some(("action:craft", failing)), None)
        .await;

    assert!(!result.success);
    assert!(!result.interrupted);
    assert!(!result.timed_out);
    let message = result.message.unwrap();
    assert!(message.starts_with("crafting planks\n"));
    assert!(message.contains("!!Code threw exception!!"));
    assert!(message.contains("no oak_log in inventory"));
    assert!(!executor.has_resume());
}

#[tokio::test(start_paused = true)]
async fn timeout_stops_action_through_the_stop_path() {
    let world = Arc::new(RecordingWorld::default());
    let executor = ready_executor(Arc::clone(&world));
    let mut rx = executor.subscribe();
    let started = Instant::now();

    let result = executor
        .execute(
            "action:dig",
            action_fn(|cx| async move {
                loop {
                    cx.checkpoint()?;
                    cx.wait(Duration::from_secs(1)).await?;
                }
            }),
            Some(Duration::from_secs(60)),
        )
        .await;

    assert!(result.interrupted);
    assert!(result.timed_out);
    assert!(result.success);
    assert!(result.message.unwrap().contains("Code interrupted."));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(62));
    assert!(world.interrupts.load(Ordering::SeqCst) >= 1);

    let events = drain(&mut rx);
    assert!(!events.contains(&ExecutorEvent::Idle));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_world_subtasks_and_reports_interrupted() {
    let world = Arc::new(RecordingWorld::default());
    let executor = ready_executor(Arc::clone(&world));

    let running = executor.clone();
    let task = tokio::spawn(async move {
        running
            .execute(
                "action:goToPlayer",
                action_fn(|cx| async move {
                    cx.skill("goToPlayer", &[Value::from("steve")]).await?;
                    Ok(())
                }),
                None,
            )
            .await
    });

    wait_until_executing(&executor).await;
    assert_eq!(executor.current_action_name(), "action:goToPlayer");

    executor.stop().await.unwrap();
    let result = task.await.unwrap();

    assert!(result.interrupted);
    assert!(!result.timed_out);
    assert!(!executor.is_executing());
    assert_eq!(world.calls.lock().as_slice(), ["goToPlayer"]);
    assert!(world.interrupts.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn skill_failing_because_of_stop_counts_as_interrupted() {
    let world = Arc::new(RecordingWorld {
        fail_on_cancel: true,
        ..RecordingWorld::default()
    });
    let executor = ready_executor(Arc::clone(&world));

    let running = executor.clone();
    let task = tokio::spawn(async move {
        running
            .execute(
                "action:goToPlayer",
                action_fn(|cx| async move {
                    cx.skill("goToPlayer", &[Value::from("steve")]).await?;
                    Ok(())
                }),
                None,
            )
            .await
    });
    wait_until_executing(&executor).await;
    executor.stop().await.unwrap();
    let result = task.await.unwrap();

    assert!(result.success, "{result:?}");
    assert!(result.interrupted);
    let message = result.message.unwrap();
    assert!(message.contains("Code interrupted."));
    assert!(!message.contains("was cancelled"));
}

#[tokio::test(start_paused = true)]
async fn exception_thrown_while_stopping_is_still_a_failure() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));

    let running = executor.clone();
    let task = tokio::spawn(async move {
        running
            .execute_resume(
                Some((
                    "action:build",
                    action_fn(|cx| async move {
                        if cx.wait(Duration::from_secs(30)).await.is_err() {
                            anyhow::bail!("scaffolding collapsed");
                        }
                        Ok(())
                    }),
                )),
                None,
            )
            .await
    });
    wait_until_executing(&executor).await;
    assert!(executor.has_resume());
    executor.stop().await.unwrap();
    let result = task.await.unwrap();

    assert!(!result.success);
    assert!(result.interrupted);
    let message = result.message.unwrap();
    assert!(message.contains("!!Code threw exception!!"));
    assert!(message.contains("scaffolding collapsed"));
    assert!(!message.contains("Code interrupted."));
    assert!(!executor.has_resume());
}

#[tokio::test]
async fn stop_without_running_action_is_noop() {
    let world = Arc::new(RecordingWorld::default());
    let executor = ready_executor(Arc::clone(&world));

    executor.stop().await.unwrap();
    assert_eq!(world.interrupts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_action_executes_at_a_time() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));
    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let executor = executor.clone();
        let running = Arc::clone(&running);
        let max_seen = Arc::clone(&max_seen);
        tasks.push(tokio::spawn(async move {
            let action = action_fn(move |cx| {
                let running = Arc::clone(&running);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    let waited = cx.wait(Duration::from_secs(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    waited?;
                    Ok(())
                }
            });
            executor.execute(&format!("action:{i}"), action, None).await
        }));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(results[..3].iter().all(|r| r.interrupted && !r.timed_out));
    assert!(!results[3].interrupted);
    assert!(results[3].success);
}

#[tokio::test(start_paused = true)]
async fn action_ignoring_cancellation_escalates_after_deadline() {
    let fatal = Arc::new(RecordingFatal::default());
    let executor = Executor::with_hooks(
        Arc::new(RecordingWorld::default()),
        ExecutorConfig::default(),
        SelfPromptHandle::new(),
        fatal.clone(),
    );
    executor.set_harness_loaded(true);
    let mut rx = executor.subscribe();

    let running = executor.clone();
    let stuck = tokio::spawn(async move {
        running
            .execute(
                "action:runaway",
                action_fn(|_cx| async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }),
                None,
            )
            .await
    });
    wait_until_executing(&executor).await;

    let started = Instant::now();
    let err = executor.stop().await.unwrap_err();

    assert!(matches!(err, ExecutorError::StopRefused { ref action, .. } if action == "action:runaway"));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(fatal.refused.lock().as_slice(), ["action:runaway"]);
    assert!(drain(&mut rx).contains(&ExecutorEvent::StopRefused {
        action: "action:runaway".to_string()
    }));

    stuck.abort();
}

#[tokio::test]
async fn resume_with_empty_slot_is_noop() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));
    let mut rx = executor.subscribe();

    let result = executor.execute_resume(None, None).await;

    assert_eq!(
        result,
        ActionResult {
            success: false,
            message: None,
            interrupted: false,
            timed_out: false,
        }
    );
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn successful_resume_clears_slot() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));

    let result = executor
        .execute_resume(
            Some((
                "action:collectBlocks",
                action_fn(|cx| async move {
                    cx.log("collected 4 oak_log");
                    Ok(())
                }),
            )),
            None,
        )
        .await;

    assert!(result.success);
    assert!(!executor.has_resume());
}

#[tokio::test(start_paused = true)]
async fn interrupted_resume_is_retried_once_self_prompting_is_off() {
    let self_prompt = SelfPromptHandle::new();
    self_prompt.set_state(SelfPromptState::Active);
    let executor = Executor::with_hooks(
        Arc::new(RecordingWorld::default()),
        ExecutorConfig::default(),
        self_prompt.clone(),
        Arc::new(RecordingFatal::default()),
    );
    executor.set_harness_loaded(true);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let action = action_fn(move |cx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            cx.wait(Duration::from_secs(5)).await?;
            Ok(())
        }
    });

    // A freshly supplied action runs even while self-prompting.
    let running = executor.clone();
    let task = tokio::spawn(async move {
        running
            .execute_resume(Some(("action:followPlayer", action)), None)
            .await
    });
    wait_until_executing(&executor).await;
    executor.stop().await.unwrap();
    let first = task.await.unwrap();
    assert!(first.interrupted);
    assert_eq!(executor.resume_name().as_deref(), Some("action:followPlayer"));

    // The stored action waits while the self-prompt loop is on.
    let skipped = executor.execute_resume(None, None).await;
    assert_eq!(skipped, ActionResult::noop());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    self_prompt.set_state(SelfPromptState::Stopped);
    let resumed = executor.execute_resume(None, None).await;
    assert!(resumed.success);
    assert!(!resumed.interrupted);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(!executor.has_resume());
}

#[tokio::test]
async fn generation_in_progress_suppresses_idle_signal() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));
    let mut rx = executor.subscribe();

    let guard = executor.begin_generating();
    assert!(!executor.is_idle());
    let result = executor
        .execute("action:newAction", action_fn(|_cx| async { Ok(()) }), None)
        .await;
    assert!(result.success);
    assert!(!drain(&mut rx).contains(&ExecutorEvent::Idle));

    drop(guard);
    assert!(executor.is_idle());
}

#[tokio::test]
async fn clear_resets_interrupt_but_keeps_resume() {
    let executor = ready_executor(Arc::new(RecordingWorld::default()));
    // Store a resume without running it by keeping the agent busy.
    let guard = executor.begin_generating();
    let stored = executor
        .execute_resume(Some(("action:followPlayer", action_fn(|_cx| async { Ok(()) }))), None)
        .await;
    assert_eq!(stored, ActionResult::noop());
    drop(guard);

    executor.request_interrupt();
    assert!(executor.is_interrupted());
    executor.clear();
    assert!(!executor.is_interrupted());
    assert!(executor.has_resume());
}
