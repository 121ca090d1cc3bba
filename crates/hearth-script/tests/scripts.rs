use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::{BotStatus, EntityInfo, Executor, ExecutorConfig, GameWorld, Vec3};
use hearth_script::{Harness, SafetyFilter, Stager, StagingError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Records skill calls. `slowWalk` takes ten seconds unless interrupted and
/// `explode` always fails.
#[derive(Default)]
struct ScriptedWorld {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

#[async_trait]
impl GameWorld for ScriptedWorld {
    fn status(&self) -> BotStatus {
        BotStatus {
            username: "andy".into(),
            health: 17.5,
            position: Vec3::new(10.0, 64.0, -3.0),
            ..BotStatus::default()
        }
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
        self.calls.lock().push((skill.to_string(), args.to_vec()));
        match skill {
            "explode" => anyhow::bail!("boom"),
            "slowWalk" => {
                tokio::select! {
                    _ = interrupt.cancelled() => anyhow::bail!("walk cancelled"),
                    _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(json!(true)),
                }
            }
            "collectBlock" => Ok(json!(format!("Collected {}.", args[0].as_str().unwrap_or("?")))),
            _ => Ok(Value::Null),
        }
    }

    fn interrupt_subtasks(&self) {}
}

fn setup() -> (Arc<ScriptedWorld>, Executor, Stager) {
    let world = Arc::new(ScriptedWorld::default());
    let executor = Executor::new(world.clone(), ExecutorConfig::default());
    executor.set_harness_loaded(true);
    (world, executor, Stager::default())
}

#[tokio::test]
async fn script_drives_skills_and_captures_output() {
    let (world, executor, stager) = setup();
    let code = r#"```javascript
        let total = 0;
        for (const block of ["oak_log", "birch_log"]) {
            const msg = await skills.collectBlock(bot, block, 2);
            log(bot, msg);
            total += 2;
        }
        log(`total ${total}`);
    "#;
    let staged = stager.stage(code.trim_start_matches("```")).unwrap();

    let result = executor.execute("newAction", staged.into_action(), None).await;

    assert!(result.success, "{result:?}");
    assert!(!result.interrupted);
    assert_eq!(
        result.message.as_deref(),
        Some("Collected oak_log.\nCollected birch_log.\ntotal 4\nCode finished.\n")
    );
    let calls = world.calls.lock();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ("collectBlock".to_string(), vec![json!("oak_log"), json!(2)]));
}

#[tokio::test]
async fn bot_is_a_live_status_snapshot() {
    let (_world, executor, stager) = setup();
    let staged = stager
        .stage("log(bot.username, bot.health, bot.entity.position.y); console.log(typeof bot.position);")
        .unwrap();

    let result = executor.execute("newAction", staged.into_action(), None).await;

    assert_eq!(result.message.as_deref(), Some("andy 17.5 64\nobject\nCode finished.\n"));
}

#[tokio::test]
async fn skill_failure_is_reported_as_thrown_error() {
    let (_world, executor, stager) = setup();
    let staged = stager.stage("log('before'); await skills.explode(bot); log('after');").unwrap();

    let result = executor.execute("newAction", staged.into_action(), None).await;

    assert!(!result.success);
    assert!(!result.interrupted);
    let message = result.message.unwrap();
    assert!(message.starts_with("before\n!!Code threw exception!!"), "{message}");
    assert!(message.contains("explode failed: boom"));
    assert!(!message.contains("after"));
}

#[tokio::test]
async fn scripts_can_catch_their_own_errors() {
    let (_world, executor, stager) = setup();
    let staged = stager
        .stage(
            r#"
            try {
                await skills.explode(bot);
            } catch (err) {
                log(`recovered: ${err.message}`);
            } finally {
                log("cleanup");
            }
            try { throw new Error("custom"); } catch (e) { log(e.message); }
            "#,
        )
        .unwrap();

    let result = executor.execute("newAction", staged.into_action(), None).await;

    assert!(result.success, "{result:?}");
    assert_eq!(
        result.message.as_deref(),
        Some("recovered: explode failed: boom\ncleanup\ncustom\nCode finished.\n")
    );
}

#[tokio::test]
async fn functions_arrays_and_objects() {
    let (_world, executor, stager) = setup();

    let staged = stager
        .stage(
            r#"
            function fib(n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            let list = [];
            list.push(fib(10), 2);
            list[3] = list.length > 1 ? 9 : 0;
            const inv = { oak_log: 3 };
            inv.oak_log -= 1;
            inv["dirt"] = (inv.dirt ?? 0) + 4;
            let i = 0;
            while (true) { if (++i >= 5) break; }
            log(JSON.stringify(list), JSON.stringify(inv), i, list.includes(55));
            "#,
        )
        .unwrap();

    let result = executor.execute("newAction", staged.into_action(), None).await;

    assert!(result.success, "{result:?}");
    assert_eq!(
        result.message.as_deref(),
        Some("[55,2,null,9] {\"dirt\":4,\"oak_log\":2} 5 true\nCode finished.\n")
    );
}

#[tokio::test]
async fn runtime_errors_fail_the_action() {
    let (_world, executor, stager) = setup();

    let staged = stager.stage("const a = 1;\na = 2;").unwrap();
    let result = executor.execute("newAction", staged.into_action(), None).await;
    assert!(!result.success);
    assert!(result.message.unwrap().contains("Assignment to constant variable. (line 2)"));

    let staged = stager.stage("log(missing);").unwrap();
    let result = executor.execute("newAction", staged.into_action(), None).await;
    assert!(result.message.unwrap().contains("ReferenceError: missing is not defined"));
}

#[tokio::test]
async fn nested_writes_reach_into_containers() {
    let (_world, executor, stager) = setup();

    let staged = stager
        .stage("const grid = { rows: [[0, 0]] };\ngrid.rows[0][1] = 7;\nlog(JSON.stringify(grid));")
        .unwrap();
    let result = executor.execute("newAction", staged.into_action(), None).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.message.as_deref(), Some("{\"rows\":[[0,7]]}\nCode finished.\n"));

    let staged = stager.stage("let n = 3;\nn.x = 1;").unwrap();
    let result = executor.execute("newAction", staged.into_action(), None).await;
    assert!(!result.success);
    let message = result.message.unwrap();
    assert!(message.contains("Cannot set properties of number (setting 'x')"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn timeout_interrupts_a_waiting_script() {
    let (world, executor, stager) = setup();
    let staged = stager
        .stage("let laps = 0;\nwhile (true) { await skills.slowWalk(bot); laps++; }")
        .unwrap();

    let result = executor
        .execute("newAction", staged.into_action(), Some(Duration::from_secs(25)))
        .await;

    assert!(result.interrupted);
    assert!(result.timed_out);
    assert!(result.success);
    assert!(result.message.unwrap().ends_with("Code interrupted.\n"));
    // Two ten-second walks complete; the third is cut short.
    assert_eq!(world.calls.lock().len(), 3);
}

#[tokio::test]
async fn busy_loop_stops_at_its_checkpoint() {
    let (_world, executor, stager) = setup();
    let staged = stager.stage("let n = 0;\nwhile (true) { n++; }").unwrap();

    let running = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute("newAction", staged.into_action(), None).await })
    };
    while !executor.is_executing() {
        tokio::task::yield_now().await;
    }
    executor.stop().await.unwrap();

    let result = running.await.unwrap();
    assert!(result.interrupted);
    assert!(!result.timed_out);
    assert_eq!(result.message.as_deref(), Some("Code interrupted.\n"));
}

#[test]
fn staging_errors_are_classified() {
    let stager = Stager::default().with_known_skills(["collectBlock", "goToPlayer"]);

    let syntax = stager.stage("let = 4;").map(|_| ()).unwrap_err();
    assert!(matches!(syntax, StagingError::Syntax(_)));
    assert!(syntax.is_recoverable());

    let lint = stager
        .stage("await skills.collectBlock(bot, 'dirt', 1); await skills.flyTo(bot, 0, 0);")
        .map(|_| ())
        .unwrap_err();
    assert_eq!(lint.to_string(), "Function flyTo does not exist.");
    assert!(lint.is_recoverable());

    let template = Harness::parse("function helper() { /* CODE HERE */ }").unwrap_err();
    assert!(matches!(template, StagingError::Template(_)));
    assert!(!template.is_recoverable());
}

#[test]
fn deeply_nested_code_is_rejected_before_running() {
    let code = format!("let x = {}1{};", "(".repeat(10_000), ")".repeat(10_000));

    let err = Stager::default().stage(&code).map(|_| ()).unwrap_err();

    assert!(matches!(err, StagingError::Syntax(_)), "{err:?}");
    assert!(err.is_recoverable());
}

#[test]
fn attempts_are_numbered_and_written_out() {
    let dir = tempfile::tempdir().unwrap();
    let stager = Stager::default().with_code_dir(dir.path().join("action-code"));

    let first = stager.stage("js\nlog('one');").unwrap();
    let second = stager.stage("log('two');").unwrap();

    assert_eq!(first.attempt(), 0);
    assert_eq!(second.attempt(), 1);
    assert_eq!(first.source(), "log('one');");
    let written = std::fs::read_to_string(dir.path().join("action-code/1.js")).unwrap();
    assert!(written.contains("log('two');"));
    assert!(written.contains("async function main(bot)"));
    assert_eq!(first.path(), Some(dir.path().join("action-code/0.js").as_path()));
}

#[test]
fn unwritable_code_dir_is_a_terminal_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let stager = Stager::default().with_code_dir(&blocker);

    let err = stager.stage("log('x');").map(|_| ()).unwrap_err();

    assert!(matches!(err, StagingError::Io { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn filter_and_stager_agree_on_a_typical_script() {
    let script = "await skills.goToPlayer(bot, 'sam', 3);\nlog('arrived');";
    assert!(SafetyFilter::new().check(script));
    assert!(Stager::default().stage(script).is_ok());
}
