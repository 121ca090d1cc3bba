use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::world::skills;
use hearth_core::{
    Arbitrator, BotStatus, EntityInfo, EntityKind, Executor, ExecutorConfig, GameWorld, Mode,
    SelfPromptHandle, SkillAction, Vec3,
};
use hearth_modes::{
    default_modes, ElbowRoom, Hunting, IdleStaring, ItemCollecting, SelfPreservation, TorchPlacing,
    Unstuck,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Skills whose names start with `long` run until cancelled.
#[derive(Default)]
struct FakeWorld {
    status: Mutex<BotStatus>,
    entities: Mutex<Vec<EntityInfo>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl FakeWorld {
    fn put(&self, id: u64, name: &str, kind: EntityKind, distance: f64) {
        let origin = self.status.lock().position;
        self.entities.lock().push(EntityInfo {
            id,
            name: name.to_string(),
            kind,
            position: Vec3::new(origin.x + distance, origin.y, origin.z),
        });
    }

    fn calls_to(&self, skill: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == skill)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl GameWorld for FakeWorld {
    fn status(&self) -> BotStatus {
        self.status.lock().clone()
    }

    fn nearby_entities(&self, radius: f64) -> Vec<EntityInfo> {
        let origin = self.status.lock().position;
        let mut found: Vec<_> = self
            .entities
            .lock()
            .iter()
            .filter(|e| e.position.distance(&origin) <= radius)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.position
                .distance(&origin)
                .total_cmp(&b.position.distance(&origin))
        });
        found
    }

    async fn invoke(
        &self,
        skill: &str,
        args: &[Value],
        interrupt: &CancellationToken,
    ) -> anyhow::Result<Value> {
        self.calls.lock().push((skill.to_string(), args.to_vec()));
        if skill.starts_with("long") {
            interrupt.cancelled().await;
            anyhow::bail!("{skill} cancelled");
        }
        Ok(match skill {
            skills::GO_TO_NEAREST_BLOCK => json!(true),
            _ => Value::Null,
        })
    }

    fn interrupt_subtasks(&self) {}
}

struct Harness {
    world: Arc<FakeWorld>,
    executor: Executor,
    arbitrator: Arbitrator,
}

fn harness(modes: Vec<Box<dyn Mode>>) -> Harness {
    let world = Arc::new(FakeWorld::default());
    let executor = Executor::new(world.clone(), ExecutorConfig::default());
    executor.set_harness_loaded(true);
    let arbitrator = Arbitrator::new(executor.clone(), SelfPromptHandle::new(), modes);
    Harness {
        world,
        executor,
        arbitrator,
    }
}

/// Let spawned reactions and background calls run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Start a never-ending action under `name` and wait until it holds the slot.
async fn occupy(executor: &Executor, name: &'static str) {
    let runner = executor.clone();
    tokio::spawn(async move {
        runner
            .execute(name, Arc::new(SkillAction::new("longTask", Vec::new())), None)
            .await
    });
    while executor.current_action_name() != name {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn cowardice_outranks_self_defense() {
    let mut h = harness(default_modes());
    h.world.put(1, "cave_spider", EntityKind::Hostile, 5.0);

    let invoked = h.arbitrator.tick();
    settle().await;

    assert!(invoked.contains(&"cowardice"));
    assert!(!invoked.contains(&"self_defense"));
    assert_eq!(h.world.calls_to(skills::AVOID_ENEMIES), vec![vec![json!(24)]]);
    assert_eq!(h.arbitrator.flush_behavior_log(), "Aaa! A cave spider!\n");
}

#[tokio::test(start_paused = true)]
async fn self_defense_fights_when_cowardice_is_off() {
    let mut h = harness(default_modes());
    h.arbitrator.set_on("cowardice", false);
    h.world.put(1, "zombie", EntityKind::Hostile, 5.0);

    h.arbitrator.tick();
    settle().await;

    assert_eq!(h.world.calls_to(skills::DEFEND_SELF), vec![vec![json!(8)]]);
    assert!(h.world.calls_to(skills::AVOID_ENEMIES).is_empty());
}

#[tokio::test(start_paused = true)]
async fn self_preservation_reacts_to_hazards() {
    let mut h = harness(vec![Box::new(SelfPreservation::default())]);

    h.world.status.lock().head_block = "water".into();
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::JUMP).len(), 1);
    assert!(!h.executor.is_executing());

    h.world.status.lock().head_block = "gravel".into();
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::MOVE_AWAY), vec![vec![json!(2)]]);

    *h.world.status.lock() = BotStatus {
        feet_block: "lava".into(),
        ..BotStatus::default()
    };
    h.arbitrator.tick();
    settle().await;
    assert_eq!(
        h.world.calls_to(skills::GO_TO_NEAREST_BLOCK),
        vec![vec![json!("water"), json!(20)]]
    );
    // Water was found, so no extra retreat.
    assert_eq!(h.world.calls_to(skills::MOVE_AWAY).len(), 1);

    *h.world.status.lock() = BotStatus {
        health: 4.0,
        since_last_damage: Some(Duration::from_secs(1)),
        last_damage_taken: 3.0,
        ..BotStatus::default()
    };
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::MOVE_AWAY).last(), Some(&vec![json!(20)]));

    assert_eq!(
        h.arbitrator.flush_behavior_log(),
        "Aaa! Falling block!\nI'm on fire!\nI'm dying!\n"
    );
}

#[tokio::test(start_paused = true)]
async fn old_damage_is_ignored() {
    let mut h = harness(vec![Box::new(SelfPreservation::default())]);
    *h.world.status.lock() = BotStatus {
        health: 4.0,
        since_last_damage: Some(Duration::from_secs(30)),
        ..BotStatus::default()
    };

    h.arbitrator.tick();
    settle().await;

    assert!(h.world.calls_to(skills::MOVE_AWAY).is_empty());
    assert_eq!(h.world.calls_to(skills::CLEAR_CONTROLS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hunting_only_breaks_into_following() {
    let mut h = harness(vec![Box::new(Hunting)]);
    h.world.put(7, "cow", EntityKind::Animal, 4.0);

    occupy(&h.executor, "collectBlocks").await;
    assert!(h.arbitrator.tick().is_empty());

    occupy(&h.executor, "followPlayer").await;
    assert_eq!(h.arbitrator.tick(), vec!["hunting"]);
    settle().await;

    assert_eq!(h.world.calls_to(skills::ATTACK_ENTITY), vec![vec![json!(7)]]);
    assert_eq!(h.arbitrator.flush_behavior_log(), "Hunting cow!\n");
}

#[tokio::test(start_paused = true)]
async fn items_are_collected_after_settling() {
    let mut h = harness(vec![Box::new(ItemCollecting::default())]);
    h.world.put(3, "item", EntityKind::Item, 4.0);

    h.arbitrator.tick();
    tokio::time::advance(Duration::from_millis(1500)).await;
    h.arbitrator.tick();
    settle().await;
    assert!(h.world.calls_to(skills::PICKUP_NEARBY_ITEMS).is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::PICKUP_NEARBY_ITEMS).len(), 1);

    // The same item is not chased twice.
    tokio::time::advance(Duration::from_secs(5)).await;
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::PICKUP_NEARBY_ITEMS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn torches_respect_daylight_and_cooldown() {
    let mut h = harness(vec![Box::new(TorchPlacing::default())]);

    h.arbitrator.tick();
    settle().await;
    assert!(h.world.calls_to(skills::PLACE_TORCH).is_empty());

    h.world.status.lock().is_day = false;
    h.arbitrator.tick();
    settle().await;
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::PLACE_TORCH).len(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::PLACE_TORCH).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn torches_keep_coming_on_the_cooldown_all_night() {
    let mode = TorchPlacing::default();
    assert!(mode.description().contains("at night"));
    assert!(!mode.description().contains("nearby"));

    let mut h = harness(vec![Box::new(mode)]);
    h.world.status.lock().is_day = false;
    for _ in 0..3 {
        h.arbitrator.tick();
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
    }
    assert_eq!(h.world.calls_to(skills::PLACE_TORCH).len(), 3);

    h.world.status.lock().is_day = true;
    h.arbitrator.tick();
    settle().await;
    assert_eq!(h.world.calls_to(skills::PLACE_TORCH).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unstuck_moves_away_after_twenty_still_seconds() {
    let mut h = harness(vec![Box::new(Unstuck::default())]);
    occupy(&h.executor, "longWalk").await;

    for _ in 0..20 {
        h.arbitrator.tick();
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    assert!(h.world.calls_to(skills::MOVE_AWAY).is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    h.arbitrator.tick();
    settle().await;

    assert_eq!(h.world.calls_to(skills::MOVE_AWAY), vec![vec![json!(5)]]);
    assert_eq!(h.arbitrator.flush_behavior_log(), "I'm stuck!\n");
}

#[tokio::test(start_paused = true)]
async fn unstuck_leaves_a_moving_agent_alone() {
    let mut h = harness(vec![Box::new(Unstuck::default())]);
    occupy(&h.executor, "longWalk").await;

    for step in 0..40 {
        h.world.status.lock().position = Vec3::new(f64::from(step) * 3.0, 64.0, 0.0);
        h.arbitrator.tick();
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    assert!(h.world.calls_to(skills::MOVE_AWAY).is_empty());
}

#[tokio::test(start_paused = true)]
async fn elbow_room_steps_away_from_close_players() {
    let mut h = harness(vec![Box::new(ElbowRoom)]);
    h.world.put(11, "sam", EntityKind::Player, 1.0);

    h.arbitrator.tick();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        h.world.calls_to(skills::MOVE_AWAY_FROM_ENTITY),
        vec![vec![json!(11), json!(3.0)]]
    );
}

#[tokio::test(start_paused = true)]
async fn idle_staring_never_takes_the_executor() {
    let mut h = harness(vec![Box::new(IdleStaring::with_seed(7))]);
    h.world.put(11, "sam", EntityKind::Player, 4.0);

    h.arbitrator.tick();
    settle().await;

    assert!(!h.executor.is_executing());
    assert!(!h.arbitrator.is_active("idle_staring"));
    let looks = h.world.calls_to(skills::LOOK_AT);
    assert_eq!(looks, vec![vec![json!([4.0, 1.6, 0.0])]]);
}
