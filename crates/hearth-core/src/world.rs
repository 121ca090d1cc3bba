//! Interface to the live game-world connection.
//!
//! The driver itself is an external collaborator. The core only needs a
//! handful of synchronous queries for the reactive modes, one opaque skill
//! invocation surface, and a way to forward cancellation to whatever sub-task
//! the driver is running.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Hostile,
    Animal,
    Item,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: u64,
    pub name: String,
    pub kind: EntityKind,
    pub position: Vec3,
}

/// Point-in-time view of the bot itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub username: String,
    pub health: f32,
    pub food: f32,
    pub oxygen: f32,
    pub position: Vec3,
    /// Block the bot's feet are in.
    pub feet_block: String,
    /// Block occupying the space above the bot's head.
    pub head_block: String,
    pub is_day: bool,
    pub is_moving: bool,
    /// Time since the last damage event, if any was seen this session.
    pub since_last_damage: Option<Duration>,
    pub last_damage_taken: f32,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self {
            username: String::new(),
            health: 20.0,
            food: 20.0,
            oxygen: 20.0,
            position: Vec3::default(),
            feet_block: "air".to_string(),
            head_block: "air".to_string(),
            is_day: true,
            is_moving: false,
            since_last_damage: None,
            last_damage_taken: 0.0,
        }
    }
}

/// Events emitted by the world driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorldEvent {
    Spawn,
    Damage { amount: f32 },
    Death,
    Disconnect { reason: String },
    Kicked { reason: String },
}

#[async_trait]
pub trait GameWorld: Send + Sync {
    fn status(&self) -> BotStatus;

    /// Entities within `radius` blocks, nearest first.
    fn nearby_entities(&self, radius: f64) -> Vec<EntityInfo>;

    /// Invoke a named skill or world query. May suspend for a long time; the
    /// driver is expected to watch `interrupt` inside its own loops.
    async fn invoke(
        &self,
        skill: &str,
        args: &[Value],
        interrupt: &CancellationToken,
    ) -> anyhow::Result<Value>;

    /// Ask in-flight movement, collection and combat sub-tasks to exit.
    fn interrupt_subtasks(&self);

    /// Nearest entity of `kind` within `radius`.
    fn nearest_entity(&self, kind: EntityKind, radius: f64) -> Option<EntityInfo> {
        self.nearby_entities(radius)
            .into_iter()
            .find(|e| e.kind == kind)
    }
}

/// Skill names the core and the built-in modes rely on.
pub mod skills {
    pub const MOVE_AWAY: &str = "moveAway";
    pub const MOVE_AWAY_FROM_ENTITY: &str = "moveAwayFromEntity";
    pub const GO_TO_NEAREST_BLOCK: &str = "goToNearestBlock";
    pub const AVOID_ENEMIES: &str = "avoidEnemies";
    pub const DEFEND_SELF: &str = "defendSelf";
    pub const ATTACK_ENTITY: &str = "attackEntity";
    pub const PICKUP_NEARBY_ITEMS: &str = "pickupNearbyItems";
    pub const PLACE_TORCH: &str = "placeTorch";
    pub const LOOK_AT: &str = "lookAt";
    pub const JUMP: &str = "jump";
    pub const CLEAR_CONTROLS: &str = "clearControlStates";
}
