//! Modes that keep the agent alive. All of them may break into any action.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::world::skills;
use hearth_core::{action_fn, EntityKind, Interrupts, Mode, ModeContext, SkillAction, Vec3};
use serde_json::json;
use tokio::time::Instant;

pub const SELF_PRESERVATION: &str = "self_preservation";
pub const UNSTUCK: &str = "unstuck";
pub const COWARDICE: &str = "cowardice";
pub const SELF_DEFENSE: &str = "self_defense";

const FALLING_BLOCKS: &[&str] = &["sand", "gravel", "concrete_powder"];

fn is_falling_block(name: &str) -> bool {
    FALLING_BLOCKS.iter().any(|b| name == *b || name.ends_with(b))
}

fn is_burning(name: &str) -> bool {
    name == "lava" || name == "fire" || name == "soul_fire"
}

fn display_name(name: &str) -> String {
    name.replacen('_', " ", 1)
}

/// Drowning, falling blocks, fire and heavy damage.
pub struct SelfPreservation {
    damage_window: Duration,
    low_health: f32,
    flee_distance: u32,
    water_search_range: u32,
}

impl Default for SelfPreservation {
    fn default() -> Self {
        Self {
            damage_window: Duration::from_secs(3),
            low_health: 5.0,
            flee_distance: 20,
            water_search_range: 20,
        }
    }
}

impl Mode for SelfPreservation {
    fn name(&self) -> &'static str {
        SELF_PRESERVATION
    }

    fn description(&self) -> &'static str {
        "Respond to drowning, burning, and damage at low health. Interrupts all actions."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::All
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        let status = cx.world().status();

        if status.head_block == "water" {
            // Swim up; never worth occupying the executor for.
            cx.fire(skills::JUMP, Vec::new());
        } else if is_falling_block(&status.head_block) {
            cx.say("Aaa! Falling block!");
            cx.execute(Arc::new(SkillAction::new(skills::MOVE_AWAY, vec![json!(2)])), None);
        } else if is_burning(&status.feet_block) || is_burning(&status.head_block) {
            cx.say("I'm on fire!");
            let range = self.water_search_range;
            cx.execute(
                action_fn(move |cx| async move {
                    let found = cx
                        .skill(skills::GO_TO_NEAREST_BLOCK, &[json!("water"), json!(range)])
                        .await?;
                    if found.as_bool() == Some(true) {
                        cx.log("Ahhhh that's better!");
                    } else {
                        cx.skill(skills::MOVE_AWAY, &[json!(5)]).await?;
                    }
                    Ok(())
                }),
                None,
            );
        } else if status.since_last_damage.is_some_and(|t| t < self.damage_window)
            && (status.health < self.low_health || status.last_damage_taken >= status.health)
        {
            cx.say("I'm dying!");
            cx.execute(
                Arc::new(SkillAction::new(skills::MOVE_AWAY, vec![json!(self.flee_distance)])),
                None,
            );
        } else if cx.is_idle() {
            cx.fire(skills::CLEAR_CONTROLS, Vec::new());
        }
    }
}

/// Moves the agent on when a running action has left it in place too long.
pub struct Unstuck {
    min_travel: f64,
    max_stuck: Duration,
    anchor: Option<Vec3>,
    stuck_for: Duration,
    last_update: Option<Instant>,
}

impl Default for Unstuck {
    fn default() -> Self {
        Self {
            min_travel: 2.0,
            max_stuck: Duration::from_secs(20),
            anchor: None,
            stuck_for: Duration::ZERO,
            last_update: None,
        }
    }
}

impl Unstuck {
    fn reset(&mut self) {
        self.anchor = None;
        self.stuck_for = Duration::ZERO;
    }
}

impl Mode for Unstuck {
    fn name(&self) -> &'static str {
        UNSTUCK
    }

    fn description(&self) -> &'static str {
        "Attempt to get unstuck when in the same place for a while. Interrupts all actions."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::All
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        let now = Instant::now();
        let since_last = self
            .last_update
            .replace(now)
            .map_or(Duration::ZERO, |t| now - t);

        if cx.is_idle() {
            self.reset();
            return;
        }

        let position = cx.world().status().position;
        match self.anchor {
            Some(anchor) if anchor.distance(&position) < self.min_travel => {
                self.stuck_for += since_last;
            }
            _ => {
                self.anchor = Some(position);
                self.stuck_for = Duration::ZERO;
            }
        }

        if self.stuck_for > self.max_stuck {
            tracing::info!(stuck_ms = self.stuck_for.as_millis() as u64, "agent appears stuck");
            cx.say("I'm stuck!");
            self.reset();
            cx.execute(Arc::new(SkillAction::new(skills::MOVE_AWAY, vec![json!(5)])), None);
        }
    }
}

/// Runs from hostiles.
pub struct Cowardice;

impl Mode for Cowardice {
    fn name(&self) -> &'static str {
        COWARDICE
    }

    fn description(&self) -> &'static str {
        "Run away from enemies. Interrupts all actions."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::All
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        if let Some(enemy) = cx.world().nearest_entity(EntityKind::Hostile, 16.0) {
            cx.say(format!("Aaa! A {}!", display_name(&enemy.name)));
            cx.execute(Arc::new(SkillAction::new(skills::AVOID_ENEMIES, vec![json!(24)])), None);
        }
    }
}

/// Fights hostiles that get close.
pub struct SelfDefense;

impl Mode for SelfDefense {
    fn name(&self) -> &'static str {
        SELF_DEFENSE
    }

    fn description(&self) -> &'static str {
        "Attack nearby enemies. Interrupts all actions."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::All
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        if let Some(enemy) = cx.world().nearest_entity(EntityKind::Hostile, 8.0) {
            cx.say(format!("Fighting {}!", display_name(&enemy.name)));
            cx.execute(Arc::new(SkillAction::new(skills::DEFEND_SELF, vec![json!(8)])), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_classification() {
        assert!(is_falling_block("gravel"));
        assert!(is_falling_block("red_concrete_powder"));
        assert!(!is_falling_block("sandstone"));
        assert!(is_burning("lava"));
        assert!(!is_burning("fire_coral"));
    }

    #[test]
    fn names_read_naturally() {
        assert_eq!(display_name("cave_spider"), "cave spider");
        assert_eq!(display_name("zombie"), "zombie");
    }
}
