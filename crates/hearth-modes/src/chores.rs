//! Opportunistic modes. They run when the agent is idle or merely following
//! a player.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::world::skills;
use hearth_core::{EntityKind, Interrupts, Mode, ModeContext, SkillAction};
use serde_json::json;
use tokio::time::Instant;

use crate::FOLLOW_PLAYER;

pub const HUNTING: &str = "hunting";
pub const ITEM_COLLECTING: &str = "item_collecting";
pub const TORCH_PLACING: &str = "torch_placing";

pub struct Hunting;

impl Mode for Hunting {
    fn name(&self) -> &'static str {
        HUNTING
    }

    fn description(&self) -> &'static str {
        "Hunt nearby animals when idle."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::actions(&[FOLLOW_PLAYER])
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        if let Some(prey) = cx.world().nearest_entity(EntityKind::Animal, 8.0) {
            cx.say(format!("Hunting {}!", prey.name));
            cx.execute(
                Arc::new(SkillAction::new(skills::ATTACK_ENTITY, vec![json!(prey.id)])),
                None,
            );
        }
    }
}

/// Picks up dropped items once they have been in view for a moment.
pub struct ItemCollecting {
    settle: Duration,
    noticed_at: Option<Instant>,
    last_item: Option<u64>,
}

impl Default for ItemCollecting {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            noticed_at: None,
            last_item: None,
        }
    }
}

impl Mode for ItemCollecting {
    fn name(&self) -> &'static str {
        ITEM_COLLECTING
    }

    fn description(&self) -> &'static str {
        "Collect nearby items when idle."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::actions(&[FOLLOW_PLAYER])
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        let item = cx
            .world()
            .nearest_entity(EntityKind::Item, 8.0)
            .filter(|item| self.last_item != Some(item.id));
        let Some(item) = item else {
            self.noticed_at = None;
            return;
        };

        let now = Instant::now();
        let noticed_at = *self.noticed_at.get_or_insert(now);
        if now - noticed_at > self.settle {
            cx.say("Picking up item!");
            self.last_item = Some(item.id);
            self.noticed_at = None;
            cx.execute(Arc::new(SkillAction::new(skills::PICKUP_NEARBY_ITEMS, Vec::new())), None);
        }
    }
}

/// Lights up the surroundings at night.
pub struct TorchPlacing {
    cooldown: Duration,
    last_placed: Option<Instant>,
}

impl Default for TorchPlacing {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            last_placed: None,
        }
    }
}

impl Mode for TorchPlacing {
    fn name(&self) -> &'static str {
        TORCH_PLACING
    }

    fn description(&self) -> &'static str {
        "Place a torch every few seconds when idle at night."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::actions(&[FOLLOW_PLAYER])
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        if cx.world().status().is_day {
            return;
        }
        let now = Instant::now();
        if self.last_placed.is_some_and(|t| now - t < self.cooldown) {
            return;
        }
        self.last_placed = Some(now);
        cx.execute(Arc::new(SkillAction::new(skills::PLACE_TORCH, Vec::new())), None);
    }
}
