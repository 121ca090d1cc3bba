//! Ambient behaviors that make the agent look alive.

use std::f64::consts::{FRAC_PI_4, TAU};
use std::time::Duration;

use hearth_core::world::skills;
use hearth_core::{action_fn, EntityKind, Interrupts, Mode, ModeContext, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::Instant;

use crate::FOLLOW_PLAYER;

pub const ELBOW_ROOM: &str = "elbow_room";
pub const IDLE_STARING: &str = "idle_staring";

const PERSONAL_SPACE: f64 = 3.0;

/// Steps away from players standing too close.
pub struct ElbowRoom;

impl Mode for ElbowRoom {
    fn name(&self) -> &'static str {
        ELBOW_ROOM
    }

    fn description(&self) -> &'static str {
        "Move away from nearby players when idle."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::actions(&[FOLLOW_PLAYER])
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        let Some(player) = cx.world().nearest_entity(EntityKind::Player, PERSONAL_SPACE) else {
            return;
        };
        let id = player.id;
        cx.execute(
            action_fn(move |cx| {
                // Hesitate so two agents do not shuffle in lockstep.
                let hesitation = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                async move {
                    cx.wait(hesitation).await?;
                    let still_close = cx
                        .world()
                        .nearby_entities(PERSONAL_SPACE)
                        .iter()
                        .any(|e| e.id == id);
                    if still_close {
                        cx.skill(skills::MOVE_AWAY_FROM_ENTITY, &[json!(id), json!(PERSONAL_SPACE)])
                            .await?;
                    }
                    Ok(())
                }
            }),
            None,
        );
    }
}

/// Looks at nearby entities, or glances around when there is nothing to see.
///
/// Only ever issues fire-and-forget look calls, so it never occupies the
/// executor.
pub struct IdleStaring {
    rng: StdRng,
    staring: bool,
    last_entity: Option<u64>,
    next_change: Option<Instant>,
}

impl Default for IdleStaring {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl IdleStaring {
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            staring: false,
            last_entity: None,
            next_change: None,
        }
    }

    fn random_glance(&mut self, from: Vec3) -> Vec3 {
        let yaw = self.rng.gen_range(0.0..TAU);
        let pitch = self.rng.gen_range(-FRAC_PI_4..FRAC_PI_4);
        Vec3::new(
            from.x + yaw.cos() * pitch.cos() * 5.0,
            from.y + 1.6 + pitch.sin() * 5.0,
            from.z + yaw.sin() * pitch.cos() * 5.0,
        )
    }
}

impl Mode for IdleStaring {
    fn name(&self) -> &'static str {
        IDLE_STARING
    }

    fn description(&self) -> &'static str {
        "Animation to look around at entities when idle."
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::All
    }

    fn update(&mut self, cx: &mut ModeContext<'_>) {
        let now = Instant::now();
        let entity = cx
            .world()
            .nearby_entities(10.0)
            .into_iter()
            .find(|e| e.name != "enderman");

        match &entity {
            Some(e) if self.last_entity != Some(e.id) => {
                self.staring = true;
                self.last_entity = Some(e.id);
                let linger = Duration::from_millis(4000 + self.rng.gen_range(0..1000));
                self.next_change = Some(now + linger);
            }
            None => self.last_entity = None,
            Some(_) => {}
        }

        if let (Some(e), true) = (&entity, self.staring) {
            let eye = if e.kind == EntityKind::Player { 1.6 } else { 0.6 };
            let at = e.position;
            cx.fire(skills::LOOK_AT, vec![json!([at.x, at.y + eye, at.z])]);
        }

        if self.next_change.is_none_or(|t| now >= t) {
            self.staring = self.rng.gen_bool(0.3);
            if !self.staring {
                let at = self.random_glance(cx.world().status().position);
                cx.fire(skills::LOOK_AT, vec![json!([at.x, at.y, at.z])]);
            }
            let wait = Duration::from_millis(2000 + self.rng.gen_range(0..10_000));
            self.next_change = Some(now + wait);
        }
    }
}
