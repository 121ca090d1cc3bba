//! Built-in reactive modes.
//!
//! Each mode owns its own timers and memory in a private struct and reacts
//! through the [`ModeContext`](hearth_core::ModeContext) handed to it by the
//! arbitrator. [`default_modes`] returns them in priority order, highest first.

#![forbid(unsafe_code)]

pub mod chores;
pub mod idle;
pub mod survival;

use hearth_core::Mode;

pub use chores::{Hunting, ItemCollecting, TorchPlacing};
pub use idle::{ElbowRoom, IdleStaring};
pub use survival::{Cowardice, SelfDefense, SelfPreservation, Unstuck};

/// Action name that the opportunistic modes are allowed to break into.
pub const FOLLOW_PLAYER: &str = "followPlayer";

/// Names of the built-in modes in priority order.
pub const MODE_NAMES: &[&str] = &[
    survival::SELF_PRESERVATION,
    survival::UNSTUCK,
    survival::COWARDICE,
    survival::SELF_DEFENSE,
    chores::HUNTING,
    chores::ITEM_COLLECTING,
    chores::TORCH_PLACING,
    idle::ELBOW_ROOM,
    idle::IDLE_STARING,
];

/// Every built-in mode, highest priority first.
pub fn default_modes() -> Vec<Box<dyn Mode>> {
    vec![
        Box::new(SelfPreservation::default()),
        Box::new(Unstuck::default()),
        Box::new(Cowardice),
        Box::new(SelfDefense),
        Box::new(Hunting),
        Box::new(ItemCollecting::default()),
        Box::new(TorchPlacing::default()),
        Box::new(ElbowRoom),
        Box::new(IdleStaring::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_matches_names_in_order() {
        let names: Vec<_> = default_modes().iter().map(|m| m.name()).collect();
        assert_eq!(names, MODE_NAMES);
    }
}
