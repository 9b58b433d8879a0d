//! Client-side world: local prediction with rollback reconciliation, and
//! interpolation for remote entities.
//!
//! The local avatar runs the same character controller as the server, one
//! step per sent input, so in the common case the authoritative snapshot
//! lands exactly where prediction already put us and nothing visibly moves.
//! When the server disagrees beyond a small threshold, we roll back to its
//! state and replay every not-yet-acknowledged input on top.

use log::debug;
use shared::protocol::EntityState;
use shared::sim::{apply_intent, step_character, CharacterState, MoveIntent};
use shared::{Aabb, Vec2, FIXED_DT};
use std::collections::HashMap;
use std::time::Instant;

/// Positional error below this is absorbed rather than corrected, which
/// keeps sub-pixel float drift from causing visible snapping.
pub const DIVERGENCE_THRESHOLD: f32 = 0.1;

/// Cadence the server broadcasts deltas at, used to pace interpolation.
pub const SNAPSHOT_INTERVAL: f32 = 0.05;

#[derive(Debug, Clone, Copy)]
struct PendingInput {
    sequence: u32,
    intent: MoveIntent,
}

/// Last two authoritative snapshots of a remote entity.
#[derive(Debug, Clone, Copy)]
pub struct RemoteEntity {
    pub prev: EntityState,
    pub latest: EntityState,
    received_at: Instant,
}

pub struct ClientWorld {
    terrain: Vec<Aabb>,
    player_id: Option<u64>,
    predicted: CharacterState,
    pending: Vec<PendingInput>,
    remotes: HashMap<u64, RemoteEntity>,
}

impl ClientWorld {
    pub fn new(terrain: Vec<Aabb>) -> Self {
        ClientWorld {
            terrain,
            player_id: None,
            predicted: CharacterState::at(Vec2::ZERO),
            pending: Vec::new(),
            remotes: HashMap::new(),
        }
    }

    pub fn set_player(&mut self, id: u64, position: Vec2) {
        self.player_id = Some(id);
        self.predicted = CharacterState::at(position);
        self.pending.clear();
        self.remotes.remove(&id);
    }

    pub fn player_id(&self) -> Option<u64> {
        self.player_id
    }

    pub fn predicted(&self) -> &CharacterState {
        &self.predicted
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Advances the local avatar one step for a just-sent input and records
    /// it for replay.
    pub fn predict(&mut self, sequence: u32, intent: MoveIntent) {
        apply_intent(&mut self.predicted, &intent);
        step_character(&mut self.predicted, &self.terrain, FIXED_DT);
        self.pending.push(PendingInput { sequence, intent });
    }

    /// Folds an authoritative snapshot in: the local entity reconciles, the
    /// others feed their interpolation buffers. Entities absent from a delta
    /// are untouched. Returns true when a rollback was applied.
    pub fn apply_snapshot(&mut self, entities: &[EntityState]) -> bool {
        let mut rolled_back = false;
        for entity in entities {
            if Some(entity.id) == self.player_id {
                rolled_back |= self.reconcile(entity);
            } else {
                self.update_remote(*entity);
            }
        }
        rolled_back
    }

    /// Rollback reconciliation against the server's state for our entity.
    pub fn reconcile(&mut self, server: &EntityState) -> bool {
        self.pending
            .retain(|input| input.sequence > server.last_processed_input);

        let mut rebuilt = CharacterState {
            position: server.position,
            velocity: server.velocity,
            grounded: server.grounded,
        };
        for input in &self.pending {
            apply_intent(&mut rebuilt, &input.intent);
            step_character(&mut rebuilt, &self.terrain, FIXED_DT);
        }

        let divergence = rebuilt.position.distance(self.predicted.position);
        if divergence > DIVERGENCE_THRESHOLD {
            debug!(
                "rollback: diverged {:.3} at seq {}",
                divergence, server.last_processed_input
            );
            self.predicted = rebuilt;
            return true;
        }
        false
    }

    fn update_remote(&mut self, state: EntityState) {
        let entry = self
            .remotes
            .entry(state.id)
            .or_insert(RemoteEntity {
                prev: state,
                latest: state,
                received_at: Instant::now(),
            });
        entry.prev = entry.latest;
        entry.latest = state;
        entry.received_at = Instant::now();
    }

    pub fn remove_entity(&mut self, id: u64) {
        self.remotes.remove(&id);
    }

    pub fn remote_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.remotes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Display position of a remote entity, lerped between its last two
    /// snapshots by how far we are into the snapshot interval.
    pub fn remote_position(&self, id: u64) -> Option<Vec2> {
        let remote = self.remotes.get(&id)?;
        let alpha = (remote.received_at.elapsed().as_secs_f32() / SNAPSHOT_INTERVAL)
            .clamp(0.0, 1.0);
        Some(lerp(remote.prev.position, remote.latest.position, alpha))
    }

    /// As `remote_position`, with the blend factor supplied by the caller.
    pub fn remote_position_at(&self, id: u64, alpha: f32) -> Option<Vec2> {
        let remote = self.remotes.get(&id)?;
        Some(lerp(
            remote.prev.position,
            remote.latest.position,
            alpha.clamp(0.0, 1.0),
        ))
    }
}

fn lerp(a: Vec2, b: Vec2, alpha: f32) -> Vec2 {
    Vec2::new(a.x + (b.x - a.x) * alpha, a.y + (b.y - a.y) * alpha)
}
