//! Input pipeline: validation, per-entity sequence buffering, and movement
//! plausibility checks.
//!
//! Invalid or stale commands are dropped with no error back to the sender so
//! cheat-probing clients learn nothing from the server's reaction. Buffers
//! are sorted by sequence before each drain, which makes delivery order
//! irrelevant: [3,1,2] and [1,2,3] produce the same simulated state.

use crate::world::EntityId;
use log::debug;
use shared::protocol::InputPayload;
use shared::{Vec2, MAX_SPEED};
use std::collections::HashMap;

/// Slack added to the plausibility bound to absorb network jitter.
pub const MOVE_SLACK: f32 = 0.5;

/// Commands buffered per entity beyond this are dropped oldest-first.
pub const BUFFER_CAP: usize = 256;

/// A validated, sequence-stamped input command awaiting the physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    pub sequence: u32,
    pub payload: InputPayload,
    /// Arrival timestamp in milliseconds since the epoch.
    pub arrived_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NonFiniteMove,
    MoveOutOfRange,
}

/// Schema/range validation for a raw input payload. Booleans and the skill
/// enum are already enforced by decoding; what remains is the movement axis.
pub fn validate_payload(payload: &InputPayload) -> Result<(), DropReason> {
    if let Some(direction) = payload.move_direction {
        if !direction.is_finite() {
            return Err(DropReason::NonFiniteMove);
        }
        if !(-1.0..=1.0).contains(&direction) {
            return Err(DropReason::MoveOutOfRange);
        }
    }
    Ok(())
}

/// Defense in depth against speed hacks: a claimed position delta may not
/// exceed what max run speed plus jitter slack allows in `dt`.
pub fn validate_player_movement(prev: Vec2, next: Vec2, dt: f32) -> bool {
    prev.distance(next) <= MAX_SPEED * dt + MOVE_SLACK
}

#[derive(Default)]
pub struct InputPipeline {
    buffers: HashMap<EntityId, Vec<InputCommand>>,
}

impl InputPipeline {
    pub fn new() -> Self {
        InputPipeline::default()
    }

    /// Validates and buffers one command. Invalid payloads are dropped
    /// silently; staleness is filtered at drain time against the entity's
    /// last processed sequence.
    pub fn accept(
        &mut self,
        entity: EntityId,
        sequence: u32,
        payload: InputPayload,
        arrived_at: u64,
    ) -> Result<(), DropReason> {
        validate_payload(&payload)?;
        let buffer = self.buffers.entry(entity).or_default();
        buffer.push(InputCommand {
            sequence,
            payload,
            arrived_at,
        });
        if buffer.len() > BUFFER_CAP {
            let overflow = buffer.len() - BUFFER_CAP;
            buffer.drain(..overflow);
            debug!(
                "input buffer for entity {} over cap, dropped {} oldest",
                entity, overflow
            );
        }
        Ok(())
    }

    /// Takes the entity's buffered commands in ascending sequence order,
    /// discarding anything at or below `last_processed`. The buffer is
    /// cleared.
    pub fn drain_sorted(&mut self, entity: EntityId, last_processed: u32) -> Vec<InputCommand> {
        let Some(buffer) = self.buffers.get_mut(&entity) else {
            return Vec::new();
        };
        let mut commands = std::mem::take(buffer);
        commands.sort_by_key(|cmd| cmd.sequence);
        let before = commands.len();
        commands.retain(|cmd| cmd.sequence > last_processed);
        let stale = before - commands.len();
        if stale > 0 {
            debug!(
                "dropped {} stale command(s) for entity {} (<= seq {})",
                stale, entity, last_processed
            );
        }
        commands
    }

    pub fn pending(&self, entity: EntityId) -> usize {
        self.buffers.get(&entity).map(Vec::len).unwrap_or(0)
    }

    pub fn remove_entity(&mut self, entity: EntityId) {
        self.buffers.remove(&entity);
    }

    /// Drops buffers for entities that no longer exist.
    pub fn retain_entities(&mut self, alive: impl Fn(EntityId) -> bool) {
        self.buffers.retain(|entity, _| alive(*entity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::Skill;
    use shared::FIXED_DT;

    fn payload(direction: f32) -> InputPayload {
        InputPayload {
            move_direction: Some(direction),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_payload_accepted() {
        let mut pipeline = InputPipeline::new();
        assert!(pipeline.accept(1, 1, payload(1.0), 0).is_ok());
        assert!(pipeline
            .accept(
                1,
                2,
                InputPayload {
                    jump: Some(true),
                    skill: Some(Skill::Dash),
                    gather: Some(true),
                    ..Default::default()
                },
                0
            )
            .is_ok());
        assert_eq!(pipeline.pending(1), 2);
    }

    #[test]
    fn test_out_of_range_move_dropped() {
        let mut pipeline = InputPipeline::new();
        assert_eq!(
            pipeline.accept(1, 1, payload(1.5), 0),
            Err(DropReason::MoveOutOfRange)
        );
        assert_eq!(
            pipeline.accept(1, 2, payload(f32::NAN), 0),
            Err(DropReason::NonFiniteMove)
        );
        assert_eq!(
            pipeline.accept(1, 3, payload(f32::INFINITY), 0),
            Err(DropReason::NonFiniteMove)
        );
        assert_eq!(pipeline.pending(1), 0);
    }

    #[test]
    fn test_drain_sorts_by_sequence() {
        let mut pipeline = InputPipeline::new();
        for sequence in [3u32, 1, 2] {
            pipeline.accept(1, sequence, payload(0.0), 0).unwrap();
        }

        let drained = pipeline.drain_sorted(1, 0);
        let sequences: Vec<u32> = drained.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(pipeline.pending(1), 0);
    }

    #[test]
    fn test_drain_discards_stale_sequences() {
        let mut pipeline = InputPipeline::new();
        for sequence in [5u32, 2, 7, 4] {
            pipeline.accept(1, sequence, payload(0.0), 0).unwrap();
        }

        let drained = pipeline.drain_sorted(1, 4);
        let sequences: Vec<u32> = drained.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![5, 7]);
    }

    #[test]
    fn test_replayed_stale_command_never_resurfaces() {
        let mut pipeline = InputPipeline::new();
        pipeline.accept(1, 2, payload(1.0), 0).unwrap();
        let drained = pipeline.drain_sorted(1, 0);
        assert_eq!(drained.len(), 1);

        // Replay of sequence 1 after 2 was processed
        pipeline.accept(1, 1, payload(-1.0), 0).unwrap();
        assert!(pipeline.drain_sorted(1, 2).is_empty());
    }

    #[test]
    fn test_buffer_cap_drops_oldest() {
        let mut pipeline = InputPipeline::new();
        for sequence in 0..(BUFFER_CAP as u32 + 10) {
            pipeline.accept(1, sequence, payload(0.0), 0).unwrap();
        }
        assert_eq!(pipeline.pending(1), BUFFER_CAP);
        let drained = pipeline.drain_sorted(1, 0);
        assert_eq!(drained.first().unwrap().sequence, 10);
    }

    #[test]
    fn test_remove_and_retain() {
        let mut pipeline = InputPipeline::new();
        pipeline.accept(1, 1, payload(0.0), 0).unwrap();
        pipeline.accept(2, 1, payload(0.0), 0).unwrap();

        pipeline.remove_entity(1);
        assert_eq!(pipeline.pending(1), 0);
        assert_eq!(pipeline.pending(2), 1);

        pipeline.retain_entities(|_| false);
        assert_eq!(pipeline.pending(2), 0);
    }

    #[test]
    fn test_movement_plausibility() {
        let prev = Vec2::ZERO;
        let plausible = Vec2::new(MAX_SPEED * FIXED_DT, 0.0);
        let teleport = Vec2::new(MAX_SPEED * FIXED_DT + MOVE_SLACK + 0.1, 0.0);

        assert!(validate_player_movement(prev, plausible, FIXED_DT));
        assert!(!validate_player_movement(prev, teleport, FIXED_DT));
    }
}
