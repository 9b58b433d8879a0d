//! Server physics authority: the canonical simulation every client conforms
//! to.
//!
//! Bodies are owned exclusively by this module, keyed by entity id. Each tick
//! drains the entity's sorted input buffer (stale sequences skipped), applies
//! the intents, advances one fixed step through the shared character
//! controller, re-derives grounded state, and writes the result back into the
//! entity's components. A body must be released before its entity is
//! discarded; a leaked body keeps colliding.

use crate::input::{validate_player_movement, InputCommand, InputPipeline};
use crate::world::{EntityId, MotionState, World};
use log::{debug, info, warn};
use shared::sim::{apply_intent, step_character, CharacterState, MoveIntent};
use shared::{Aabb, Vec2};
use std::collections::HashMap;
use std::fmt;

/// Below this horizontal speed a grounded character counts as idle.
const IDLE_SPEED: f32 = 0.01;

#[derive(Debug)]
pub struct PhysicsInitError;

impl fmt::Display for PhysicsInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "physics authority requires at least one terrain collider"
        )
    }
}

impl std::error::Error for PhysicsInitError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhysicsEvent {
    GroundedChanged { entity: EntityId, grounded: bool },
    SkillTriggered { entity: EntityId },
    GatherStarted { entity: EntityId },
}

#[derive(Debug)]
struct Body {
    character: CharacterState,
    /// Horizontal intent persists between commands; releasing a direction is
    /// an explicit moveDirection 0.
    move_dir: f32,
    last_processed_input: u32,
}

pub struct PhysicsAuthority {
    terrain: Vec<Aabb>,
    bodies: HashMap<EntityId, Body>,
}

impl PhysicsAuthority {
    /// Fails when there is no collision geometry: running an authoritative
    /// world without anything to stand on is a startup error, not a warning.
    pub fn new(terrain: Vec<Aabb>) -> Result<Self, PhysicsInitError> {
        if terrain.is_empty() {
            return Err(PhysicsInitError);
        }
        info!(
            "physics authority initialized with {} terrain collider(s)",
            terrain.len()
        );
        Ok(PhysicsAuthority {
            terrain,
            bodies: HashMap::new(),
        })
    }

    pub fn terrain(&self) -> &[Aabb] {
        &self.terrain
    }

    pub fn create_body(&mut self, entity: EntityId, position: Vec2) {
        self.bodies.insert(
            entity,
            Body {
                character: CharacterState::at(position),
                move_dir: 0.0,
                last_processed_input: 0,
            },
        );
        debug!("created physics body for entity {}", entity);
    }

    /// Releases the body and character controller. Must run before the
    /// owning entity is despawned.
    pub fn remove_body(&mut self, entity: EntityId) -> bool {
        let removed = self.bodies.remove(&entity).is_some();
        if removed {
            debug!("released physics body for entity {}", entity);
        }
        removed
    }

    pub fn has_body(&self, entity: EntityId) -> bool {
        self.bodies.contains_key(&entity)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn last_processed(&self, entity: EntityId) -> u32 {
        self.bodies
            .get(&entity)
            .map(|b| b.last_processed_input)
            .unwrap_or(0)
    }

    pub fn character(&self, entity: EntityId) -> Option<&CharacterState> {
        self.bodies.get(&entity).map(|b| &b.character)
    }

    /// Advances the world one fixed step, consuming buffered input.
    pub fn step(
        &mut self,
        world: &mut World,
        pipeline: &mut InputPipeline,
        dt: f32,
    ) -> Vec<PhysicsEvent> {
        let mut events = Vec::new();

        let mut ids: Vec<EntityId> = self.bodies.keys().copied().collect();
        ids.sort_unstable();

        for entity in ids {
            let Some(body) = self.bodies.get_mut(&entity) else {
                continue;
            };

            // Grounded state before any intent runs: a jump clears it inside
            // apply_intent, and that transition must still be reported
            let was_grounded = body.character.grounded;

            let commands = pipeline.drain_sorted(entity, body.last_processed_input);
            let processed_any = !commands.is_empty();
            for command in &commands {
                Self::apply_command(entity, body, command, &mut events);
            }
            if !processed_any {
                // Keep the held direction without re-firing jumps
                apply_intent(
                    &mut body.character,
                    &MoveIntent {
                        move_dir: body.move_dir,
                        jump: false,
                    },
                );
            }

            let prev_position = body.character.position;
            step_character(&mut body.character, &self.terrain, dt);

            if !validate_player_movement(prev_position, body.character.position, dt) {
                warn!(
                    "entity {} displaced {:.2} in one step, clamping to previous position",
                    entity,
                    prev_position.distance(body.character.position)
                );
                body.character.position = prev_position;
            }

            if body.character.grounded != was_grounded {
                events.push(PhysicsEvent::GroundedChanged {
                    entity,
                    grounded: body.character.grounded,
                });
            }

            let moved = prev_position.distance(body.character.position) > f32::EPSILON;

            if let Some(transform) = world.transform_mut(entity) {
                transform.prev_position = transform.position;
                transform.position = body.character.position;
            }
            if let Some(motion) = world.motion_mut(entity) {
                motion.velocity = body.character.velocity;
                motion.grounded = body.character.grounded;
                motion.state = if !body.character.grounded {
                    MotionState::Airborne
                } else if body.character.velocity.x.abs() > IDLE_SPEED {
                    MotionState::Moving
                } else {
                    MotionState::Idle
                };
            }
            if let Some(sync) = world.net_sync_mut(entity) {
                sync.last_processed_input = body.last_processed_input;
                if moved || body.character.grounded != was_grounded || processed_any {
                    sync.dirty = true;
                }
            }
        }

        events
    }

    fn apply_command(
        entity: EntityId,
        body: &mut Body,
        command: &InputCommand,
        events: &mut Vec<PhysicsEvent>,
    ) {
        if let Some(direction) = command.payload.move_direction {
            body.move_dir = direction.clamp(-1.0, 1.0);
        }
        let jump = command.payload.jump.unwrap_or(false);
        apply_intent(
            &mut body.character,
            &MoveIntent {
                move_dir: body.move_dir,
                jump,
            },
        );
        if command.payload.skill.is_some() {
            events.push(PhysicsEvent::SkillTriggered { entity });
        }
        if command.payload.gather.unwrap_or(false) {
            events.push(PhysicsEvent::GatherStarted { entity });
        }
        body.last_processed_input = command.sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{
        Component, ComponentRegistry, Motion, NetSync, PhysicsProxy, Transform,
    };
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::InputPayload;
    use shared::{default_terrain, FIXED_DT, PLAYER_HALF_HEIGHT, SPAWN_POSITION};

    fn fixture() -> (World, InputPipeline, PhysicsAuthority, EntityId) {
        let mut world = World::new(ComponentRegistry::with_defaults());
        let entity = world
            .spawn(vec![
                Component::Transform(Transform {
                    position: SPAWN_POSITION,
                    prev_position: SPAWN_POSITION,
                    rotation: 0.0,
                }),
                Component::Motion(Motion::default()),
                Component::PhysicsProxy(PhysicsProxy::default()),
                Component::NetSync(NetSync::default()),
            ])
            .unwrap();
        let mut authority = PhysicsAuthority::new(default_terrain()).unwrap();
        authority.create_body(entity, SPAWN_POSITION);
        (world, InputPipeline::new(), authority, entity)
    }

    fn settle(
        world: &mut World,
        pipeline: &mut InputPipeline,
        authority: &mut PhysicsAuthority,
        ticks: usize,
    ) {
        for _ in 0..ticks {
            authority.step(world, pipeline, FIXED_DT);
        }
    }

    fn move_payload(direction: f32) -> InputPayload {
        InputPayload {
            move_direction: Some(direction),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_terrain_is_fatal() {
        assert!(PhysicsAuthority::new(Vec::new()).is_err());
    }

    #[test]
    fn test_spawned_body_falls_to_ground_and_emits_event() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();

        let mut grounded_events = Vec::new();
        for _ in 0..120 {
            grounded_events.extend(
                authority
                    .step(&mut world, &mut pipeline, FIXED_DT)
                    .into_iter()
                    .filter(|e| matches!(e, PhysicsEvent::GroundedChanged { .. })),
            );
        }

        assert_eq!(
            grounded_events,
            vec![PhysicsEvent::GroundedChanged {
                entity,
                grounded: true
            }]
        );
        let motion = world.motion(entity).unwrap();
        assert!(motion.grounded);
        assert_eq!(motion.state, MotionState::Idle);
        assert_approx_eq!(
            world.transform(entity).unwrap().position.y,
            PLAYER_HALF_HEIGHT,
            0.15
        );
    }

    #[test]
    fn test_input_moves_entity_and_records_sequence() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();
        settle(&mut world, &mut pipeline, &mut authority, 120);

        pipeline.accept(entity, 1, move_payload(1.0), 0).unwrap();
        authority.step(&mut world, &mut pipeline, FIXED_DT);

        let transform = world.transform(entity).unwrap();
        assert!(transform.position.x > 0.0);
        assert!(transform.prev_position.x < transform.position.x);
        assert_eq!(authority.last_processed(entity), 1);
        let sync = world.net_sync(entity).unwrap();
        assert!(sync.dirty);
        assert_eq!(sync.last_processed_input, 1);
        assert_eq!(world.motion(entity).unwrap().state, MotionState::Moving);
    }

    #[test]
    fn test_stale_replay_does_not_change_state() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();
        settle(&mut world, &mut pipeline, &mut authority, 120);

        pipeline.accept(entity, 1, move_payload(1.0), 0).unwrap();
        pipeline.accept(entity, 2, move_payload(0.0), 0).unwrap();
        authority.step(&mut world, &mut pipeline, FIXED_DT);
        let settled = *world.transform(entity).unwrap();

        // Replaying sequence 1 after 2 was processed must be a no-op
        pipeline.accept(entity, 1, move_payload(1.0), 0).unwrap();
        authority.step(&mut world, &mut pipeline, FIXED_DT);

        let replayed = world.transform(entity).unwrap();
        assert_approx_eq!(replayed.position.x, settled.position.x, 1e-5);
        assert_eq!(authority.last_processed(entity), 2);
    }

    #[test]
    fn test_out_of_order_arrival_matches_in_order() {
        let run = |sequences: &[u32]| {
            let (mut world, mut pipeline, mut authority, entity) = fixture();
            settle(&mut world, &mut pipeline, &mut authority, 120);
            for &sequence in sequences {
                // Direction alternates by sequence so ordering matters
                let direction = if sequence % 2 == 0 { -1.0 } else { 1.0 };
                pipeline
                    .accept(entity, sequence, move_payload(direction), 0)
                    .unwrap();
            }
            authority.step(&mut world, &mut pipeline, FIXED_DT);
            settle(&mut world, &mut pipeline, &mut authority, 10);
            world.transform(entity).unwrap().position
        };

        let shuffled = run(&[3, 1, 2]);
        let ordered = run(&[1, 2, 3]);
        assert_approx_eq!(shuffled.x, ordered.x, 1e-5);
        assert_approx_eq!(shuffled.y, ordered.y, 1e-5);
    }

    #[test]
    fn test_jump_transitions_to_airborne() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();
        settle(&mut world, &mut pipeline, &mut authority, 120);

        pipeline
            .accept(
                entity,
                1,
                InputPayload {
                    jump: Some(true),
                    ..Default::default()
                },
                0,
            )
            .unwrap();
        let events = authority.step(&mut world, &mut pipeline, FIXED_DT);

        assert!(events.contains(&PhysicsEvent::GroundedChanged {
            entity,
            grounded: false
        }));
        assert_eq!(world.motion(entity).unwrap().state, MotionState::Airborne);
    }

    #[test]
    fn test_skill_and_gather_emit_events() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();
        settle(&mut world, &mut pipeline, &mut authority, 120);

        pipeline
            .accept(
                entity,
                1,
                InputPayload {
                    skill: Some(shared::protocol::Skill::Strike),
                    gather: Some(true),
                    ..Default::default()
                },
                0,
            )
            .unwrap();
        let events = authority.step(&mut world, &mut pipeline, FIXED_DT);

        assert!(events.contains(&PhysicsEvent::SkillTriggered { entity }));
        assert!(events.contains(&PhysicsEvent::GatherStarted { entity }));
    }

    #[test]
    fn test_remove_body_releases_resources() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();
        assert!(authority.has_body(entity));
        assert!(authority.remove_body(entity));
        assert!(!authority.has_body(entity));
        assert!(!authority.remove_body(entity));

        // Stepping after removal must not touch the entity
        let before = *world.transform(entity).unwrap();
        authority.step(&mut world, &mut pipeline, FIXED_DT);
        assert_eq!(*world.transform(entity).unwrap(), before);
    }

    #[test]
    fn test_implausible_step_displacement_is_clamped() {
        let (mut world, mut pipeline, mut authority, _entity) = fixture();
        // High above all geometry, one giant step would free-fall much
        // further than run speed plus slack allows
        let perch = Vec2::new(0.0, 100.0);
        authority.create_body(99, perch);

        authority.step(&mut world, &mut pipeline, 1.0);

        let character = authority.character(99).unwrap();
        assert_eq!(character.position, perch);
    }

    #[test]
    fn test_idle_entity_is_not_marked_dirty() {
        let (mut world, mut pipeline, mut authority, entity) = fixture();
        settle(&mut world, &mut pipeline, &mut authority, 240);
        world.net_sync_mut(entity).unwrap().dirty = false;

        authority.step(&mut world, &mut pipeline, FIXED_DT);
        assert!(!world.net_sync(entity).unwrap().dirty);
    }
}
