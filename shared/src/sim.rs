//! Deterministic character simulation shared by the server authority and
//! client prediction. Both sides must run the exact same step so that a
//! replay of unacknowledged inputs converges on the server's result.

use crate::{
    Aabb, Vec2, GRAVITY, GROUND_PROBE, JUMP_SPEED, MAX_SPEED, PLAYER_HALF_HEIGHT,
    PLAYER_HALF_WIDTH,
};

/// Per-tick movement intent distilled from validated input commands.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    /// Horizontal movement in [-1, 1].
    pub move_dir: f32,
    pub jump: bool,
}

/// The portion of an entity's state the character controller owns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub grounded: bool,
}

impl CharacterState {
    pub fn at(position: Vec2) -> Self {
        CharacterState {
            position,
            velocity: Vec2::ZERO,
            grounded: false,
        }
    }

    fn bounds(position: Vec2) -> Aabb {
        Aabb::from_center_half(position, PLAYER_HALF_WIDTH, PLAYER_HALF_HEIGHT)
    }
}

/// Applies a movement intent to the character's velocity. Jumps only fire
/// from the ground; the clamp mirrors the wire-level validation so a value
/// that slipped through cannot exceed run speed.
pub fn apply_intent(state: &mut CharacterState, intent: &MoveIntent) {
    state.velocity.x = intent.move_dir.clamp(-1.0, 1.0) * MAX_SPEED;
    if intent.jump && state.grounded {
        state.velocity.y = JUMP_SPEED;
        state.grounded = false;
    }
}

/// Advances the character by one fixed step: gravity, collision-corrected
/// displacement, then a ground probe. The corrected displacement is what
/// actually moves the character; the raw velocity vector never does.
pub fn step_character(state: &mut CharacterState, colliders: &[Aabb], dt: f32) {
    if !state.grounded {
        state.velocity.y += GRAVITY * dt;
    }

    let desired = state.velocity.scale(dt);
    let corrected = collide_displacement(state, desired, colliders);
    state.position = state.position.add(corrected);

    state.grounded = probe_ground(state.position, colliders);
    if state.grounded && state.velocity.y < 0.0 {
        state.velocity.y = 0.0;
    }
}

/// Resolves the desired displacement against the collider set one axis at a
/// time, clamping to the contact surface and zeroing the blocked velocity
/// component. Returns the corrected displacement.
fn collide_displacement(state: &mut CharacterState, desired: Vec2, colliders: &[Aabb]) -> Vec2 {
    let start = state.position;
    let mut pos = start;

    // Horizontal axis
    pos.x += desired.x;
    let moved = CharacterState::bounds(pos);
    for collider in colliders {
        if moved.overlaps(collider) {
            if desired.x > 0.0 {
                pos.x = collider.min.x - PLAYER_HALF_WIDTH;
            } else if desired.x < 0.0 {
                pos.x = collider.max.x + PLAYER_HALF_WIDTH;
            }
            state.velocity.x = 0.0;
        }
    }

    // Vertical axis
    pos.y += desired.y;
    let moved = CharacterState::bounds(pos);
    for collider in colliders {
        if moved.overlaps(collider) {
            if desired.y > 0.0 {
                pos.y = collider.min.y - PLAYER_HALF_HEIGHT;
            } else if desired.y < 0.0 {
                pos.y = collider.max.y + PLAYER_HALF_HEIGHT;
            }
            state.velocity.y = 0.0;
        }
    }

    Vec2::new(pos.x - start.x, pos.y - start.y)
}

/// Short downward probe against the collider set. A thin box under the feet
/// standing in for a ray-cast; tolerance is `GROUND_PROBE`.
pub fn probe_ground(position: Vec2, colliders: &[Aabb]) -> bool {
    let feet = Aabb {
        min: Vec2::new(
            position.x - PLAYER_HALF_WIDTH,
            position.y - PLAYER_HALF_HEIGHT - GROUND_PROBE,
        ),
        max: Vec2::new(
            position.x + PLAYER_HALF_WIDTH,
            position.y - PLAYER_HALF_HEIGHT + 0.01,
        ),
    };
    colliders.iter().any(|c| feet.overlaps(c))
}
