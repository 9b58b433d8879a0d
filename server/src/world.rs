//! Entity store: opaque entity ids owning bags of typed components.
//!
//! Components are plain data; all mutation happens inside systems. The
//! component registry is injected into the world at construction so several
//! isolated worlds can coexist in one process (no process-wide registries).

use shared::{Vec2, PLAYER_HALF_HEIGHT, PLAYER_HALF_WIDTH};
use std::collections::HashMap;
use std::fmt;

pub type EntityId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Transform,
    Motion,
    Avatar,
    PhysicsProxy,
    NetSync,
}

/// Spatial component. Previous position is retained for interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec2,
    pub prev_position: Vec2,
    pub rotation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Idle,
    Moving,
    Airborne,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Motion {
    pub velocity: Vec2,
    pub grounded: bool,
    pub state: MotionState,
}

/// Descriptor consumed by rendering collaborators; carries no behavior here.
#[derive(Debug, Clone, PartialEq)]
pub struct Avatar {
    pub name: String,
    pub character_class: String,
}

impl Default for Avatar {
    fn default() -> Self {
        Avatar {
            name: "adventurer".to_string(),
            character_class: "wanderer".to_string(),
        }
    }
}

/// Marks an entity as physics-controlled. The authority owns the actual body;
/// this component only records the collision extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsProxy {
    pub half_width: f32,
    pub half_height: f32,
}

impl Default for PhysicsProxy {
    fn default() -> Self {
        PhysicsProxy {
            half_width: PLAYER_HALF_WIDTH,
            half_height: PLAYER_HALF_HEIGHT,
        }
    }
}

/// Replication bookkeeping: dirty flag plus the acknowledged input sequence.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetSync {
    pub dirty: bool,
    pub last_processed_input: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Transform(Transform),
    Motion(Motion),
    Avatar(Avatar),
    PhysicsProxy(PhysicsProxy),
    NetSync(NetSync),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Transform(_) => ComponentKind::Transform,
            Component::Motion(_) => ComponentKind::Motion,
            Component::Avatar(_) => ComponentKind::Avatar,
            Component::PhysicsProxy(_) => ComponentKind::PhysicsProxy,
            Component::NetSync(_) => ComponentKind::NetSync,
        }
    }
}

#[derive(Debug)]
pub enum WorldError {
    EmptyEntity,
    MissingTransform,
    DuplicateComponent(ComponentKind),
    UnregisteredComponent(ComponentKind),
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::EmptyEntity => write!(f, "an entity must carry at least one component"),
            WorldError::MissingTransform => write!(
                f,
                "renderable or physics-controlled entities require a transform"
            ),
            WorldError::DuplicateComponent(kind) => {
                write!(f, "duplicate component {:?}", kind)
            }
            WorldError::UnregisteredComponent(kind) => {
                write!(f, "no factory registered for component {:?}", kind)
            }
        }
    }
}

impl std::error::Error for WorldError {}

type Factory = fn() -> Component;

/// Explicit registry of component default-factories, passed into the world
/// instead of living in a global map.
#[derive(Default)]
pub struct ComponentRegistry {
    factories: HashMap<ComponentKind, Factory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            factories: HashMap::new(),
        }
    }

    /// Registry pre-loaded with every built-in component kind.
    pub fn with_defaults() -> Self {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentKind::Transform, || {
            Component::Transform(Transform::default())
        });
        registry.register(ComponentKind::Motion, || {
            Component::Motion(Motion::default())
        });
        registry.register(ComponentKind::Avatar, || {
            Component::Avatar(Avatar::default())
        });
        registry.register(ComponentKind::PhysicsProxy, || {
            Component::PhysicsProxy(PhysicsProxy::default())
        });
        registry.register(ComponentKind::NetSync, || {
            Component::NetSync(NetSync::default())
        });
        registry
    }

    pub fn register(&mut self, kind: ComponentKind, factory: Factory) {
        self.factories.insert(kind, factory);
    }

    /// Builds a component from its registered default factory, then applies
    /// the caller's overrides on top.
    pub fn build(
        &self,
        kind: ComponentKind,
        overrides: impl FnOnce(&mut Component),
    ) -> Result<Component, WorldError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(WorldError::UnregisteredComponent(kind))?;
        let mut component = factory();
        overrides(&mut component);
        Ok(component)
    }
}

pub struct World {
    registry: ComponentRegistry,
    next_id: EntityId,
    entities: HashMap<EntityId, HashMap<ComponentKind, Component>>,
}

impl World {
    pub fn new(registry: ComponentRegistry) -> Self {
        World {
            registry,
            next_id: 1,
            entities: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Creates an entity from the given components, enforcing the creation
    /// invariants: at least one component, no duplicates, and a transform
    /// whenever the entity is renderable or physics-controlled.
    pub fn spawn(&mut self, components: Vec<Component>) -> Result<EntityId, WorldError> {
        if components.is_empty() {
            return Err(WorldError::EmptyEntity);
        }

        let mut bag: HashMap<ComponentKind, Component> = HashMap::new();
        for component in components {
            let kind = component.kind();
            if bag.insert(kind, component).is_some() {
                return Err(WorldError::DuplicateComponent(kind));
            }
        }

        let needs_transform = bag.contains_key(&ComponentKind::Avatar)
            || bag.contains_key(&ComponentKind::PhysicsProxy);
        if needs_transform && !bag.contains_key(&ComponentKind::Transform) {
            return Err(WorldError::MissingTransform);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entities.insert(id, bag);
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id).is_some()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities carrying every component kind in `kinds`, in id order so
    /// iteration stays deterministic across ticks.
    pub fn entities_with(&self, kinds: &[ComponentKind]) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, bag)| kinds.iter().all(|kind| bag.contains_key(kind)))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn component(&self, id: EntityId, kind: ComponentKind) -> Option<&Component> {
        self.entities.get(&id)?.get(&kind)
    }

    pub fn transform(&self, id: EntityId) -> Option<&Transform> {
        match self.component(id, ComponentKind::Transform)? {
            Component::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn transform_mut(&mut self, id: EntityId) -> Option<&mut Transform> {
        match self
            .entities
            .get_mut(&id)?
            .get_mut(&ComponentKind::Transform)?
        {
            Component::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn motion(&self, id: EntityId) -> Option<&Motion> {
        match self.component(id, ComponentKind::Motion)? {
            Component::Motion(m) => Some(m),
            _ => None,
        }
    }

    pub fn motion_mut(&mut self, id: EntityId) -> Option<&mut Motion> {
        match self.entities.get_mut(&id)?.get_mut(&ComponentKind::Motion)? {
            Component::Motion(m) => Some(m),
            _ => None,
        }
    }

    pub fn avatar(&self, id: EntityId) -> Option<&Avatar> {
        match self.component(id, ComponentKind::Avatar)? {
            Component::Avatar(a) => Some(a),
            _ => None,
        }
    }

    pub fn net_sync(&self, id: EntityId) -> Option<&NetSync> {
        match self.component(id, ComponentKind::NetSync)? {
            Component::NetSync(n) => Some(n),
            _ => None,
        }
    }

    pub fn net_sync_mut(&mut self, id: EntityId) -> Option<&mut NetSync> {
        match self.entities.get_mut(&id)?.get_mut(&ComponentKind::NetSync)? {
            Component::NetSync(n) => Some(n),
            _ => None,
        }
    }
}
