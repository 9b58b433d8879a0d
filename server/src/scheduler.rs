//! Priority-ordered system scheduler with dependency-resolved initialization.
//!
//! Update order is the numeric priority (ties broken by registration order);
//! initialization order is a depth-first walk of declared dependencies. A
//! dependency cycle is a hard initialization error; a missing dependency is
//! only a warning. A system failing its per-tick update is logged and must
//! not prevent the remaining systems or subsequent ticks from running.

use crate::world::World;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::fmt;

pub type SystemResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub trait System: Send {
    fn name(&self) -> &'static str;

    /// Names of systems that must initialize before this one.
    fn dependencies(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        true
    }

    fn init(&mut self, _world: &mut World) -> SystemResult {
        Ok(())
    }

    fn update(&mut self, world: &mut World, dt: f32) -> SystemResult;

    /// Release held external resources. Called in reverse priority order.
    fn destroy(&mut self, _world: &mut World) {}
}

#[derive(Debug)]
pub enum SchedulerError {
    DependencyCycle(String),
    InitFailed {
        system: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::DependencyCycle(name) => {
                write!(f, "dependency cycle through system '{}'", name)
            }
            SchedulerError::InitFailed { system, source } => {
                write!(f, "system '{}' failed to initialize: {}", system, source)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

struct Entry {
    system: Box<dyn System>,
    priority: i32,
    registered: usize,
}

#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, system: Box<dyn System>, priority: i32) {
        let registered = self.entries.len();
        debug!(
            "registered system '{}' at priority {}",
            system.name(),
            priority
        );
        self.entries.push(Entry {
            system,
            priority,
            registered,
        });
        self.entries
            .sort_by_key(|entry| (entry.priority, entry.registered));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Initializes every system, dependencies before dependents.
    pub fn init_all(&mut self, world: &mut World) -> Result<(), SchedulerError> {
        let order = self.resolve_init_order()?;
        for index in order {
            let entry = &mut self.entries[index];
            entry
                .system
                .init(world)
                .map_err(|source| SchedulerError::InitFailed {
                    system: entry.system.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn resolve_init_order(&self) -> Result<Vec<usize>, SchedulerError> {
        let index_by_name: HashMap<&str, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.system.name(), index))
            .collect();

        let deps: Vec<Vec<usize>> = self
            .entries
            .iter()
            .map(|entry| {
                entry
                    .system
                    .dependencies()
                    .iter()
                    .filter_map(|name| {
                        let found = index_by_name.get(name).copied();
                        if found.is_none() {
                            warn!(
                                "system '{}' depends on unknown system '{}'",
                                entry.system.name(),
                                name
                            );
                        }
                        found
                    })
                    .collect()
            })
            .collect();

        let mut states = vec![VisitState::Unvisited; self.entries.len()];
        let mut order = Vec::with_capacity(self.entries.len());
        for index in 0..self.entries.len() {
            self.visit(index, &deps, &mut states, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        index: usize,
        deps: &[Vec<usize>],
        states: &mut [VisitState],
        order: &mut Vec<usize>,
    ) -> Result<(), SchedulerError> {
        match states[index] {
            VisitState::Done => return Ok(()),
            VisitState::InProgress => {
                return Err(SchedulerError::DependencyCycle(
                    self.entries[index].system.name().to_string(),
                ))
            }
            VisitState::Unvisited => {}
        }
        states[index] = VisitState::InProgress;
        for &dep in &deps[index] {
            self.visit(dep, deps, states, order)?;
        }
        states[index] = VisitState::Done;
        order.push(index);
        Ok(())
    }

    /// Runs one tick: every enabled system in priority order. An error from
    /// one system is logged and the rest still run.
    pub fn update_all(&mut self, world: &mut World, dt: f32) {
        for entry in &mut self.entries {
            if !entry.system.enabled() {
                continue;
            }
            if let Err(e) = entry.system.update(world, dt) {
                error!("system '{}' failed this tick: {}", entry.system.name(), e);
            }
        }
    }

    /// Tears systems down in reverse priority order.
    pub fn destroy_all(&mut self, world: &mut World) {
        for entry in self.entries.iter_mut().rev() {
            entry.system.destroy(world);
        }
    }
}
