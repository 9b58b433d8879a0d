//! Authoritative multiplayer server for a 2D side-scrolling action game.
//!
//! The server owns the truth: entities live in [`world::World`], systems run
//! through [`scheduler::Scheduler`] at a fixed tick rate, client inputs flow
//! through [`input::InputPipeline`] into [`physics::PhysicsAuthority`], and
//! [`session::SessionManager`] keeps clients resumable across reconnects.
//! [`game::GameServer`] wires it all to the WebSocket layer in [`network`].

pub mod game;
pub mod input;
pub mod network;
pub mod physics;
pub mod scheduler;
pub mod session;
pub mod utils;
pub mod world;
