//! Game client: predicted local simulation over a WebSocket connection to
//! the authoritative server.

pub mod game;
pub mod input;
pub mod network;
