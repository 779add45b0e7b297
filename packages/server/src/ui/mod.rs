//! WebSocket / HTTP server.

mod handler;
mod server;
mod signal;
pub mod state;

pub use handler::{
    ActionDispatcher, CLOSE_GRACE_PERIOD, DispatchError, MAX_MESSAGE_SIZE, PING_PERIOD, WRITE_WAIT,
};
pub use server::{SHUTDOWN_DEADLINE, Server, router};
pub use state::{AppState, Dependencies};
