//! Realtime messaging core library.
//!
//! This library provides the WebSocket connection registry, room fan-out over
//! pub/sub, message persistence pipeline and presence tracking of the Tsudoi
//! chat server.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
