//! HTTP and WebSocket handlers.

mod dispatcher;
mod http;
mod websocket;

pub use dispatcher::{ActionDispatcher, DispatchError};
pub use http::{get_room_messages, get_rooms, health_check};
pub use websocket::{
    CLOSE_GRACE_PERIOD, MAX_MESSAGE_SIZE, PING_PERIOD, WRITE_WAIT, websocket_handler,
};
