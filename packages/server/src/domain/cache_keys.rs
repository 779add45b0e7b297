//! Cache key schema and TTLs.

use std::time::Duration;

use super::{ObjectId, RoomKey};

/// TTL of `user:<id>:status`
pub const USER_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// TTL of `user:<id>:active:throttle`
pub const ACTIVITY_THROTTLE_TTL: Duration = Duration::from_secs(3 * 60);

/// TTL of `dm_room_exists:<room_id>`
pub const DM_ROOM_EXISTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// TTL of `user:<id>:room:<key>:last_active`
pub const LAST_ACTIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// `"online"` / `"offline"`
pub fn user_status(user_id: &ObjectId) -> String {
    format!("user:{}:status", user_id)
}

pub fn activity_throttle(user_id: &ObjectId) -> String {
    format!("user:{}:active:throttle", user_id)
}

pub fn dm_room_exists(room_id: &ObjectId) -> String {
    format!("dm_room_exists:{}", room_id)
}

/// Set of user ids subscribed to the room
pub fn room_members(room: &RoomKey) -> String {
    format!("room:{}:members", room)
}

/// Set of room keys the user is subscribed to
pub fn user_rooms(user_id: &ObjectId) -> String {
    format!("user:{}:rooms", user_id)
}

/// Unix milliseconds of the user's last delivery or join in the room
pub fn user_room_last_active(user_id: &ObjectId, room: &RoomKey) -> String {
    format!("user:{}:room:{}:last_active", user_id, room)
}
