//! Value objects: identifiers and room addressing.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::ValueObjectError;

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Opaque 12-byte document identifier, rendered as 24 lower-case hex characters.
///
/// Layout of generated ids: 4-byte big-endian Unix seconds, 5 random bytes,
/// 3-byte counter. Ids sort by creation second only; within one second the
/// random bytes decide the order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a new id from the current time
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp() as u32;
        let random = uuid::Uuid::new_v4();
        let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&random.as_bytes()[..5]);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Parse a 24-character hex string
    pub fn parse_str(s: &str) -> Result<Self, ValueObjectError> {
        let raw = s.as_bytes();
        if raw.len() != 24 {
            return Err(ValueObjectError::InvalidObjectId(s.to_string()));
        }

        let mut bytes = [0u8; 12];
        for (i, pair) in raw.chunks_exact(2).enumerate() {
            let high = hex_value(pair[0]).ok_or_else(|| ValueObjectError::InvalidObjectId(s.to_string()))?;
            let low = hex_value(pair[1]).ok_or_else(|| ValueObjectError::InvalidObjectId(s.to_string()))?;
            bytes[i] = (high << 4) | low;
        }
        Ok(Self(bytes))
    }

    /// Lower-case hex representation
    pub fn to_hex(&self) -> String {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(24);
        for byte in self.0 {
            out.push(DIGITS[(byte >> 4) as usize] as char);
            out.push(DIGITS[(byte & 0x0f) as usize] as char);
        }
        out
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ValueObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_str(&value)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Kind of room a message is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Server channel; membership derives from server membership
    Channel,
    /// Two-party direct message room
    Dm,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Channel => "channel",
            RoomType::Dm => "dm",
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomType {
    type Err = ValueObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(RoomType::Channel),
            "dm" => Ok(RoomType::Dm),
            other => Err(ValueObjectError::UnknownRoomType(other.to_string())),
        }
    }
}

/// Composite room identifier, rendered as `"<type>:<room_id>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub room_type: RoomType,
    pub room_id: ObjectId,
}

impl RoomKey {
    pub fn new(room_type: RoomType, room_id: ObjectId) -> Self {
        Self { room_type, room_id }
    }

    /// Pub/sub channel carrying this room's envelopes: `"room:<type>:<room_id>"`
    pub fn pubsub_channel(&self) -> String {
        format!("room:{}", self)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_type, self.room_id)
    }
}

impl FromStr for RoomKey {
    type Err = ValueObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (room_type, room_id) = s
            .split_once(':')
            .ok_or_else(|| ValueObjectError::InvalidRoomKey(s.to_string()))?;
        Ok(Self::new(room_type.parse()?, room_id.parse()?))
    }
}
