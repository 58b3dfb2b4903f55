//! Push transport framing
//!
//! ```text
//! ┌──────────┬──────────────┬─────────────────┐
//! │ type: u8 │ len: u32 LE  │ payload (JSON)  │
//! └──────────┴──────────────┴─────────────────┘
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Upper bound on one frame payload
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Client handshake / server ack
    Handshake = 0,
    /// Server → client push envelope
    Push = 1,
    /// Keepalive in either direction
    Ping = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Handshake),
            1 => Ok(FrameType::Push),
            2 => Ok(FrameType::Ping),
            _ => Err(()),
        }
    }
}

/// One frame on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    pub fn json<T: Serialize>(frame_type: FrameType, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(frame_type, serde_json::to_vec(data)?))
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Header + payload bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(5 + self.payload.len());
        data.push(self.frame_type as u8);
        data.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&self.payload);
        data
    }
}
