//! Shared types for the venue booking platform
//!
//! Types used by the venue server and its clients: orders and their status
//! table, rooms, stores, members, dishes, push envelopes, notification
//! records and numeric error codes.

pub mod error;
pub mod message;
pub mod models;
pub mod order;
pub mod util;

// Re-exports
pub use error::{ErrorCode, InvalidErrorCode};
pub use message::{PushEnvelope, PushEventType};
pub use serde::{Deserialize, Serialize};
