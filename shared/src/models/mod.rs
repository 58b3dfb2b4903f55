//! Data models
//!
//! Catalog entities shared between the venue server and its clients.
//! All IDs are `i64`; timestamps are Unix milliseconds.

pub mod dish;
pub mod member;
pub mod room;
pub mod store;

// Re-exports
pub use dish::*;
pub use member::*;
pub use room::*;
pub use store::*;
