//! Unified error codes for the venue platform
//!
//! Numeric codes a transport layer hands to clients. The server maps its
//! typed errors onto these; clients localize by code.
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 5xxx: Payment errors
//! - 6xxx: Catalog errors
//! - 7xxx: Room errors
//! - 8xxx: Connection errors
//! - 9xxx: System errors

mod codes;

pub use codes::{ErrorCode, InvalidErrorCode};
