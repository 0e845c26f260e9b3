//! Error-kind labels for events and logging.
//!
//! These constants provide consistent error classification across crates.

/// The listening port could not be bound.
pub const ERROR_BIND: &str = "bind";
/// The backend dial failed or timed out.
pub const ERROR_BACKEND_UNREACHABLE: &str = "backend_unreachable";
/// A read on one leg of a pair failed.
pub const ERROR_LEG_READ: &str = "leg_read";
/// A write on one leg of a pair failed.
pub const ERROR_LEG_WRITE: &str = "leg_write";
