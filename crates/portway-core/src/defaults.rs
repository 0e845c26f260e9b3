//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

/// Default per-direction copy buffer size (32 KiB).
pub const DEFAULT_COPY_BUFFER_BYTES: usize = 32768;

/// Default backend connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default idle timeout in seconds (0 = disabled; relay runs until either
/// side closes or errors).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;

/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;

/// Default TCP_NODELAY on both legs (disable Nagle's algorithm).
pub const DEFAULT_TCP_NODELAY: bool = true;

/// Default SO_KEEPALIVE on accepted front sockets.
pub const DEFAULT_TCP_KEEPALIVE: bool = true;

/// How long `stop()` waits for forcibly-cancelled pairs to finish
/// reporting closure, in seconds.
pub const DEFAULT_SHUTDOWN_WAIT_SECS: u64 = 5;
