//! # achat-core
//!
//! Core types for the achat message transport.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Sockets, buffers and the channel itself live in the `achat` crate.
//!
//! ## Modules
//!
//! - `error` - Result codes and the `AchatError` type
//! - `state` - Channel state machine, role and mode enums
//! - `notify` - Writable-again notification hook
//! - `env` - Environment variable utilities

pub mod error;
pub mod state;
pub mod notify;
pub mod env;

// Re-exports for convenience
pub use error::{AchatError, Result, ResultCode};
pub use state::{BlockingMode, ChannelState, Role, SslMode};
pub use notify::WritableNotify;
pub use env::{env_get_bool, env_get_opt, env_get_str};

/// Protocol and buffer constants.
///
/// The buffer values are tuning choices; the framing values are part of the
/// observable contract between peers.
pub mod constants {
    /// Initial allocation of a byte buffer.
    pub const BUFFER_DEFAULT_SIZE: usize = 4 * 1024;

    /// Largest single append / reserve a buffer accepts.
    pub const BUFFER_MAX_CHUNK: usize = 1024 * 1024;

    /// Growth granularity: allocations are rounded up to this.
    pub const BUFFER_ALLOC_SIZE: usize = 32 * 1024;

    /// Hard cap on a buffer's allocation.
    pub const BUFFER_MAX_LEN: usize = 10 * 1024 * 1024;

    /// Size of the big-endian length prefix on every frame.
    pub const PREFIX_LEN: usize = 4;

    /// Largest payload a single message may carry (80 KiB).
    pub const MAX_MSGSIZE: usize = 80 * 1024;

    /// Minimum read size when filling a non-blocking receive buffer.
    pub const READ_CHUNK: usize = 4 * 1024;

    /// `listen()` backlog for server channels.
    pub const LISTEN_BACKLOG: i32 = 5;

    /// Default TCP port when none is configured.
    pub const DEFAULT_PORT: u16 = 4000;

    const _: () = assert!(MAX_MSGSIZE + PREFIX_LEN <= BUFFER_MAX_CHUNK);
    const _: () = assert!(BUFFER_DEFAULT_SIZE <= BUFFER_MAX_LEN);
}
