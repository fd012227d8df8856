//! # achat: message channels over stream sockets
//!
//! Turns a UNIX-domain or TCP byte stream into discrete, length-prefixed
//! messages, with first-class support for non-blocking sockets and partial
//! reads/writes.
//!
//! ```ignore
//! use achat::{ChannelAddr, ChannelConfig, Role};
//!
//! let mut server = ChannelConfig::new()
//!     .role(Role::Server)
//!     .address(ChannelAddr::unix("/run/achat/ctl.sock"))
//!     .build()?;
//! server.prepare()?;
//!
//! loop {
//!     let mut conn = server.accept_duplicate()?;
//!     let mut buf = vec![0u8; achat::constants::MAX_MSGSIZE];
//!     let n = conn.receive_message(&mut buf)?;
//!     conn.send_message(&buf[..n])?;
//! }
//! ```
//!
//! ## Modules
//!
//! - `buffer` - Growable FIFO byte buffer
//! - `channel` - Channel state machine, connect/accept, framing
//! - `addr` - UNIX / IPv4 / IPv6 addressing
//! - `creds` - UNIX-domain peer credentials
//! - `config` - Builder and environment configuration
//! - `sys` - EINTR-safe socket syscall wrappers

pub mod addr;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod creds;
pub mod sys;

pub use addr::ChannelAddr;
pub use buffer::ByteBuffer;
pub use channel::Channel;
pub use config::ChannelConfig;
pub use creds::PeerCredentials;

pub use achat_core::constants;
pub use achat_core::error::{AchatError, Result, ResultCode};
pub use achat_core::notify::WritableNotify;
pub use achat_core::state::{BlockingMode, ChannelState, Role, SslMode};
