//! # Channel
//!
//! A channel wraps one stream socket and two `ByteBuffer`s (send and
//! receive) and moves through an explicit state machine:
//!
//! ```text
//!   NONE --(address, role, ssl-mode set)--> INITIALISED
//!        --prepare()--> NOTCONNECTED --open()--> ESTABLISHED
//!        --close()--> CLOSED            (close() from any state)
//! ```
//!
//! A server channel stays in `NOTCONNECTED` as the listener; every
//! `accept_duplicate()` returns a brand-new `ESTABLISHED` client-role
//! channel and leaves the listener untouched.
//!
//! Operations invoked in the wrong state fail with `WrongState` before any
//! syscall is made.
//!
//! Channels are not internally synchronised: use one from one thread at a
//! time.

mod connect;
mod transmit;

use crate::addr::ChannelAddr;
use crate::buffer::ByteBuffer;
use crate::creds::PeerCredentials;
use crate::sys::Socket;

use achat_core::error::{AchatError, Result};
use achat_core::notify::WritableNotify;
use achat_core::state::{BlockingMode, ChannelState, Role, SslMode};

use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};
use tracing::warn;

pub struct Channel {
    state: ChannelState,
    role: Option<Role>,
    ssl_mode: Option<SslMode>,
    blocking: BlockingMode,
    address: Option<ChannelAddr>,

    /// Listening socket (server role only)
    listen_sock: Option<Socket>,
    /// Connected socket, or the not-yet-connected client socket
    conn_sock: Option<Socket>,
    /// A non-blocking connect() is in flight on `conn_sock`
    connect_pending: bool,

    /// `None` unless the peer is a UNIX-domain socket
    peer: Option<PeerCredentials>,

    send_buf: ByteBuffer,
    recv_buf: ByteBuffer,

    writable: Option<Weak<dyn WritableNotify>>,
}

impl Channel {
    /// Create an unconfigured channel with both buffers allocated.
    pub fn new() -> Result<Self> {
        let send_buf = ByteBuffer::new()?;
        let recv_buf = ByteBuffer::new()?;
        Ok(Self {
            state: ChannelState::None,
            role: None,
            ssl_mode: None,
            blocking: BlockingMode::default(),
            address: None,
            listen_sock: None,
            conn_sock: None,
            connect_pending: false,
            peer: None,
            send_buf,
            recv_buf,
            writable: None,
        })
    }

    /// Reset to the unconfigured state, closing any open socket first.
    pub fn clear(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close during clear failed");
        }
        self.role = None;
        self.ssl_mode = None;
        self.blocking = BlockingMode::default();
        self.address = None;
        self.peer = None;
        self.send_buf.clear();
        self.recv_buf.clear();
        self.writable = None;
        self.state = ChannelState::None;
    }

    /// Close the socket if open and scrub both buffers.
    ///
    /// Dropping a channel does the same, minus the error report.
    pub fn destroy(mut self) -> Result<()> {
        let res = self.close();
        self.send_buf.free();
        self.recv_buf.free();
        res
    }

    // ── Configuration (only while no socket is open) ──

    pub fn set_role(&mut self, role: Role) -> Result<()> {
        self.expect_configurable("set_role")?;
        self.role = Some(role);
        self.reevaluate();
        Ok(())
    }

    /// `SslMode::Clear`, or `None` to unset it again (back to `NONE`).
    /// `SslMode::Enciphered` is not implemented.
    pub fn set_ssl_mode(&mut self, mode: impl Into<Option<SslMode>>) -> Result<()> {
        self.expect_configurable("set_ssl_mode")?;
        let mode = mode.into();
        if mode == Some(SslMode::Enciphered) {
            return Err(AchatError::NotYetImplemented("enciphered channels"));
        }
        self.ssl_mode = mode;
        self.reevaluate();
        Ok(())
    }

    pub fn set_blocking_mode(&mut self, mode: BlockingMode) -> Result<()> {
        self.expect_configurable("set_blocking_mode")?;
        self.blocking = mode;
        Ok(())
    }

    pub fn set_address(&mut self, addr: ChannelAddr) -> Result<()> {
        self.expect_configurable("set_address")?;
        addr.validate()?;
        self.address = Some(addr);
        self.reevaluate();
        Ok(())
    }

    // ── Writable notification ──

    /// Register `hook` to be armed whenever `flush()` leaves output behind.
    ///
    /// Only a weak reference is kept; the caller owns the hook.
    pub fn register_writable<N>(&mut self, hook: &Arc<N>)
    where
        N: WritableNotify + 'static,
    {
        let weak: Weak<dyn WritableNotify> = Arc::downgrade(hook) as Weak<dyn WritableNotify>;
        self.writable = Some(weak);
    }

    pub fn unregister_writable(&mut self) {
        self.writable = None;
    }

    pub fn has_writable_hook(&self) -> bool {
        self.writable.is_some()
    }

    // ── Accessors ──

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[inline]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    #[inline]
    pub fn ssl_mode(&self) -> Option<SslMode> {
        self.ssl_mode
    }

    #[inline]
    pub fn blocking_mode(&self) -> BlockingMode {
        self.blocking
    }

    pub fn address(&self) -> Option<&ChannelAddr> {
        self.address.as_ref()
    }

    /// Identity of a UNIX-domain peer; `None` for TCP or before `open()`.
    #[inline]
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        self.peer
    }

    /// Descriptor to register with an event loop: the connection socket
    /// when there is one, else the listening socket.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.conn_sock
            .as_ref()
            .or(self.listen_sock.as_ref())
            .map(Socket::fd)
    }

    /// Bytes queued for sending but not yet accepted by the kernel.
    #[inline]
    pub fn pending_output(&self) -> usize {
        self.send_buf.len()
    }

    /// Bytes read from the socket but not yet returned as messages.
    #[inline]
    pub fn buffered_input(&self) -> usize {
        self.recv_buf.len()
    }

    // ── State machine ──

    fn expect_configurable(&self, op: &'static str) -> Result<()> {
        if !self.state.is_configurable() {
            return Err(AchatError::WrongState { op, state: self.state });
        }
        Ok(())
    }

    fn expect_state(&self, want: ChannelState, op: &'static str) -> Result<()> {
        if self.state != want {
            return Err(AchatError::WrongState { op, state: self.state });
        }
        Ok(())
    }

    /// After a configuration change: INITIALISED iff fully configured.
    fn reevaluate(&mut self) {
        let next = if self.is_fully_configured() {
            ChannelState::Initialised
        } else {
            ChannelState::None
        };
        self.state = next;
    }

    fn is_fully_configured(&self) -> bool {
        self.address.is_some() && self.role.is_some() && self.ssl_mode.is_some()
    }

    /// Move to `target`, checking that the channel holds what that state
    /// requires.
    fn transit(&mut self, target: ChannelState, op: &'static str) -> Result<()> {
        let allowed = match target {
            ChannelState::None => true,
            ChannelState::Initialised => self.is_fully_configured(),
            ChannelState::NotConnected => match self.role {
                Some(Role::Server) => self.listen_sock.is_some(),
                Some(Role::Client) => self.conn_sock.is_some(),
                None => false,
            },
            ChannelState::Established => self.conn_sock.is_some(),
            ChannelState::Closed => true,
        };
        if !allowed {
            return Err(AchatError::WrongState { op, state: self.state });
        }
        self.state = target;
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.state.has_socket() {
            if let Err(e) = self.close() {
                warn!(error = %e, "close on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("blocking", &self.blocking)
            .field("address", &self.address)
            .field("fd", &self.raw_fd())
            .field("peer", &self.peer)
            .field("pending_output", &self.send_buf.len())
            .finish()
    }
}
