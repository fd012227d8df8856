//! Socket setup, connection establishment, accept and close.

use super::Channel;

use crate::addr::ChannelAddr;
use crate::creds::PeerCredentials;
use crate::sys::{self, Socket};

use achat_core::constants::LISTEN_BACKLOG;
use achat_core::error::{AchatError, Result};
use achat_core::state::{BlockingMode, ChannelState, Role, SslMode};

use tracing::{debug, warn};

impl Channel {
    /// Create the socket for the configured role.
    ///
    /// - Server: bind and listen. A UNIX path is unlinked first (stale
    ///   socket from a previous run) and made world-accessible after bind;
    ///   access control is left to the enclosing directory.
    /// - Client: create the socket, non-blocking if so configured.
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_state(ChannelState::Initialised, "prepare")?;
        if self.ssl_mode != Some(SslMode::Clear) {
            return Err(AchatError::WrongState { op: "prepare", state: self.state });
        }
        let role = self
            .role
            .ok_or(AchatError::WrongState { op: "prepare", state: self.state })?;
        let addr = self
            .address
            .clone()
            .ok_or(AchatError::InvalidParameter("no address"))?;
        let raw = addr.to_raw()?;

        let sock = Socket::stream(addr.family()).map_err(|e| AchatError::os("socket", e))?;

        match role {
            Role::Server => {
                listen_on(&sock, &addr, &raw)?;
                self.listen_sock = Some(sock);
            }
            Role::Client => {
                if self.blocking == BlockingMode::NonBlocking {
                    sock.set_nonblocking().map_err(|e| AchatError::os("fcntl", e))?;
                }
                self.conn_sock = Some(sock);
            }
        }

        self.transit(ChannelState::NotConnected, "prepare")?;
        debug!(%addr, %role, fd = ?self.raw_fd(), "channel prepared");
        Ok(())
    }

    /// Connect a prepared client channel.
    ///
    /// Non-blocking clients may get `Pending` while the connect is in
    /// flight; call `open()` again once the descriptor is writable. Any
    /// other failure closes the socket and returns the channel to
    /// `INITIALISED`.
    ///
    /// Server channels never open: use `accept_duplicate()`.
    pub fn open(&mut self) -> Result<()> {
        self.expect_state(ChannelState::NotConnected, "open")?;
        if self.role != Some(Role::Client) {
            return Err(AchatError::InvalidParameter(
                "open on server channel; use accept_duplicate",
            ));
        }
        let addr = self
            .address
            .clone()
            .ok_or(AchatError::InvalidParameter("no address"))?;
        let raw = addr.to_raw()?;

        let outcome = match self.conn_sock.as_ref() {
            Some(sock) => self.try_connect(sock, &raw),
            None => return Err(AchatError::WrongState { op: "open", state: self.state }),
        };

        match outcome {
            Ok(()) => {}
            Err(AchatError::Pending) => {
                self.connect_pending = true;
                return Err(AchatError::Pending);
            }
            Err(e) => {
                self.abandon_connect();
                return Err(e);
            }
        }
        self.connect_pending = false;

        let peer = match self.conn_sock.as_ref().map(|s| peer_of(s, &addr)) {
            Some(Ok(peer)) => peer,
            Some(Err(e)) => {
                self.abandon_connect();
                return Err(e);
            }
            None => return Err(AchatError::WrongState { op: "open", state: self.state }),
        };
        self.peer = peer;

        self.transit(ChannelState::Established, "open")?;
        debug!(%addr, fd = ?self.raw_fd(), peer = ?self.peer, "channel established");
        Ok(())
    }

    fn try_connect(&self, sock: &Socket, raw: &crate::addr::RawAddr) -> Result<()> {
        if self.connect_pending {
            match sock.take_error() {
                Ok(0) => {}
                Ok(e) => return Err(AchatError::os("connect", e)),
                Err(e) => return Err(AchatError::os("getsockopt", e)),
            }
        }
        match sock.connect(raw) {
            Ok(()) => Ok(()),
            Err(libc::EISCONN) => Ok(()),
            Err(e) if e == libc::EINPROGRESS || e == libc::EALREADY => {
                if self.blocking == BlockingMode::NonBlocking {
                    return Err(AchatError::Pending);
                }
                sock.wait_writable().map_err(|e| AchatError::os("poll", e))?;
                match sock.take_error() {
                    Ok(0) => Ok(()),
                    Ok(e) => Err(AchatError::os("connect", e)),
                    Err(e) => Err(AchatError::os("getsockopt", e)),
                }
            }
            // Full UNIX-domain backlog on a non-blocking socket
            Err(e) if sys::is_would_block(e) && self.blocking == BlockingMode::NonBlocking => {
                Err(AchatError::Pending)
            }
            Err(e) => Err(AchatError::os("connect", e)),
        }
    }

    /// Drop the client socket after a failed connect; back to INITIALISED.
    fn abandon_connect(&mut self) {
        self.conn_sock = None;
        self.connect_pending = false;
        self.state = ChannelState::Initialised;
    }

    /// Accept one pending connection on a listening server channel.
    ///
    /// Returns a new, independent `ESTABLISHED` client-role channel that
    /// inherits ssl-mode, blocking mode and address. The listener stays in
    /// `NOTCONNECTED`, ready for the next accept. Blocks when the listener
    /// has nothing pending.
    pub fn accept_duplicate(&self) -> Result<Channel> {
        if self.role != Some(Role::Server) {
            return Err(AchatError::InvalidParameter("accept_duplicate on client channel"));
        }
        self.expect_state(ChannelState::NotConnected, "accept_duplicate")?;
        if self.writable.is_some() {
            return Err(AchatError::InvalidParameter("listener has a writable hook registered"));
        }
        let listener = self
            .listen_sock
            .as_ref()
            .ok_or(AchatError::WrongState { op: "accept_duplicate", state: self.state })?;
        let addr = self
            .address
            .clone()
            .ok_or(AchatError::InvalidParameter("no address"))?;

        // Built before accepting so an allocation failure cannot strand a
        // connection. On any later error `dup` is dropped, which tears it down.
        let mut dup = Channel::new()?;
        dup.role = Some(Role::Client);
        dup.ssl_mode = self.ssl_mode;
        dup.blocking = self.blocking;
        dup.address = Some(addr.clone());
        dup.reevaluate();

        let sock = loop {
            match listener.accept() {
                Ok(sock) => break sock,
                Err(e) if sys::is_would_block(e) || e == libc::EINTR || e == libc::ECONNABORTED => {
                    continue
                }
                Err(e) => return Err(AchatError::os("accept", e)),
            }
        };

        dup.peer = peer_of(&sock, &addr)?;
        if dup.blocking == BlockingMode::NonBlocking {
            sock.set_nonblocking().map_err(|e| AchatError::os("fcntl", e))?;
        }
        dup.conn_sock = Some(sock);
        dup.transit(ChannelState::Established, "accept_duplicate")?;

        debug!(%addr, fd = ?dup.raw_fd(), peer = ?dup.peer, "connection accepted");
        Ok(dup)
    }

    /// Close the channel: drop buffered data, forget the writable hook,
    /// close descriptors and, for a UNIX-domain listener, remove the socket
    /// path. Closing a closed channel is a no-op.
    ///
    /// Every cleanup step runs even if an earlier one fails; the first
    /// failure is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        self.send_buf.clear();
        self.recv_buf.clear();
        self.writable = None;
        self.connect_pending = false;
        self.peer = None;

        let mut first_err: Option<AchatError> = None;

        if let Some(sock) = self.conn_sock.take() {
            if let Err(e) = sock.close() {
                first_err.get_or_insert(AchatError::os("close", e));
            }
        }
        if let Some(sock) = self.listen_sock.take() {
            if let Err(e) = sock.close() {
                first_err.get_or_insert(AchatError::os("close", e));
            }
            if let Some(path) = self.address.as_ref().and_then(ChannelAddr::unix_path) {
                if let Err(e) = sys::unlink_if_exists(path) {
                    warn!(path = %path.display(), errno = e, "socket path not removed");
                    first_err.get_or_insert(AchatError::os("unlink", e));
                }
            }
        }

        let from = self.state;
        self.state = ChannelState::Closed;
        debug!(%from, "channel closed");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Address the socket is actually bound to; useful after binding TCP
    /// port 0.
    pub fn local_address(&self) -> Result<ChannelAddr> {
        let sock = self
            .conn_sock
            .as_ref()
            .or(self.listen_sock.as_ref())
            .ok_or(AchatError::WrongState { op: "local_address", state: self.state })?;
        let raw = sock.local_addr().map_err(|e| AchatError::os("getsockname", e))?;
        ChannelAddr::from_raw(&raw).ok_or(AchatError::InvalidParameter("unsupported address family"))
    }
}

/// unlink (UNIX), bind, chmod (UNIX), listen. On failure after bind the
/// fresh socket path is removed again.
fn listen_on(sock: &Socket, addr: &ChannelAddr, raw: &crate::addr::RawAddr) -> Result<()> {
    match addr.unix_path() {
        Some(path) => {
            sys::unlink_if_exists(path).map_err(|e| AchatError::os("unlink", e))?;
            sock.bind(raw).map_err(|e| AchatError::os("bind", e))?;
            let rest = sys::chmod_world(path)
                .map_err(|e| AchatError::os("chmod", e))
                .and_then(|()| {
                    sock.listen(LISTEN_BACKLOG)
                        .map_err(|e| AchatError::os("listen", e))
                });
            if rest.is_err() {
                let _ = sys::unlink_if_exists(path);
            }
            rest
        }
        None => {
            sock.set_reuseaddr().map_err(|e| AchatError::os("setsockopt", e))?;
            sock.bind(raw).map_err(|e| AchatError::os("bind", e))?;
            sock.listen(LISTEN_BACKLOG).map_err(|e| AchatError::os("listen", e))
        }
    }
}

/// Peer identity for UNIX sockets; explicitly `None` for everything else.
fn peer_of(sock: &Socket, addr: &ChannelAddr) -> Result<Option<PeerCredentials>> {
    if !addr.is_unix() {
        return Ok(None);
    }
    PeerCredentials::of(sock.fd())
        .map(Some)
        .map_err(|e| AchatError::os("getsockopt", e))
}
