//! Message framing over the channel's byte stream.
//!
//! Wire format, per message:
//!
//! ```text
//! [ u32 big-endian: 4 + payload_len ][ payload_len opaque bytes ]
//! ```
//!
//! The prefix counts itself, so a value below 4 can never be valid.

use super::Channel;

use crate::sys;

use achat_core::constants::{MAX_MSGSIZE, PREFIX_LEN, READ_CHUNK};
use achat_core::error::{AchatError, Result};
use achat_core::state::{BlockingMode, ChannelState};

use tracing::{trace, warn};

impl Channel {
    /// Queue one message and try to push it out.
    ///
    /// `Err(Pending)` means the message is queued but not fully written;
    /// finish with `flush()`. The frame is queued whole or not at all.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() || payload.len() > MAX_MSGSIZE {
            return Err(AchatError::InvalidParameter("message size out of range"));
        }
        self.expect_state(ChannelState::Established, "send_message")?;

        let prefix = ((payload.len() + PREFIX_LEN) as u32).to_be_bytes();
        self.send_buf.append(&prefix)?;
        if let Err(e) = self.send_buf.append(payload) {
            self.send_buf.truncate(PREFIX_LEN)?;
            return Err(e);
        }
        trace!(len = payload.len(), queued = self.send_buf.len(), "frame queued");

        self.flush()
    }

    /// Offer all buffered output to the kernel in one write.
    ///
    /// `Ok(())` once the buffer is empty. `Err(Pending)` when the socket took
    /// only part of it (or none); the registered writable hook, if any, is
    /// armed so the caller can retry when the descriptor is writable.
    pub fn flush(&mut self) -> Result<()> {
        self.expect_state(ChannelState::Established, "flush")?;
        if self.send_buf.is_empty() {
            return Ok(());
        }
        let sock = self
            .conn_sock
            .as_ref()
            .ok_or(AchatError::WrongState { op: "flush", state: self.state })?;

        let buffered = self.send_buf.len();
        let written = match sock.write(self.send_buf.as_slice()) {
            Ok(n) => n,
            Err(e) if sys::is_would_block(e) => 0,
            Err(e) => return Err(AchatError::os("write", e)),
        };
        let fd = sock.fd();

        if written > 0 {
            self.send_buf.consume(written)?;
        }
        trace!(fd, written, remaining = self.send_buf.len(), "flush");

        if written == buffered {
            return Ok(());
        }
        self.arm_writable(fd);
        Err(AchatError::Pending)
    }

    /// Receive the next complete message into `out`, returning its length.
    ///
    /// - `Err(Pending)`: no complete frame yet; call again when readable.
    /// - `Err(NoSpace)`: `out` is too small; the frame stays buffered, so a
    ///   retry with a larger buffer succeeds without further socket I/O.
    /// - `Err(EndOfFile)`: the peer closed its write side.
    /// - `Err(CorruptFrame)`: the stream is unusable; close the channel.
    pub fn receive_message(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() || out.len() > MAX_MSGSIZE {
            return Err(AchatError::InvalidParameter("receive buffer size out of range"));
        }
        self.expect_state(ChannelState::Established, "receive_message")?;

        if self.recv_buf.len() < PREFIX_LEN {
            self.fill(PREFIX_LEN)?;
        }

        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&self.recv_buf.as_slice()[..PREFIX_LEN]);
        let frame_len = u32::from_be_bytes(prefix);
        let total = frame_len as usize;

        if total < PREFIX_LEN || total - PREFIX_LEN > MAX_MSGSIZE {
            warn!(frame_len, "corrupt length prefix");
            return Err(AchatError::CorruptFrame(frame_len));
        }
        if total == PREFIX_LEN {
            // Empty body: drop the prefix so it is not read again.
            self.recv_buf.consume(PREFIX_LEN)?;
            trace!("empty frame received");
            return Ok(0);
        }

        if self.recv_buf.len() < total {
            self.fill(total)?;
        }
        if self.recv_buf.len() < total {
            return Err(AchatError::Pending);
        }

        let body = total - PREFIX_LEN;
        if out.len() < body {
            return Err(AchatError::NoSpace { needed: body });
        }
        out[..body].copy_from_slice(&self.recv_buf.as_slice()[PREFIX_LEN..total]);
        self.recv_buf.consume(total)?;
        trace!(len = body, buffered = self.recv_buf.len(), "frame received");
        Ok(body)
    }

    /// Read until at least `target` bytes are buffered.
    ///
    /// Blocking channels read exactly what is missing; non-blocking ones read
    /// at least `READ_CHUNK` at a time and stop with `Pending` on EAGAIN.
    /// Whatever part of a reservation a read did not fill is handed back.
    fn fill(&mut self, target: usize) -> Result<()> {
        let Channel { conn_sock, recv_buf, blocking, state, .. } = self;
        let sock = conn_sock
            .as_ref()
            .ok_or(AchatError::WrongState { op: "receive_message", state: *state })?;

        while recv_buf.len() < target {
            let missing = target - recv_buf.len();
            let want = match blocking {
                BlockingMode::Blocking => missing,
                BlockingMode::NonBlocking => missing.max(READ_CHUNK),
            };

            let dst = recv_buf.reserve(want)?;
            let got = match sock.read(dst) {
                Ok(n) => n,
                Err(e) => {
                    recv_buf.truncate(want)?;
                    if sys::is_would_block(e) {
                        return Err(AchatError::Pending);
                    }
                    return Err(AchatError::os("read", e));
                }
            };
            recv_buf.truncate(want - got)?;

            if got == 0 {
                trace!(fd = sock.fd(), "peer closed");
                return Err(AchatError::EndOfFile);
            }
            trace!(fd = sock.fd(), got, buffered = recv_buf.len(), "fill");
        }
        Ok(())
    }

    fn arm_writable(&mut self, fd: i32) {
        let Some(weak) = self.writable.as_ref() else {
            return;
        };
        match weak.upgrade() {
            Some(hook) => hook.arm(fd),
            // Owner dropped the hook without unregistering
            None => self.writable = None,
        }
    }
}
