//! Writable-again notification.
//!
//! A channel in non-blocking mode may be unable to push all buffered output
//! in one `flush()`. When that happens and a `WritableNotify` is registered,
//! the channel calls `arm()` so the caller's event loop can watch the
//! descriptor for write-readiness and call `flush()` again.
//!
//! The channel holds only a weak reference: the event loop owns the hook.
//! There is no read-side equivalent; callers re-invoke `receive_message`
//! when their loop reports the descriptor readable.

/// Asks an external event loop to report when `fd` becomes writable.
///
/// **Contract:**
/// - `arm()` must NEVER block.
/// - Arming an already-armed descriptor is harmless.
pub trait WritableNotify: Send + Sync {
    /// Called from `flush()` when output remains buffered.
    fn arm(&self, fd: i32);
}
