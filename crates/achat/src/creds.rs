//! Peer credentials of a connected UNIX-domain socket.
//!
//! Only UNIX-domain peers have kernel-attested identities. For any other
//! family the channel records `None` rather than keeping a previous value.

use crate::sys::{errno, SysResult};

use std::os::unix::io::RawFd;

/// Effective identity of the process on the other end of a UNIX socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerCredentials {
    pub euid: u32,
    pub egid: u32,
}

impl PeerCredentials {
    /// Query the peer of connected descriptor `fd`.
    pub fn of(fd: RawFd) -> SysResult<Self> {
        peer_credentials(fd)
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        fn peer_credentials(fd: RawFd) -> SysResult<PeerCredentials> {
            let mut cred = libc::ucred { pid: 0, uid: 0, gid: 0 };
            let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

            // Safety: SO_PEERCRED fills exactly one ucred.
            let ret = unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_PEERCRED,
                    &mut cred as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            };
            if ret != 0 {
                return Err(errno());
            }
            Ok(PeerCredentials { euid: cred.uid, egid: cred.gid })
        }
    } else {
        fn peer_credentials(fd: RawFd) -> SysResult<PeerCredentials> {
            let mut uid: libc::uid_t = 0;
            let mut gid: libc::gid_t = 0;

            let ret = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };
            if ret != 0 {
                return Err(errno());
            }
            Ok(PeerCredentials { euid: uid as u32, egid: gid as u32 })
        }
    }
}
