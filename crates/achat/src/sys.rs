//! # Thin socket syscall layer
//!
//! `Socket` owns one descriptor and closes it on drop. Every wrapper here
//! retries `EINTR` internally and reports any other failure as the raw
//! errno; classifying `EAGAIN` as "pending" is the channel's job.
//!
//! Reads and writes are single-shot: a short transfer is returned as-is.

use crate::addr::RawAddr;

use nix::errno::Errno;
use std::os::unix::io::RawFd;
use std::path::Path;

/// Raw errno-style result used below the channel layer.
pub type SysResult<T> = std::result::Result<T, i32>;

#[inline]
pub fn errno() -> i32 {
    Errno::last() as i32
}

#[inline]
pub fn is_would_block(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

/// Run `f` until it stops failing with `EINTR`.
#[inline]
fn retry<F>(mut f: F) -> SysResult<libc::ssize_t>
where
    F: FnMut() -> libc::ssize_t,
{
    loop {
        let ret = f();
        if ret >= 0 {
            return Ok(ret);
        }
        let e = errno();
        if e != libc::EINTR {
            return Err(e);
        }
    }
}

/// An owned stream socket descriptor.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

impl Socket {
    /// Create a close-on-exec stream socket in `family`.
    pub fn stream(family: libc::c_int) -> SysResult<Self> {
        open_stream(family)
    }

    /// Take ownership of an open descriptor.
    #[cfg(test)]
    pub(crate) fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn set_nonblocking(&self) -> SysResult<()> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(errno());
        }
        if unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(errno());
        }
        Ok(())
    }

    pub fn set_reuseaddr(&self) -> SysResult<()> {
        let opt: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &opt as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(errno());
        }
        Ok(())
    }

    pub fn bind(&self, addr: &RawAddr) -> SysResult<()> {
        if unsafe { libc::bind(self.fd, addr.as_ptr(), addr.len) } != 0 {
            return Err(errno());
        }
        Ok(())
    }

    pub fn listen(&self, backlog: libc::c_int) -> SysResult<()> {
        if unsafe { libc::listen(self.fd, backlog) } != 0 {
            return Err(errno());
        }
        Ok(())
    }

    /// Accept one pending connection as a new close-on-exec socket.
    pub fn accept(&self) -> SysResult<Socket> {
        accept_cloexec(self)
    }

    /// `connect()`. An interrupted connect is not restarted: the kernel keeps
    /// it going, so `EINTR` is reported as `EINPROGRESS` for the caller to
    /// wait on.
    pub fn connect(&self, addr: &RawAddr) -> SysResult<()> {
        if unsafe { libc::connect(self.fd, addr.as_ptr(), addr.len) } == 0 {
            return Ok(());
        }
        match errno() {
            libc::EINTR => Err(libc::EINPROGRESS),
            e => Err(e),
        }
    }

    /// Block until the socket is writable (used to finish a connect).
    pub fn wait_writable(&self) -> SysResult<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        retry(|| unsafe { libc::poll(&mut pfd, 1, -1) as libc::ssize_t })?;
        Ok(())
    }

    /// Fetch and clear the pending socket error (`SO_ERROR`).
    pub fn take_error(&self) -> SysResult<i32> {
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret != 0 {
            return Err(errno());
        }
        Ok(err)
    }

    pub fn local_addr(&self) -> SysResult<RawAddr> {
        let mut raw = RawAddr::for_output();
        if unsafe { libc::getsockname(self.fd, raw.as_mut_ptr(), &mut raw.len) } != 0 {
            return Err(errno());
        }
        Ok(raw)
    }

    /// One `read()`. `Ok(0)` means the peer closed its write side.
    pub fn read(&self, buf: &mut [u8]) -> SysResult<usize> {
        let n = retry(|| unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        })?;
        Ok(n as usize)
    }

    /// One send. May transfer fewer bytes than offered.
    pub fn write(&self, buf: &[u8]) -> SysResult<usize> {
        let n = retry(|| unsafe {
            libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), SEND_FLAGS)
        })?;
        Ok(n as usize)
    }

    /// Close now and report the result. Drop closes silently.
    pub fn close(mut self) -> SysResult<()> {
        let fd = std::mem::replace(&mut self.fd, -1);
        nix::unistd::close(fd).map_err(|e| e as i32)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            let _ = nix::unistd::close(self.fd);
            self.fd = -1;
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))] {
        // No SIGPIPE when the peer has gone away; EPIPE instead.
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

        fn open_stream(family: libc::c_int) -> SysResult<Socket> {
            let fd = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
            if fd < 0 {
                return Err(errno());
            }
            Ok(Socket { fd })
        }

        fn accept_cloexec(listener: &Socket) -> SysResult<Socket> {
            let mut peer = RawAddr::for_output();
            let fd = retry(|| unsafe {
                libc::accept4(listener.fd, peer.as_mut_ptr(), &mut peer.len, libc::SOCK_CLOEXEC)
                    as libc::ssize_t
            })?;
            Ok(Socket { fd: fd as RawFd })
        }
    } else {
        const SEND_FLAGS: libc::c_int = 0;

        fn set_cloexec(sock: &Socket) -> SysResult<()> {
            let flags = unsafe { libc::fcntl(sock.fd, libc::F_GETFD) };
            if flags < 0 {
                return Err(errno());
            }
            if unsafe { libc::fcntl(sock.fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
                return Err(errno());
            }
            Ok(())
        }

        fn open_stream(family: libc::c_int) -> SysResult<Socket> {
            let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
            if fd < 0 {
                return Err(errno());
            }
            let sock = Socket { fd };
            set_cloexec(&sock)?;
            Ok(sock)
        }

        fn accept_cloexec(listener: &Socket) -> SysResult<Socket> {
            let mut peer = RawAddr::for_output();
            let fd = retry(|| unsafe {
                libc::accept(listener.fd, peer.as_mut_ptr(), &mut peer.len) as libc::ssize_t
            })?;
            let sock = Socket { fd: fd as RawFd };
            set_cloexec(&sock)?;
            Ok(sock)
        }
    }
}

/// Remove a filesystem entry, treating "already gone" as success.
pub fn unlink_if_exists(path: &Path) -> SysResult<()> {
    match nix::unistd::unlink(path) {
        Ok(()) | Err(Errno::ENOENT) => Ok(()),
        Err(e) => Err(e as i32),
    }
}

/// Give a UNIX socket path world read/write/execute permissions.
pub fn chmod_world(path: &Path) -> SysResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_pair_read_write() {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        let a = Socket { fd: fds[0] };
        let b = Socket { fd: fds[1] };

        assert_eq!(a.write(b"ping").unwrap(), 4);
        let mut buf = [0u8; 16];
        assert_eq!(b.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");

        a.close().unwrap();
        // Peer closed: read reports EOF as zero bytes
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_nonblocking_read_would_block() {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        let a = Socket { fd: fds[0] };
        let _b = Socket { fd: fds[1] };

        a.set_nonblocking().unwrap();
        let mut buf = [0u8; 8];
        let err = a.read(&mut buf).unwrap_err();
        assert!(is_would_block(err));
    }

    #[test]
    fn test_stream_socket_is_cloexec() {
        let sock = Socket::stream(libc::AF_UNIX).unwrap();
        let flags = unsafe { libc::fcntl(sock.fd(), libc::F_GETFD) };
        assert!(flags >= 0);
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn test_unlink_missing_path_is_ok() {
        let path = std::env::temp_dir().join(format!("achat-sys-missing-{}", std::process::id()));
        assert_eq!(unlink_if_exists(&path), Ok(()));
    }
}
