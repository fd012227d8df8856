//! Channel addressing: UNIX-domain paths and IPv4/IPv6 socket addresses.
//!
//! `ChannelAddr` is the typed form callers configure; `RawAddr` is the
//! `sockaddr_storage` + length pair handed to `bind`/`connect`.

use achat_core::constants::DEFAULT_PORT;
use achat_core::error::{AchatError, Result};

use std::ffi::OsStr;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Address a channel binds to (server) or connects to (client).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddr {
    /// UNIX-domain stream socket at a filesystem path
    Unix(PathBuf),
    /// TCP over IPv4 or IPv6
    Inet(SocketAddr),
}

impl ChannelAddr {
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ChannelAddr::Unix(path.into())
    }

    /// Loopback TCP on the default port.
    pub fn default_inet() -> Self {
        ChannelAddr::Inet(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)))
    }

    #[inline]
    pub fn is_unix(&self) -> bool {
        matches!(self, ChannelAddr::Unix(_))
    }

    pub fn unix_path(&self) -> Option<&Path> {
        match self {
            ChannelAddr::Unix(p) => Some(p),
            ChannelAddr::Inet(_) => None,
        }
    }

    /// `AF_UNIX`, `AF_INET` or `AF_INET6`.
    pub fn family(&self) -> libc::c_int {
        match self {
            ChannelAddr::Unix(_) => libc::AF_UNIX,
            ChannelAddr::Inet(SocketAddr::V4(_)) => libc::AF_INET,
            ChannelAddr::Inet(SocketAddr::V6(_)) => libc::AF_INET6,
        }
    }

    /// Reject addresses that can never be bound or connected.
    pub fn validate(&self) -> Result<()> {
        if let ChannelAddr::Unix(path) = self {
            let bytes = path.as_os_str().as_bytes();
            if bytes.is_empty() {
                return Err(AchatError::InvalidParameter("empty socket path"));
            }
            if bytes.contains(&0) {
                return Err(AchatError::InvalidParameter("NUL in socket path"));
            }
            if bytes.len() >= sun_path_capacity() {
                return Err(AchatError::InvalidParameter("socket path too long"));
            }
        }
        Ok(())
    }

    /// Encode as a raw socket address.
    pub fn to_raw(&self) -> Result<RawAddr> {
        self.validate()?;
        let mut raw = RawAddr::zeroed();
        match self {
            ChannelAddr::Unix(path) => {
                // Safety: sockaddr_storage is large enough and suitably
                // aligned for every sockaddr variant.
                let sun = unsafe { &mut *(&mut raw.storage as *mut _ as *mut libc::sockaddr_un) };
                sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
                let bytes = path.as_os_str().as_bytes();
                for (dst, &src) in sun.sun_path.iter_mut().zip(bytes) {
                    *dst = src as libc::c_char;
                }
                raw.len = (sun_path_offset() + bytes.len() + 1) as libc::socklen_t;
            }
            ChannelAddr::Inet(SocketAddr::V4(v4)) => {
                let sin = unsafe { &mut *(&mut raw.storage as *mut _ as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                raw.len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            }
            ChannelAddr::Inet(SocketAddr::V6(v6)) => {
                let sin6 = unsafe { &mut *(&mut raw.storage as *mut _ as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_scope_id = v6.scope_id();
                raw.len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            }
        }
        Ok(raw)
    }

    /// Decode a raw socket address. `None` for unsupported families.
    pub fn from_raw(raw: &RawAddr) -> Option<Self> {
        match raw.storage.ss_family as libc::c_int {
            libc::AF_UNIX => {
                let sun = unsafe { &*(&raw.storage as *const _ as *const libc::sockaddr_un) };
                let path_len = (raw.len as usize)
                    .saturating_sub(sun_path_offset())
                    .min(sun.sun_path.len());
                let bytes: Vec<u8> = sun.sun_path[..path_len]
                    .iter()
                    .map(|&c| c as u8)
                    .take_while(|&c| c != 0)
                    .collect();
                Some(ChannelAddr::Unix(PathBuf::from(OsStr::from_bytes(&bytes))))
            }
            libc::AF_INET => {
                let sin = unsafe { &*(&raw.storage as *const _ as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                let port = u16::from_be(sin.sin_port);
                Some(ChannelAddr::Inet(SocketAddr::V4(SocketAddrV4::new(ip, port))))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(&raw.storage as *const _ as *const libc::sockaddr_in6) };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                let port = u16::from_be(sin6.sin6_port);
                Some(ChannelAddr::Inet(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    port,
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                ))))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for ChannelAddr {
    fn from(addr: SocketAddr) -> Self {
        ChannelAddr::Inet(addr)
    }
}

impl From<PathBuf> for ChannelAddr {
    fn from(path: PathBuf) -> Self {
        ChannelAddr::Unix(path)
    }
}

impl std::str::FromStr for ChannelAddr {
    type Err = AchatError;

    /// `host:port` parses as TCP; anything else is taken as a socket path.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(AchatError::InvalidParameter("empty address"));
        }
        let addr = match s.parse::<SocketAddr>() {
            Ok(sa) => ChannelAddr::Inet(sa),
            Err(_) => ChannelAddr::Unix(PathBuf::from(s)),
        };
        addr.validate()?;
        Ok(addr)
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddr::Unix(p) => write!(f, "unix:{}", p.display()),
            ChannelAddr::Inet(sa) => write!(f, "tcp:{}", sa),
        }
    }
}

/// Raw socket address as passed to the kernel.
#[derive(Clone, Copy)]
pub struct RawAddr {
    pub storage: libc::sockaddr_storage,
    pub len: libc::socklen_t,
}

impl RawAddr {
    pub fn zeroed() -> Self {
        Self {
            storage: unsafe { std::mem::zeroed() },
            len: 0,
        }
    }

    /// Zeroed storage with `len` set to its full size, for kernel out-params.
    pub fn for_output() -> Self {
        let mut raw = Self::zeroed();
        raw.len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        raw
    }

    #[inline]
    pub fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const _ as *const libc::sockaddr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        &mut self.storage as *mut _ as *mut libc::sockaddr
    }
}

impl fmt::Debug for RawAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAddr")
            .field("family", &self.storage.ss_family)
            .field("len", &self.len)
            .finish()
    }
}

fn sun_path_offset() -> usize {
    std::mem::offset_of!(libc::sockaddr_un, sun_path)
}

fn sun_path_capacity() -> usize {
    let sun: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    sun.sun_path.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inet_and_unix() {
        let a: ChannelAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(a, ChannelAddr::default_inet());
        assert_eq!(a.family(), libc::AF_INET);

        let u: ChannelAddr = "/tmp/achat.sock".parse().unwrap();
        assert!(u.is_unix());
        assert_eq!(u.unix_path(), Some(Path::new("/tmp/achat.sock")));
    }

    #[test]
    fn test_unix_path_validation() {
        assert!(ChannelAddr::unix("").validate().is_err());
        let long = "x".repeat(sun_path_capacity());
        assert_eq!(
            ChannelAddr::unix(long).validate(),
            Err(AchatError::InvalidParameter("socket path too long"))
        );
        assert!(ChannelAddr::unix("/run/achat/a.sock").validate().is_ok());
    }

    #[test]
    fn test_raw_roundtrip_each_family() {
        let addrs = [
            ChannelAddr::unix("/tmp/achat-raw.sock"),
            "10.1.2.3:9000".parse().unwrap(),
            "[::1]:4001".parse().unwrap(),
        ];
        for addr in addrs {
            let raw = addr.to_raw().unwrap();
            assert_eq!(raw.storage.ss_family as libc::c_int, addr.family());
            assert_eq!(ChannelAddr::from_raw(&raw), Some(addr));
        }
    }

    #[test]
    fn test_unsupported_family() {
        let raw = RawAddr::for_output();
        assert_eq!(ChannelAddr::from_raw(&raw), None);
    }
}
