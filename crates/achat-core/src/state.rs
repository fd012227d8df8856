//! Channel state, role and mode types

use core::fmt;

/// Lifecycle state of a channel
///
/// ```text
/// NONE -> INITIALISED -> NOTCONNECTED -> ESTABLISHED -> CLOSED
/// ```
///
/// `CLOSED` is reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelState {
    /// Created or cleared; configuration incomplete
    None = 0,

    /// Address, role and ssl-mode are all set
    Initialised = 1,

    /// Socket exists: listening (server) or ready to connect (client)
    NotConnected = 2,

    /// Connected descriptor is live
    Established = 3,

    /// Closed; descriptors released
    Closed = 4,
}

impl ChannelState {
    /// Whether the channel may still be reconfigured
    #[inline]
    pub const fn is_configurable(&self) -> bool {
        matches!(
            self,
            ChannelState::None | ChannelState::Initialised | ChannelState::Closed
        )
    }

    /// Whether a descriptor is held in this state
    #[inline]
    pub const fn has_socket(&self) -> bool {
        matches!(self, ChannelState::NotConnected | ChannelState::Established)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::None => write!(f, "NONE"),
            ChannelState::Initialised => write!(f, "INITIALISED"),
            ChannelState::NotConnected => write!(f, "NOTCONNECTED"),
            ChannelState::Established => write!(f, "ESTABLISHED"),
            ChannelState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Which end of the connection a channel plays (the "tail")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Binds, listens and accepts
    Server,
    /// Initiates the connection
    Client,
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Transport security of a channel.
///
/// Only `Clear` is implemented; `Enciphered` is rejected when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SslMode {
    Clear,
    Enciphered,
}

/// Whether socket operations block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockingMode {
    Blocking,
    NonBlocking,
}

impl Default for BlockingMode {
    fn default() -> Self {
        BlockingMode::Blocking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ChannelState::None.is_configurable());
        assert!(ChannelState::Closed.is_configurable());
        assert!(!ChannelState::NotConnected.is_configurable());
        assert!(!ChannelState::Established.is_configurable());

        assert!(ChannelState::Established.has_socket());
        assert!(!ChannelState::Initialised.has_socket());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Server".parse::<Role>(), Ok(Role::Server));
        assert_eq!("client".parse::<Role>(), Ok(Role::Client));
        assert!("peer".parse::<Role>().is_err());
    }
}
