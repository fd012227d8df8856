//! Channel configuration builder

use crate::addr::ChannelAddr;
use crate::channel::Channel;

use achat_core::env::{env_get_bool, env_get_opt, env_get_str};
use achat_core::error::{AchatError, Result};
use achat_core::state::{BlockingMode, Role, SslMode};

/// Everything a channel needs before `prepare()`.
///
/// ```ignore
/// let mut server = ChannelConfig::new()
///     .role(Role::Server)
///     .address(ChannelAddr::unix("/run/achat/ctl.sock"))
///     .build()?;
/// server.prepare()?;
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub role: Option<Role>,
    pub address: Option<ChannelAddr>,
    pub ssl_mode: SslMode,
    pub blocking: BlockingMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            role: None,
            address: None,
            ssl_mode: SslMode::Clear,
            blocking: BlockingMode::Blocking,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn address(mut self, addr: ChannelAddr) -> Self {
        self.address = Some(addr);
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn blocking(mut self, mode: BlockingMode) -> Self {
        self.blocking = mode;
        self
    }

    /// Read configuration from the environment
    ///
    /// - `ACHAT_ADDR`: socket path or `host:port` (default `127.0.0.1:4000`)
    /// - `ACHAT_ROLE`: `server` or `client` (unset leaves the role open)
    /// - `ACHAT_NONBLOCK`: boolean, default false
    pub fn from_env() -> Result<Self> {
        let addr: ChannelAddr = match env_get_opt::<String>("ACHAT_ADDR") {
            Some(s) => s.parse()?,
            None => ChannelAddr::default_inet(),
        };
        let role = match env_get_str("ACHAT_ROLE", "").as_str() {
            "" => None,
            s => Some(
                s.parse::<Role>()
                    .map_err(|()| AchatError::InvalidParameter("ACHAT_ROLE"))?,
            ),
        };
        let blocking = if env_get_bool("ACHAT_NONBLOCK", false) {
            BlockingMode::NonBlocking
        } else {
            BlockingMode::Blocking
        };
        Ok(Self {
            role,
            address: Some(addr),
            ssl_mode: SslMode::Clear,
            blocking,
        })
    }

    /// Apply to an unopened channel.
    pub fn apply(&self, ch: &mut Channel) -> Result<()> {
        ch.set_blocking_mode(self.blocking)?;
        ch.set_ssl_mode(self.ssl_mode)?;
        if let Some(role) = self.role {
            ch.set_role(role)?;
        }
        if let Some(addr) = &self.address {
            ch.set_address(addr.clone())?;
        }
        Ok(())
    }

    /// Create a channel configured from `self`.
    pub fn build(&self) -> Result<Channel> {
        let mut ch = Channel::new()?;
        self.apply(&mut ch)?;
        Ok(ch)
    }
}
