use std::time::Duration;

use crate::auth::SecretBytes;
use crate::error::{Error, Result};
use crate::types::PrivilegeLevel;

/// Default RMCP port of the BMC.
pub const DEFAULT_PORT: u16 = 623;

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default requestor (software) address.
pub const DEFAULT_RQ_ADDR: u8 = 0x81;

/// Default initial outbound session sequence number requested at activation.
pub const DEFAULT_INITIAL_OUTBOUND_SEQ: u32 = 0x1337;

/// Options for opening a session.
///
/// Every option has a default; construct with [`SessionOptions::new`] and
/// chain setters. Validation happens when the session is opened.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub(crate) port: Option<u16>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) user: Option<Vec<u8>>,
    pub(crate) password: Option<SecretBytes>,
    pub(crate) privilege: Option<PrivilegeLevel>,
    pub(crate) rq_addr: Option<u8>,
    pub(crate) initial_outbound_seq: Option<u32>,
}

impl SessionOptions {
    /// Create options with every key at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// UDP port of the BMC (default 623).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Per-request deadline (default 1000 ms).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Username (UTF-8 string, at most 16 bytes; default empty).
    pub fn user(self, user: impl AsRef<str>) -> Self {
        self.user_bytes(user.as_ref().as_bytes().to_vec())
    }

    /// Username as raw bytes.
    ///
    /// IPMI usernames are ASCII in most deployments, but the protocol treats
    /// them as raw bytes.
    pub fn user_bytes(mut self, user: impl Into<Vec<u8>>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Password (UTF-8 string, at most 16 bytes; default empty).
    pub fn password(self, password: impl AsRef<str>) -> Self {
        self.password_bytes(password.as_ref().as_bytes().to_vec())
    }

    /// Password as raw bytes.
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(SecretBytes::new(password.into()));
        self
    }

    /// Requested session privilege level (default administrator).
    pub fn privilege(mut self, level: PrivilegeLevel) -> Self {
        self.privilege = Some(level);
        self
    }

    /// Requestor address, 0x81..=0x8D (default 0x81).
    pub fn rq_addr(mut self, rq_addr: u8) -> Self {
        self.rq_addr = Some(rq_addr);
        self
    }

    /// Initial outbound session sequence number requested at activation
    /// (default 0x1337).
    pub fn initial_outbound_seq(mut self, seq: u32) -> Self {
        self.initial_outbound_seq = Some(seq);
        self
    }

    pub(crate) fn resolve(self) -> Result<ResolvedOptions> {
        let user = self.user.unwrap_or_default();
        if user.len() > 16 {
            return Err(Error::InvalidArgument("username longer than 16 bytes"));
        }
        let mut padded_user = [0u8; 16];
        padded_user[..user.len()].copy_from_slice(&user);

        let password = self.password.unwrap_or_default();
        if password.len() > 16 {
            return Err(Error::InvalidArgument("password longer than 16 bytes"));
        }

        let rq_addr = self.rq_addr.unwrap_or(DEFAULT_RQ_ADDR);
        if !(0x81..=0x8D).contains(&rq_addr) {
            return Err(Error::InvalidArgument(
                "requestor address outside 0x81..=0x8D",
            ));
        }

        Ok(ResolvedOptions {
            port: self.port.unwrap_or(DEFAULT_PORT),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            user: padded_user,
            password,
            privilege: self.privilege.unwrap_or(PrivilegeLevel::Administrator),
            rq_addr,
            initial_outbound_seq: self
                .initial_outbound_seq
                .unwrap_or(DEFAULT_INITIAL_OUTBOUND_SEQ),
        })
    }
}

/// Options with defaults applied and inputs validated.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedOptions {
    pub(crate) port: u16,
    pub(crate) timeout: Duration,
    pub(crate) user: [u8; 16],
    pub(crate) password: SecretBytes,
    pub(crate) privilege: PrivilegeLevel,
    pub(crate) rq_addr: u8,
    pub(crate) initial_outbound_seq: u32,
}
