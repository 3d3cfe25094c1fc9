use core::fmt;
use std::net::SocketAddr;

/// The privilege level requested for the IPMI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
}

impl PrivilegeLevel {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        match raw & 0x0F {
            0x01 => Some(PrivilegeLevel::Callback),
            0x02 => Some(PrivilegeLevel::User),
            0x03 => Some(PrivilegeLevel::Operator),
            0x04 => Some(PrivilegeLevel::Administrator),
            _ => None,
        }
    }
}

/// The IPMI v1.5 session authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthType {
    /// No per-message authentication.
    None = 0x00,
    /// MD2 digest authentication.
    Md2 = 0x01,
    /// MD5 digest authentication.
    Md5 = 0x02,
    /// Straight (right-padded) password authentication.
    Password = 0x04,
}

impl AuthType {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        match raw & 0x0F {
            0x00 => Some(AuthType::None),
            0x01 => Some(AuthType::Md2),
            0x02 => Some(AuthType::Md5),
            0x04 => Some(AuthType::Password),
            _ => None,
        }
    }
}

/// Identifies one session: the target address plus a tag disambiguating
/// successive sessions to the same target.
///
/// A handle stays valid only while the owning [`Session`](crate::Session) is
/// alive; operations on a dead handle fail with
/// [`Error::NoSession`](crate::Error::NoSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    target: SocketAddr,
    tag: u32,
}

impl SessionHandle {
    pub(crate) fn new(target: SocketAddr, tag: u32) -> Self {
        Self { target, tag }
    }

    /// The BMC this session talks to.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// The tag distinguishing this session from earlier sessions to the same
    /// target.
    pub fn tag(&self) -> u32 {
        self.tag
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.target, self.tag)
    }
}

/// A raw IPMI response.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Parsed response for the `Get Device ID` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits are the revision).
    pub device_revision: u8,
    /// Firmware major revision.
    pub firmware_major: u8,
    /// Firmware minor revision.
    pub firmware_minor: u8,
    /// IPMI version as BCD (e.g. 0x51 for 1.5).
    pub ipmi_version: u8,
    /// Manufacturer ID (24-bit, least-significant byte first).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
}

/// Parsed response for `Get Channel Authentication Capabilities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCapabilities {
    /// Channel the capabilities describe.
    pub channel: u8,
    /// Anonymous (no auth code) sessions enabled.
    pub auth_none: bool,
    /// MD2 enabled.
    pub auth_md2: bool,
    /// MD5 enabled.
    pub auth_md5: bool,
    /// Straight password enabled.
    pub auth_password: bool,
    /// OEM proprietary authentication enabled.
    pub auth_oem: bool,
    /// Per-message authentication is disabled on this channel.
    pub per_message_auth_disabled: bool,
    /// User-level authentication is disabled on this channel.
    pub user_level_auth_disabled: bool,
    /// Non-null usernames are enabled.
    pub non_null_usernames: bool,
    /// Null usernames are enabled.
    pub null_usernames: bool,
    /// Anonymous login is enabled.
    pub anonymous_login_enabled: bool,
}

impl AuthCapabilities {
    /// Whether the channel advertises the given authentication type.
    pub fn supports(&self, auth: AuthType) -> bool {
        match auth {
            AuthType::None => self.auth_none,
            AuthType::Md2 => self.auth_md2,
            AuthType::Md5 => self.auth_md5,
            AuthType::Password => self.auth_password,
        }
    }

    /// The strongest advertised authentication type, preferring
    /// MD5 > MD2 > password > none.
    pub fn strongest(&self) -> Option<AuthType> {
        [
            AuthType::Md5,
            AuthType::Md2,
            AuthType::Password,
            AuthType::None,
        ]
        .into_iter()
        .find(|auth| self.supports(*auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_level_round_trips() {
        for level in [
            PrivilegeLevel::Callback,
            PrivilegeLevel::User,
            PrivilegeLevel::Operator,
            PrivilegeLevel::Administrator,
        ] {
            assert_eq!(PrivilegeLevel::from_u8(level.as_u8()), Some(level));
        }
        assert_eq!(PrivilegeLevel::from_u8(0x00), None);
    }

    #[test]
    fn auth_type_round_trips() {
        for auth in [
            AuthType::None,
            AuthType::Md2,
            AuthType::Md5,
            AuthType::Password,
        ] {
            assert_eq!(AuthType::from_u8(auth.as_u8()), Some(auth));
        }
        assert_eq!(AuthType::from_u8(0x05), None);
    }

    #[test]
    fn strongest_auth_prefers_digests() {
        let caps = AuthCapabilities {
            channel: 1,
            auth_none: true,
            auth_md2: true,
            auth_md5: true,
            auth_password: true,
            auth_oem: false,
            per_message_auth_disabled: false,
            user_level_auth_disabled: false,
            non_null_usernames: true,
            null_usernames: false,
            anonymous_login_enabled: false,
        };
        assert_eq!(caps.strongest(), Some(AuthType::Md5));

        let caps = AuthCapabilities {
            auth_md5: false,
            auth_md2: false,
            ..caps
        };
        assert_eq!(caps.strongest(), Some(AuthType::Password));

        let caps = AuthCapabilities {
            auth_password: false,
            auth_none: false,
            ..caps
        };
        assert_eq!(caps.strongest(), None);
    }
}
