//! Typed IPMI commands.
//!
//! Each command pairs an encoder for its request data with a decoder for its
//! response, keyed by the `(NETFN, CMD)` constants. Commands execute through
//! [`Session::execute`](crate::Session::execute); the session owns framing,
//! authentication, and correlation.

use crate::error::{CompletionCode, Error, Result};
use crate::types::{AuthCapabilities, AuthType, DeviceId, PrivilegeLevel, RawResponse};

/// Application network function.
pub const NETFN_APP: u8 = 0x06;
/// Storage network function (FRU and SEL).
pub const NETFN_STORAGE: u8 = 0x0A;

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Parse a raw response into the typed output.
    fn parse_response(&self, response: RawResponse) -> Result<Self::Output>;
}

fn ok_data(response: &RawResponse) -> Result<&[u8]> {
    if response.completion_code != 0x00 {
        return Err(Error::Bmc(CompletionCode::from_u8(response.completion_code)));
    }
    Ok(&response.data)
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
#[derive(Debug, Clone, Copy)]
pub struct GetAuthCapabilities {
    /// Channel number; 0x0E addresses the channel the request arrived on.
    pub channel: u8,
    /// Privilege level to query.
    pub privilege: PrivilegeLevel,
}

impl GetAuthCapabilities {
    /// Query the receiving channel for the given privilege level.
    pub fn new(privilege: PrivilegeLevel) -> Self {
        Self {
            channel: 0x0E,
            privilege,
        }
    }
}

impl Command for GetAuthCapabilities {
    type Output = AuthCapabilities;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x38;

    fn request_data(&self) -> Vec<u8> {
        vec![self.channel & 0x0F, self.privilege.as_u8() & 0x0F]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 4 {
            return Err(Error::Protocol(
                "Get Channel Authentication Capabilities response too short",
            ));
        }

        let auth_support = data[1];
        Ok(AuthCapabilities {
            channel: data[0] & 0x0F,
            auth_none: auth_support & 0x01 != 0,
            auth_md2: auth_support & 0x02 != 0,
            auth_md5: auth_support & 0x04 != 0,
            auth_password: auth_support & 0x10 != 0,
            auth_oem: auth_support & 0x20 != 0,
            per_message_auth_disabled: data[2] & 0x10 != 0,
            user_level_auth_disabled: data[2] & 0x08 != 0,
            non_null_usernames: data[2] & 0x04 != 0,
            null_usernames: data[2] & 0x02 != 0,
            anonymous_login_enabled: data[2] & 0x01 != 0,
        })
    }
}

/// `Get Session Challenge` (App NetFn, cmd 0x39).
#[derive(Debug, Clone, Copy)]
pub struct GetSessionChallenge {
    /// Authentication type the activated session will use.
    pub auth: AuthType,
    /// Username, right-padded to 16 bytes.
    pub user: [u8; 16],
}

/// Response for `Get Session Challenge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionChallenge {
    /// Temporary session id to use for the activation request.
    pub temporary_session_id: u32,
    /// Challenge string to echo in Activate Session.
    pub challenge: [u8; 16],
}

impl Command for GetSessionChallenge {
    type Output = SessionChallenge;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x39;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(17);
        data.push(self.auth.as_u8());
        data.extend_from_slice(&self.user);
        data
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 20 {
            return Err(Error::Protocol("Get Session Challenge response too short"));
        }

        let temporary_session_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let mut challenge = [0u8; 16];
        challenge.copy_from_slice(&data[4..20]);
        Ok(SessionChallenge {
            temporary_session_id,
            challenge,
        })
    }
}

/// `Activate Session` (App NetFn, cmd 0x3A).
#[derive(Debug, Clone, Copy)]
pub struct ActivateSession {
    /// Authentication type for the activated session.
    pub auth: AuthType,
    /// Maximum requested privilege level.
    pub privilege: PrivilegeLevel,
    /// Challenge returned by `Get Session Challenge`.
    pub challenge: [u8; 16],
    /// Initial outbound session sequence number the BMC should use towards us.
    pub initial_outbound_seq: u32,
}

/// Response for `Activate Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivatedSession {
    /// Authentication type the BMC settled on.
    pub auth: AuthType,
    /// Session id for the remainder of the session.
    pub session_id: u32,
    /// Initial sequence number for our subsequent outbound packets.
    pub initial_inbound_seq: u32,
    /// Maximum privilege level allowed for the session.
    pub max_privilege: Option<PrivilegeLevel>,
}

impl Command for ActivateSession {
    type Output = ActivatedSession;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3A;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(22);
        data.push(self.auth.as_u8());
        data.push(self.privilege.as_u8());
        data.extend_from_slice(&self.challenge);
        data.extend_from_slice(&self.initial_outbound_seq.to_le_bytes());
        data
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 10 {
            return Err(Error::Protocol("Activate Session response too short"));
        }

        let auth =
            AuthType::from_u8(data[0]).ok_or(Error::Protocol("unknown activated auth type"))?;
        let session_id = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let initial_inbound_seq = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        Ok(ActivatedSession {
            auth,
            session_id,
            initial_inbound_seq,
            max_privilege: PrivilegeLevel::from_u8(data[9]),
        })
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilege {
    /// Privilege level to switch the session to.
    pub privilege: PrivilegeLevel,
}

impl Command for SetSessionPrivilege {
    type Output = Option<PrivilegeLevel>;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3B;

    fn request_data(&self) -> Vec<u8> {
        vec![self.privilege.as_u8() & 0x0F]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        Ok(data.first().and_then(|&b| PrivilegeLevel::from_u8(b)))
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Id of the session to close.
    pub session_id: u32,
}

impl Command for CloseSession {
    type Output = ();
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(&response)?;
        Ok(())
    }
}

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 11 {
            return Err(Error::Protocol("Get Device ID response too short"));
        }

        Ok(DeviceId {
            device_id: data[0],
            device_revision: data[1] & 0x0F,
            firmware_major: data[2] & 0x7F,
            firmware_minor: data[3],
            ipmi_version: data[4],
            manufacturer_id: u32::from(data[6])
                | (u32::from(data[7]) << 8)
                | (u32::from(data[8]) << 16),
            product_id: u16::from(data[9]) | (u16::from(data[10]) << 8),
        })
    }
}

/// `Get FRU Inventory Area Info` (Storage NetFn, cmd 0x10).
#[derive(Debug, Clone, Copy)]
pub struct GetFruAreaInfo {
    /// FRU device id, 0..=254.
    pub fru_id: u8,
}

/// Response for `Get FRU Inventory Area Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FruAreaInfo {
    /// Inventory area size in the device's access units.
    pub size: u16,
    /// The device is accessed by 16-bit words rather than bytes.
    pub by_words: bool,
}

impl Command for GetFruAreaInfo {
    type Output = FruAreaInfo;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x10;

    fn request_data(&self) -> Vec<u8> {
        vec![self.fru_id]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 3 {
            return Err(Error::Protocol(
                "Get FRU Inventory Area Info response too short",
            ));
        }

        Ok(FruAreaInfo {
            size: u16::from_le_bytes([data[0], data[1]]),
            by_words: data[2] & 0x01 != 0,
        })
    }
}

/// `Read FRU Data` (Storage NetFn, cmd 0x11).
#[derive(Debug, Clone, Copy)]
pub struct ReadFruData {
    /// FRU device id.
    pub fru_id: u8,
    /// Read offset in the device's access units.
    pub offset: u16,
    /// Number of units to read.
    pub count: u8,
}

impl Command for ReadFruData {
    type Output = Vec<u8>;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x11;

    fn request_data(&self) -> Vec<u8> {
        let offset = self.offset.to_le_bytes();
        vec![self.fru_id, offset[0], offset[1], self.count]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        let count = *data
            .first()
            .ok_or(Error::Protocol("Read FRU Data response too short"))? as usize;
        let bytes = data
            .get(1..)
            .filter(|rest| rest.len() >= count)
            .ok_or(Error::Protocol("Read FRU Data count exceeds response"))?;
        Ok(bytes[..count].to_vec())
    }
}

/// `Reserve SEL` (Storage NetFn, cmd 0x42).
#[derive(Debug, Clone, Copy)]
pub struct ReserveSel;

impl Command for ReserveSel {
    type Output = u16;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x42;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 2 {
            return Err(Error::Protocol("Reserve SEL response too short"));
        }
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }
}

/// `Get SEL Entry` (Storage NetFn, cmd 0x43).
#[derive(Debug, Clone, Copy)]
pub struct GetSelEntry {
    /// Record id to read; 0x0000 reads the first record.
    pub record_id: u16,
}

/// One step of SEL iteration: the raw 16-byte record plus the id that follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelEntryStep {
    /// Record id of the next entry; 0xFFFF marks the end of the log.
    pub next_record_id: u16,
    /// The raw 16-byte record.
    pub record: [u8; 16],
}

impl Command for GetSelEntry {
    type Output = SelEntryStep;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x43;

    fn request_data(&self) -> Vec<u8> {
        let record_id = self.record_id.to_le_bytes();
        // No reservation, whole record (offset 0, length 0xFF).
        vec![0x00, 0x00, record_id[0], record_id[1], 0x00, 0xFF]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 18 {
            return Err(Error::Protocol("Get SEL Entry response too short"));
        }

        let mut record = [0u8; 16];
        record.copy_from_slice(&data[2..18]);
        Ok(SelEntryStep {
            next_record_id: u16::from_le_bytes([data[0], data[1]]),
            record,
        })
    }
}

/// `Clear SEL` (Storage NetFn, cmd 0x47).
#[derive(Debug, Clone, Copy)]
pub struct ClearSel {
    /// Reservation id from `Reserve SEL`.
    pub reservation_id: u16,
    /// True to initiate erasure, false to poll erasure status.
    pub initiate: bool,
}

/// Erasure progress reported by `Clear SEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErasureStatus {
    /// Erasure still in progress.
    InProgress,
    /// Erasure completed.
    Completed,
    /// Reserved/unknown progress value.
    Unknown(u8),
}

impl Command for ClearSel {
    type Output = ErasureStatus;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x47;

    fn request_data(&self) -> Vec<u8> {
        let reservation = self.reservation_id.to_le_bytes();
        vec![
            reservation[0],
            reservation[1],
            b'C',
            b'L',
            b'R',
            if self.initiate { 0xAA } else { 0x00 },
        ]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        match data.first().map(|&b| b & 0x0F) {
            Some(0x00) => Ok(ErasureStatus::InProgress),
            Some(0x01) => Ok(ErasureStatus::Completed),
            Some(other) => Ok(ErasureStatus::Unknown(other)),
            None => Err(Error::Protocol("Clear SEL response too short")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(data: Vec<u8>) -> RawResponse {
        RawResponse {
            completion_code: 0x00,
            data,
        }
    }

    #[test]
    fn completion_code_is_reported() {
        let err = GetDeviceId
            .parse_response(RawResponse {
                completion_code: 0xC9,
                data: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Bmc(CompletionCode::ParameterOutOfRange)
        ));
    }

    #[test]
    fn auth_capabilities_parse_support_bits() {
        let cmd = GetAuthCapabilities::new(PrivilegeLevel::Administrator);
        assert_eq!(cmd.request_data(), vec![0x0E, 0x04]);

        let caps = cmd
            .parse_response(ok(vec![0x01, 0x17, 0x1F, 0x00, 0x00, 0x00, 0x00, 0x00]))
            .expect("parse");
        assert_eq!(caps.channel, 0x01);
        assert!(caps.auth_none);
        assert!(caps.auth_md2);
        assert!(caps.auth_md5);
        assert!(caps.auth_password);
        assert!(!caps.auth_oem);
        assert!(caps.per_message_auth_disabled);
        assert!(caps.user_level_auth_disabled);
        assert!(caps.non_null_usernames);
        assert!(caps.null_usernames);
        assert!(caps.anonymous_login_enabled);
        assert_eq!(caps.strongest(), Some(AuthType::Md5));
    }

    #[test]
    fn session_challenge_encodes_auth_and_user() {
        let mut user = [0u8; 16];
        user[..5].copy_from_slice(b"admin");
        let cmd = GetSessionChallenge {
            auth: AuthType::Md5,
            user,
        };

        let data = cmd.request_data();
        assert_eq!(data.len(), 17);
        assert_eq!(data[0], 0x02);
        assert_eq!(&data[1..6], b"admin");

        let mut response = vec![0x44, 0x33, 0x22, 0x11];
        response.extend_from_slice(&[0xAB; 16]);
        let challenge = cmd.parse_response(ok(response)).expect("parse");
        assert_eq!(challenge.temporary_session_id, 0x1122_3344);
        assert_eq!(challenge.challenge, [0xAB; 16]);
    }

    #[test]
    fn activate_session_round_trip() {
        let cmd = ActivateSession {
            auth: AuthType::Md5,
            privilege: PrivilegeLevel::Administrator,
            challenge: [0xCD; 16],
            initial_outbound_seq: 0x1337,
        };

        let data = cmd.request_data();
        assert_eq!(data.len(), 22);
        assert_eq!(data[0], 0x02);
        assert_eq!(data[1], 0x04);
        assert_eq!(&data[2..18], &[0xCD; 16]);
        assert_eq!(&data[18..], &0x1337u32.to_le_bytes());

        let mut response = vec![0x02];
        response.extend_from_slice(&0xAABB_CCDDu32.to_le_bytes());
        response.extend_from_slice(&0x0000_0100u32.to_le_bytes());
        response.push(0x04);
        let activated = cmd.parse_response(ok(response)).expect("parse");
        assert_eq!(activated.auth, AuthType::Md5);
        assert_eq!(activated.session_id, 0xAABB_CCDD);
        assert_eq!(activated.initial_inbound_seq, 0x100);
        assert_eq!(activated.max_privilege, Some(PrivilegeLevel::Administrator));
    }

    #[test]
    fn fru_commands_encode_unit_fields() {
        let info = GetFruAreaInfo { fru_id: 3 };
        assert_eq!(info.request_data(), vec![3]);
        let parsed = info.parse_response(ok(vec![0x20, 0x01, 0x00])).unwrap();
        assert_eq!(parsed.size, 0x120);
        assert!(!parsed.by_words);

        let read = ReadFruData {
            fru_id: 3,
            offset: 0x1234,
            count: 23,
        };
        assert_eq!(read.request_data(), vec![3, 0x34, 0x12, 23]);

        // Short read: the BMC returned fewer bytes than requested.
        let parsed = read
            .parse_response(ok(vec![0x02, 0xAA, 0xBB]))
            .expect("parse");
        assert_eq!(parsed, vec![0xAA, 0xBB]);
    }

    #[test]
    fn sel_commands_follow_the_storage_tables() {
        assert_eq!(ReserveSel.request_data(), Vec::<u8>::new());
        assert_eq!(
            ReserveSel.parse_response(ok(vec![0x10, 0x20])).unwrap(),
            0x2010
        );

        let get = GetSelEntry { record_id: 0x0102 };
        assert_eq!(get.request_data(), vec![0x00, 0x00, 0x02, 0x01, 0x00, 0xFF]);

        let mut response = vec![0xFF, 0xFF];
        response.extend_from_slice(&[0x11; 16]);
        let step = get.parse_response(ok(response)).expect("parse");
        assert_eq!(step.next_record_id, 0xFFFF);
        assert_eq!(step.record, [0x11; 16]);

        let clear = ClearSel {
            reservation_id: 0x2010,
            initiate: true,
        };
        assert_eq!(
            clear.request_data(),
            vec![0x10, 0x20, b'C', b'L', b'R', 0xAA]
        );
        assert_eq!(
            clear.parse_response(ok(vec![0x01])).unwrap(),
            ErasureStatus::Completed
        );
    }
}
