use core::fmt;
use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Operation on a handle with no live session.
    #[error("no live session")]
    NoSession,

    /// Request had no response within the deadline.
    #[error("timeout waiting for response")]
    Timeout,

    /// The BMC returned a non-zero completion code.
    #[error("bmc error: {0}")]
    Bmc(CompletionCode),

    /// A received RMCP/IPMI frame was malformed.
    #[error("decode error: {0}")]
    Decode(DecodeError),

    /// Session setup was rejected by the BMC.
    #[error("authentication failed during {step}")]
    Auth {
        /// The setup step that failed.
        step: SetupStep,
    },

    /// Socket send/recv failed while the session was active.
    #[error("transport error: {0}")]
    Transport(&'static str),

    /// FRU data this crate cannot interpret (local, non-fatal to the session).
    #[error("unsupported fru data: {0}")]
    UnsupportedFruData(&'static str),

    /// The FRU common header checksum did not verify (local, non-fatal to the session).
    #[error("incorrect fru header checksum")]
    IncorrectHeaderChecksum,

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Peer responded with an unexpected or structurally invalid message.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

/// Structural reason a frame failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A LAN message or auth-code checksum did not verify.
    BadChecksum,
    /// The buffer was shorter than its headers claim.
    BadLength,
    /// The RMCP version byte was not 0x06.
    BadVersion,
    /// The RMCP class was neither ASF nor IPMI.
    UnexpectedClass,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeError::BadChecksum => "bad_checksum",
            DecodeError::BadLength => "bad_length",
            DecodeError::BadVersion => "bad_version",
            DecodeError::UnexpectedClass => "unexpected_class",
        };
        f.write_str(name)
    }
}

/// The session-setup state a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// Get Channel Authentication Capabilities.
    AuthCap,
    /// Get Session Challenge.
    Challenge,
    /// Activate Session.
    Activate,
    /// Set Session Privilege Level.
    SetPrivilege,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStep::AuthCap => "authentication capability discovery",
            SetupStep::Challenge => "session challenge",
            SetupStep::Activate => "session activation",
            SetupStep::SetPrivilege => "privilege escalation",
        };
        f.write_str(name)
    }
}

/// A non-zero IPMI completion code, named per the completion-code table.
///
/// Codes the generic table does not name (including command-specific codes)
/// are kept as [`CompletionCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    /// 0xC0: node busy.
    NodeBusy,
    /// 0xC1: invalid command.
    InvalidCommand,
    /// 0xC2: command invalid for the given LUN.
    InvalidCommandForLun,
    /// 0xC3: timeout while processing the command.
    ProcessingTimeout,
    /// 0xC4: out of storage space.
    OutOfSpace,
    /// 0xC5: reservation cancelled or invalid reservation id.
    ReservationCancelled,
    /// 0xC6: request data truncated.
    RequestDataTruncated,
    /// 0xC7: request data length invalid.
    RequestDataLengthInvalid,
    /// 0xC8: request data field length limit exceeded.
    RequestDataLengthLimitExceeded,
    /// 0xC9: parameter out of range.
    ParameterOutOfRange,
    /// 0xCA: cannot return the number of requested data bytes.
    CannotReturnRequestedBytes,
    /// 0xCB: requested sensor, data, or record not present.
    RequestedDataNotPresent,
    /// 0xCC: invalid data field in request.
    InvalidDataField,
    /// 0xCD: command illegal for the specified sensor or record type.
    CommandIllegalForSensor,
    /// 0xCE: command response could not be provided.
    ResponseNotProvided,
    /// 0xCF: cannot execute a duplicated request.
    DuplicatedRequest,
    /// 0xD0: SDR repository in update mode.
    SdrRepositoryInUpdate,
    /// 0xD1: device in firmware update mode.
    FirmwareInUpdate,
    /// 0xD2: BMC initialization in progress.
    BmcInitialization,
    /// 0xD3: destination unavailable.
    DestinationUnavailable,
    /// 0xD4: insufficient privilege level.
    InsufficientPrivilege,
    /// 0xD5: command not supported in present state.
    NotSupportedInPresentState,
    /// 0xD6: command sub-function disabled or unavailable.
    SubFunctionDisabled,
    /// 0xFF: unspecified error.
    Unspecified,
    /// Any code the generic table does not name.
    Other(u8),
}

impl CompletionCode {
    /// Map a raw non-zero completion code to its mnemonic.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0xC0 => CompletionCode::NodeBusy,
            0xC1 => CompletionCode::InvalidCommand,
            0xC2 => CompletionCode::InvalidCommandForLun,
            0xC3 => CompletionCode::ProcessingTimeout,
            0xC4 => CompletionCode::OutOfSpace,
            0xC5 => CompletionCode::ReservationCancelled,
            0xC6 => CompletionCode::RequestDataTruncated,
            0xC7 => CompletionCode::RequestDataLengthInvalid,
            0xC8 => CompletionCode::RequestDataLengthLimitExceeded,
            0xC9 => CompletionCode::ParameterOutOfRange,
            0xCA => CompletionCode::CannotReturnRequestedBytes,
            0xCB => CompletionCode::RequestedDataNotPresent,
            0xCC => CompletionCode::InvalidDataField,
            0xCD => CompletionCode::CommandIllegalForSensor,
            0xCE => CompletionCode::ResponseNotProvided,
            0xCF => CompletionCode::DuplicatedRequest,
            0xD0 => CompletionCode::SdrRepositoryInUpdate,
            0xD1 => CompletionCode::FirmwareInUpdate,
            0xD2 => CompletionCode::BmcInitialization,
            0xD3 => CompletionCode::DestinationUnavailable,
            0xD4 => CompletionCode::InsufficientPrivilege,
            0xD5 => CompletionCode::NotSupportedInPresentState,
            0xD6 => CompletionCode::SubFunctionDisabled,
            0xFF => CompletionCode::Unspecified,
            other => CompletionCode::Other(other),
        }
    }

    /// The raw completion-code byte.
    pub fn as_u8(&self) -> u8 {
        match self {
            CompletionCode::NodeBusy => 0xC0,
            CompletionCode::InvalidCommand => 0xC1,
            CompletionCode::InvalidCommandForLun => 0xC2,
            CompletionCode::ProcessingTimeout => 0xC3,
            CompletionCode::OutOfSpace => 0xC4,
            CompletionCode::ReservationCancelled => 0xC5,
            CompletionCode::RequestDataTruncated => 0xC6,
            CompletionCode::RequestDataLengthInvalid => 0xC7,
            CompletionCode::RequestDataLengthLimitExceeded => 0xC8,
            CompletionCode::ParameterOutOfRange => 0xC9,
            CompletionCode::CannotReturnRequestedBytes => 0xCA,
            CompletionCode::RequestedDataNotPresent => 0xCB,
            CompletionCode::InvalidDataField => 0xCC,
            CompletionCode::CommandIllegalForSensor => 0xCD,
            CompletionCode::ResponseNotProvided => 0xCE,
            CompletionCode::DuplicatedRequest => 0xCF,
            CompletionCode::SdrRepositoryInUpdate => 0xD0,
            CompletionCode::FirmwareInUpdate => 0xD1,
            CompletionCode::BmcInitialization => 0xD2,
            CompletionCode::DestinationUnavailable => 0xD3,
            CompletionCode::InsufficientPrivilege => 0xD4,
            CompletionCode::NotSupportedInPresentState => 0xD5,
            CompletionCode::SubFunctionDisabled => 0xD6,
            CompletionCode::Unspecified => 0xFF,
            CompletionCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionCode::NodeBusy => "node_busy",
            CompletionCode::InvalidCommand => "invalid_command",
            CompletionCode::InvalidCommandForLun => "invalid_command_for_lun",
            CompletionCode::ProcessingTimeout => "processing_timeout",
            CompletionCode::OutOfSpace => "out_of_space",
            CompletionCode::ReservationCancelled => "reservation_cancelled",
            CompletionCode::RequestDataTruncated => "request_data_truncated",
            CompletionCode::RequestDataLengthInvalid => "request_data_length_invalid",
            CompletionCode::RequestDataLengthLimitExceeded => {
                "request_data_length_limit_exceeded"
            }
            CompletionCode::ParameterOutOfRange => "parameter_out_of_range",
            CompletionCode::CannotReturnRequestedBytes => "cannot_return_requested_bytes",
            CompletionCode::RequestedDataNotPresent => "requested_data_not_present",
            CompletionCode::InvalidDataField => "invalid_data_field",
            CompletionCode::CommandIllegalForSensor => "command_illegal_for_sensor",
            CompletionCode::ResponseNotProvided => "response_not_provided",
            CompletionCode::DuplicatedRequest => "duplicated_request",
            CompletionCode::SdrRepositoryInUpdate => "sdr_repository_in_update",
            CompletionCode::FirmwareInUpdate => "firmware_in_update",
            CompletionCode::BmcInitialization => "bmc_initialization",
            CompletionCode::DestinationUnavailable => "destination_unavailable",
            CompletionCode::InsufficientPrivilege => "insufficient_privilege",
            CompletionCode::NotSupportedInPresentState => "not_supported_in_present_state",
            CompletionCode::SubFunctionDisabled => "sub_function_disabled",
            CompletionCode::Unspecified => "unspecified",
            CompletionCode::Other(code) => return write!(f, "{code:#04x}"),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_code_round_trips() {
        for raw in 0xC0..=0xD6u8 {
            assert_eq!(CompletionCode::from_u8(raw).as_u8(), raw);
        }
        assert_eq!(CompletionCode::from_u8(0xFF), CompletionCode::Unspecified);
        assert_eq!(CompletionCode::from_u8(0x81), CompletionCode::Other(0x81));
        assert_eq!(CompletionCode::Other(0x81).as_u8(), 0x81);
    }

    #[test]
    fn completion_code_mnemonics() {
        assert_eq!(
            CompletionCode::ParameterOutOfRange.to_string(),
            "parameter_out_of_range"
        );
        assert_eq!(CompletionCode::Other(0x81).to_string(), "0x81");
    }

    #[test]
    fn decode_error_reasons() {
        assert_eq!(DecodeError::BadChecksum.to_string(), "bad_checksum");
        assert_eq!(DecodeError::UnexpectedClass.to_string(), "unexpected_class");
    }
}
