//! Byte-level framing for RMCP, ASF, and the IPMI v1.5 session layer.
//!
//! Every decoder is a total function from bytes to either a typed frame or a
//! [`DecodeError`]; malformed input never panics and never drives control
//! flow by unwinding.

use crate::error::DecodeError;

pub(crate) const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
pub(crate) const RMCP_SEQ_NO_ACK: u8 = 0xFF;
pub(crate) const RMCP_CLASS_ASF: u8 = 0x06;
pub(crate) const RMCP_CLASS_IPMI: u8 = 0x07;
const RMCP_ACK_BIT: u8 = 0x80;

/// IANA enterprise number carried by ASF messages (ASF-RMCP).
pub(crate) const ASF_IANA: u32 = 4542;
const ASF_TYPE_PING: u8 = 0x80;
const ASF_TYPE_PONG: u8 = 0x40;

/// BMC responder address on the LAN channel.
pub(crate) const BMC_ADDR: u8 = 0x20;

type DecodeResult<T> = Result<T, DecodeError>;

/// A decoded RMCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RmcpMessage {
    /// An RMCP ACK frame (class high bit set, no payload).
    #[allow(dead_code)]
    Ack {
        /// Sequence number being acknowledged.
        sequence: u8,
        /// Class of the acknowledged message.
        class: u8,
    },
    /// An ASF-class data frame.
    Asf {
        /// RMCP sequence number; 0xFF suppresses ACKs.
        sequence: u8,
        /// The ASF message body.
        message: AsfMessage,
    },
    /// An IPMI-class data frame.
    Ipmi {
        /// RMCP sequence number; 0xFF suppresses ACKs.
        sequence: u8,
        /// The IPMI session packet.
        packet: SessionPacket,
    },
}

impl RmcpMessage {
    /// The ACK this frame asks for, if any.
    pub(crate) fn required_ack(&self) -> Option<[u8; 4]> {
        let (sequence, class) = match self {
            RmcpMessage::Ack { .. } => return None,
            RmcpMessage::Asf { sequence, .. } => (*sequence, RMCP_CLASS_ASF),
            RmcpMessage::Ipmi { sequence, .. } => (*sequence, RMCP_CLASS_IPMI),
        };
        if sequence == RMCP_SEQ_NO_ACK {
            return None;
        }
        Some(encode_rmcp_ack(sequence, class))
    }
}

/// A decoded ASF message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AsfMessage {
    /// Presence ping.
    Ping {
        /// Message tag echoed by the pong.
        tag: u8,
    },
    /// Presence pong.
    Pong(Pong),
    /// Any other ASF message type; carried for callers that want to ignore it.
    #[allow(dead_code)]
    Other {
        /// Raw message type.
        message_type: u8,
        /// Message tag.
        tag: u8,
    },
}

/// The payload of an ASF presence pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pong {
    pub(crate) tag: u8,
    #[allow(dead_code)]
    pub(crate) enterprise: u32,
    #[allow(dead_code)]
    pub(crate) oem: u32,
    pub(crate) entities: u8,
    #[allow(dead_code)]
    pub(crate) interactions: u8,
}

impl Pong {
    /// Bit 7 of the supported-entities byte advertises IPMI.
    pub(crate) fn supports_ipmi(&self) -> bool {
        self.entities & 0x80 != 0
    }
}

/// An IPMI v1.5 session packet: header fields plus the LAN message payload.
///
/// The auth code is carried raw; verification is the session's job since it
/// needs the negotiated auth type and password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionPacket {
    pub(crate) auth_type: u8,
    pub(crate) session_seq: u32,
    pub(crate) session_id: u32,
    pub(crate) auth_code: Option<[u8; 16]>,
    pub(crate) payload: Vec<u8>,
}

/// A decoded IPMI LAN response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LanResponse {
    /// Destination (requestor) address from byte 0.
    pub(crate) rq_addr: u8,
    /// Network function (already shifted down; odd for responses).
    pub(crate) netfn: u8,
    /// Responder address.
    #[allow(dead_code)]
    pub(crate) rs_addr: u8,
    /// Requestor sequence number (6-bit).
    pub(crate) rq_seq: u8,
    /// Command number.
    pub(crate) cmd: u8,
    /// Completion code.
    pub(crate) completion_code: u8,
    /// Data bytes after the completion code.
    pub(crate) data: Vec<u8>,
}

/// The standard 2's-complement checksum: `checksum(bytes)` is the byte that
/// makes the running sum of `bytes` plus itself equal 0 mod 256.
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// Build an RMCP ACK for the given sequence/class.
pub(crate) fn encode_rmcp_ack(sequence: u8, class: u8) -> [u8; 4] {
    [RMCP_VERSION, RMCP_RESERVED, sequence, class | RMCP_ACK_BIT]
}

/// Build an ASF presence ping.
pub(crate) fn encode_asf_ping(sequence: u8, tag: u8) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12);
    packet.push(RMCP_VERSION);
    packet.push(RMCP_RESERVED);
    packet.push(sequence);
    packet.push(RMCP_CLASS_ASF);
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.push(ASF_TYPE_PING);
    packet.push(tag);
    packet.push(0x00);
    packet.push(0x00);
    packet
}

/// Wrap a LAN message into an IPMI session packet with RMCP envelope.
///
/// `auth_code` must match `auth_type`: present for every type except none.
pub(crate) fn encode_session_packet(
    auth_type: u8,
    session_seq: u32,
    session_id: u32,
    auth_code: Option<[u8; 16]>,
    payload: &[u8],
) -> Vec<u8> {
    debug_assert!(payload.len() <= u8::MAX as usize);

    let mut packet = Vec::with_capacity(4 + 10 + 16 + payload.len());
    packet.push(RMCP_VERSION);
    packet.push(RMCP_RESERVED);
    packet.push(RMCP_SEQ_NO_ACK);
    packet.push(RMCP_CLASS_IPMI);

    packet.push(auth_type);
    packet.extend_from_slice(&session_seq.to_le_bytes());
    packet.extend_from_slice(&session_id.to_le_bytes());
    if let Some(code) = auth_code {
        packet.extend_from_slice(&code);
    }
    packet.push(payload.len() as u8);
    packet.extend_from_slice(payload);
    packet
}

/// Encode an IPMI LAN request message (LUN 0 on both sides).
pub(crate) fn encode_lan_request(
    netfn: u8,
    cmd: u8,
    rq_addr: u8,
    rq_seq: u8,
    data: &[u8],
) -> Vec<u8> {
    debug_assert!(rq_seq <= 0x3F);

    let netfn_lun = netfn << 2;
    let mut msg = Vec::with_capacity(7 + data.len());
    msg.push(BMC_ADDR);
    msg.push(netfn_lun);
    msg.push(checksum(&[BMC_ADDR, netfn_lun]));

    msg.push(rq_addr);
    msg.push(rq_seq << 2);
    msg.push(cmd);
    msg.extend_from_slice(data);

    let csum2 = checksum(&msg[3..]);
    msg.push(csum2);
    msg
}

/// Decode one UDP datagram into an RMCP frame.
pub(crate) fn decode_rmcp(bytes: &[u8]) -> DecodeResult<RmcpMessage> {
    if bytes.len() < 4 {
        return Err(DecodeError::BadLength);
    }
    if bytes[0] != RMCP_VERSION {
        return Err(DecodeError::BadVersion);
    }

    let sequence = bytes[2];
    let class = bytes[3];

    if class & RMCP_ACK_BIT != 0 {
        // ACK frames are the bare 4-byte header.
        if bytes.len() != 4 {
            return Err(DecodeError::BadLength);
        }
        return Ok(RmcpMessage::Ack {
            sequence,
            class: class & !RMCP_ACK_BIT,
        });
    }

    match class {
        RMCP_CLASS_ASF => Ok(RmcpMessage::Asf {
            sequence,
            message: decode_asf(&bytes[4..])?,
        }),
        RMCP_CLASS_IPMI => Ok(RmcpMessage::Ipmi {
            sequence,
            packet: decode_session_packet(&bytes[4..])?,
        }),
        _ => Err(DecodeError::UnexpectedClass),
    }
}

fn decode_asf(body: &[u8]) -> DecodeResult<AsfMessage> {
    if body.len() < 8 {
        return Err(DecodeError::BadLength);
    }

    let message_type = body[4];
    let tag = body[5];
    let data_len = body[7] as usize;
    let data = body.get(8..8 + data_len).ok_or(DecodeError::BadLength)?;

    match message_type {
        ASF_TYPE_PING => Ok(AsfMessage::Ping { tag }),
        ASF_TYPE_PONG => {
            if data.len() < 16 {
                return Err(DecodeError::BadLength);
            }
            let enterprise = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            let oem = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            Ok(AsfMessage::Pong(Pong {
                tag,
                enterprise,
                oem,
                entities: data[8],
                interactions: data[9],
            }))
        }
        _ => Ok(AsfMessage::Other { message_type, tag }),
    }
}

fn decode_session_packet(body: &[u8]) -> DecodeResult<SessionPacket> {
    if body.len() < 10 {
        return Err(DecodeError::BadLength);
    }

    let auth_type = body[0];
    let session_seq = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
    let session_id = u32::from_le_bytes([body[5], body[6], body[7], body[8]]);

    let (auth_code, rest) = if auth_type == 0x00 {
        (None, &body[9..])
    } else {
        if body.len() < 26 {
            return Err(DecodeError::BadLength);
        }
        let mut code = [0u8; 16];
        code.copy_from_slice(&body[9..25]);
        (Some(code), &body[25..])
    };

    let payload_len = rest[0] as usize;
    let payload = rest.get(1..1 + payload_len).ok_or(DecodeError::BadLength)?;

    Ok(SessionPacket {
        auth_type,
        session_seq,
        session_id,
        auth_code,
        payload: payload.to_vec(),
    })
}

/// Decode and checksum-verify an IPMI LAN response message.
pub(crate) fn decode_lan_response(msg: &[u8]) -> DecodeResult<LanResponse> {
    if msg.len() < 8 {
        return Err(DecodeError::BadLength);
    }

    // Checksum 1 covers the destination/netfn pair; the stored byte makes the
    // running sum zero.
    if msg[0].wrapping_add(msg[1]).wrapping_add(msg[2]) != 0 {
        return Err(DecodeError::BadChecksum);
    }

    // Checksum 2 covers everything from the responder address onward.
    let sum2 = msg[3..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum2 != 0 {
        return Err(DecodeError::BadChecksum);
    }

    Ok(LanResponse {
        rq_addr: msg[0],
        netfn: msg[1] >> 2,
        rs_addr: msg[3],
        rq_seq: msg[4] >> 2,
        cmd: msg[5],
        completion_code: msg[6],
        data: msg[7..msg.len() - 1].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_request_encoding_get_device_id_no_data() {
        let msg = encode_lan_request(0x06, 0x01, 0x81, 0, &[]);
        assert_eq!(msg, vec![0x20, 0x18, 0xC8, 0x81, 0x00, 0x01, 0x7E]);

        // Both checksums zero the running sums.
        assert_eq!(msg[..3].iter().fold(0u8, |a, &b| a.wrapping_add(b)), 0);
        assert_eq!(msg[3..].iter().fold(0u8, |a, &b| a.wrapping_add(b)), 0);
    }

    #[test]
    fn lan_response_decoding_basic() {
        let response = vec![
            0x81, 0x1C, 0x63, // rq_addr, netfn/lun, checksum1
            0x20, 0x08, 0x01, // rs_addr, rq_seq/lun, cmd
            0x00, // completion code
            0x20, 0x01, 0x02, // data
            0xB4, // checksum2
        ];

        let decoded = decode_lan_response(&response).expect("decode");
        assert_eq!(decoded.rq_addr, 0x81);
        assert_eq!(decoded.netfn, 0x07);
        assert_eq!(decoded.rq_seq, 2);
        assert_eq!(decoded.cmd, 0x01);
        assert_eq!(decoded.completion_code, 0x00);
        assert_eq!(decoded.data, vec![0x20, 0x01, 0x02]);
    }

    #[test]
    fn lan_response_decoding_detects_bad_checksums() {
        let mut response = vec![
            0x81, 0x1C, 0x63, 0x20, 0x08, 0x01, 0x00, 0x20, 0x01, 0x02, 0xB4,
        ];
        response[7] ^= 0xFF;
        assert_eq!(
            decode_lan_response(&response),
            Err(DecodeError::BadChecksum)
        );

        let mut response = vec![
            0x81, 0x1C, 0x63, 0x20, 0x08, 0x01, 0x00, 0x20, 0x01, 0x02, 0xB4,
        ];
        response[2] ^= 0x01;
        assert_eq!(
            decode_lan_response(&response),
            Err(DecodeError::BadChecksum)
        );
    }

    #[test]
    fn rmcp_rejects_bad_version_and_class() {
        assert_eq!(
            decode_rmcp(&[0x05, 0x00, 0xFF, 0x07]),
            Err(DecodeError::BadVersion)
        );
        assert_eq!(
            decode_rmcp(&[0x06, 0x00, 0xFF, 0x05]),
            Err(DecodeError::UnexpectedClass)
        );
        assert_eq!(decode_rmcp(&[0x06, 0x00]), Err(DecodeError::BadLength));
    }

    #[test]
    fn rmcp_ack_frames_are_distinguished() {
        let decoded = decode_rmcp(&[0x06, 0x00, 0x42, 0x86]).expect("decode");
        assert_eq!(
            decoded,
            RmcpMessage::Ack {
                sequence: 0x42,
                class: 0x06
            }
        );

        // A trailing payload makes it malformed.
        assert_eq!(
            decode_rmcp(&[0x06, 0x00, 0x42, 0x86, 0x00]),
            Err(DecodeError::BadLength)
        );
    }

    #[test]
    fn asf_ping_round_trips() {
        let ping = encode_asf_ping(0x01, 0x77);
        let decoded = decode_rmcp(&ping).expect("decode");
        assert_eq!(
            decoded,
            RmcpMessage::Asf {
                sequence: 0x01,
                message: AsfMessage::Ping { tag: 0x77 }
            }
        );
        assert_eq!(
            decoded.required_ack(),
            Some([0x06, 0x00, 0x01, 0x86]),
            "non-0xFF sequence requests an ACK"
        );
    }

    #[test]
    fn asf_pong_reports_ipmi_support() {
        let mut pong = vec![0x06, 0x00, 0xFF, 0x06];
        pong.extend_from_slice(&ASF_IANA.to_be_bytes());
        pong.extend_from_slice(&[0x40, 0x77, 0x00, 0x10]);
        pong.extend_from_slice(&ASF_IANA.to_be_bytes());
        pong.extend_from_slice(&[0x00; 4]);
        pong.push(0x81); // supported entities: IPMI + version 1.0
        pong.push(0x00);
        pong.extend_from_slice(&[0x00; 6]);

        let decoded = decode_rmcp(&pong).expect("decode");
        let RmcpMessage::Asf {
            message: AsfMessage::Pong(pong),
            ..
        } = decoded
        else {
            panic!("expected pong");
        };
        assert_eq!(pong.tag, 0x77);
        assert_eq!(pong.enterprise, ASF_IANA);
        assert!(pong.supports_ipmi());

        let no_ipmi = Pong {
            entities: 0x01,
            ..pong
        };
        assert!(!no_ipmi.supports_ipmi());
    }

    #[test]
    fn session_packet_round_trips_byte_for_byte() {
        let lan = encode_lan_request(0x0A, 0x42, 0x81, 5, &[]);

        for auth_code in [None, Some([0xA5u8; 16])] {
            let auth_type = if auth_code.is_some() { 0x02 } else { 0x00 };
            let frame =
                encode_session_packet(auth_type, 0x0102_0304, 0xDEAD_BEEF, auth_code, &lan);

            let decoded = decode_rmcp(&frame).expect("decode");
            let RmcpMessage::Ipmi { sequence, packet } = decoded else {
                panic!("expected ipmi frame");
            };
            assert_eq!(sequence, RMCP_SEQ_NO_ACK);
            assert_eq!(packet.auth_type, auth_type);
            assert_eq!(packet.session_seq, 0x0102_0304);
            assert_eq!(packet.session_id, 0xDEAD_BEEF);
            assert_eq!(packet.auth_code, auth_code);
            assert_eq!(packet.payload, lan);

            let reencoded = encode_session_packet(
                packet.auth_type,
                packet.session_seq,
                packet.session_id,
                packet.auth_code,
                &packet.payload,
            );
            assert_eq!(reencoded, frame);
        }
    }

    #[test]
    fn truncated_session_packets_are_rejected() {
        let lan = encode_lan_request(0x06, 0x01, 0x81, 0, &[]);
        let frame = encode_session_packet(0x00, 1, 0, None, &lan);

        for cut in 1..frame.len() {
            assert_eq!(
                decode_rmcp(&frame[..cut]),
                Err(DecodeError::BadLength),
                "cut at {cut}"
            );
        }
    }
}
