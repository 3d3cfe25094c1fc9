//! System Event Log reader.
//!
//! Reservation, record iteration, and optional clearing follow the storage
//! command tables; 16-byte records decode per the v1.5 event-record layouts.
//! Malformed records are skipped and reported on the event bus, never fatal.

use crate::commands::{ClearSel, GetSelEntry, ReserveSel};
use crate::error::{CompletionCode, Error, Result};
use crate::events::EventKind;
use crate::session::Session;

/// First/last record-id markers used by SEL iteration.
const FIRST_RECORD_ID: u16 = 0x0000;
const LAST_RECORD_ID: u16 = 0xFFFF;

/// One decoded SEL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelEntry {
    /// Record id of the entry.
    pub record_id: u16,
    /// The decoded record body.
    pub record: SelRecord,
}

/// SEL record bodies by record-type range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelRecord {
    /// A standard system event record (type 0x02).
    System(SystemEvent),
    /// OEM record with timestamp (types 0xC0..=0xDF).
    OemTimestamped {
        /// Raw record type.
        record_type: u8,
        /// Seconds since the Unix epoch.
        timestamp: u32,
        /// Manufacturer IANA id (24-bit).
        manufacturer_id: u32,
        /// OEM-defined bytes.
        data: [u8; 6],
    },
    /// OEM record without timestamp (types 0xE0..=0xFF).
    OemNotTimestamped {
        /// Raw record type.
        record_type: u8,
        /// OEM-defined bytes.
        data: [u8; 13],
    },
}

/// A standard system event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEvent {
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    /// Generator id (slave address or software id).
    pub generator_id: u16,
    /// Event message format revision (0x04 for v1.5).
    pub revision: u8,
    /// Sensor type code.
    pub sensor_type: u8,
    /// Sensor number.
    pub sensor_number: u8,
    /// Event/reading type code (7 bits).
    pub event_type: u8,
    /// True for assertion events, false for deassertions.
    pub asserted: bool,
    /// Event data bytes 1..=3.
    pub event_data: [u8; 3],
}

/// Decode one raw 16-byte SEL record.
///
/// Returns `None` for records that do not fit any of the defined layouts
/// (reserved record types).
pub fn decode_entry(raw: &[u8; 16]) -> Option<SelEntry> {
    let record_id = u16::from_le_bytes([raw[0], raw[1]]);
    let record_type = raw[2];

    let record = match record_type {
        0x02 => SelRecord::System(SystemEvent {
            timestamp: u32::from_le_bytes([raw[3], raw[4], raw[5], raw[6]]),
            generator_id: u16::from_le_bytes([raw[7], raw[8]]),
            revision: raw[9],
            sensor_type: raw[10],
            sensor_number: raw[11],
            event_type: raw[12] & 0x7F,
            asserted: raw[12] & 0x80 == 0,
            event_data: [raw[13], raw[14], raw[15]],
        }),
        0xC0..=0xDF => {
            let mut data = [0u8; 6];
            data.copy_from_slice(&raw[10..16]);
            SelRecord::OemTimestamped {
                record_type,
                timestamp: u32::from_le_bytes([raw[3], raw[4], raw[5], raw[6]]),
                manufacturer_id: u32::from(raw[7])
                    | u32::from(raw[8]) << 8
                    | u32::from(raw[9]) << 16,
                data,
            }
        }
        0xE0..=0xFF => {
            let mut data = [0u8; 13];
            data.copy_from_slice(&raw[3..16]);
            SelRecord::OemNotTimestamped { record_type, data }
        }
        _ => return None,
    };

    Some(SelEntry { record_id, record })
}

/// Read the whole SEL; optionally clear it afterwards.
pub(crate) async fn read(session: &Session, clear: bool) -> Result<Vec<SelEntry>> {
    let reservation_id = session.execute(ReserveSel).await?;

    let mut entries = Vec::new();
    let mut record_id = FIRST_RECORD_ID;
    loop {
        let step = match session.execute(GetSelEntry { record_id }).await {
            Ok(step) => step,
            // An empty log has nothing at the first record id.
            Err(Error::Bmc(CompletionCode::RequestedDataNotPresent))
                if record_id == FIRST_RECORD_ID =>
            {
                break;
            }
            Err(err) => return Err(err),
        };

        match decode_entry(&step.record) {
            Some(entry) => entries.push(entry),
            None => session.publish(EventKind::MalformedSelRecord {
                record_id: u16::from_le_bytes([step.record[0], step.record[1]]),
                record_type: step.record[2],
            }),
        }

        if step.next_record_id == LAST_RECORD_ID {
            break;
        }
        record_id = step.next_record_id;
    }

    if clear {
        session
            .execute(ClearSel {
                reservation_id,
                initiate: true,
            })
            .await?;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_system_event() -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0..2].copy_from_slice(&0x00C7u16.to_le_bytes());
        raw[2] = 0x02;
        raw[3..7].copy_from_slice(&1_725_000_000u32.to_le_bytes());
        raw[7..9].copy_from_slice(&0x0020u16.to_le_bytes());
        raw[9] = 0x04;
        raw[10] = 0x0D; // drive slot
        raw[11] = 0x54;
        raw[12] = 0x6F | 0x80; // sensor-specific, deassertion
        raw[13..16].copy_from_slice(&[0xF1, 0xFF, 0xFF]);
        raw
    }

    #[test]
    fn system_event_record_decodes() {
        let entry = decode_entry(&raw_system_event()).expect("decode");
        assert_eq!(entry.record_id, 0x00C7);
        let SelRecord::System(event) = entry.record else {
            panic!("expected system event");
        };
        assert_eq!(event.timestamp, 1_725_000_000);
        assert_eq!(event.generator_id, 0x0020);
        assert_eq!(event.revision, 0x04);
        assert_eq!(event.sensor_type, 0x0D);
        assert_eq!(event.sensor_number, 0x54);
        assert_eq!(event.event_type, 0x6F);
        assert!(!event.asserted);
        assert_eq!(event.event_data, [0xF1, 0xFF, 0xFF]);
    }

    #[test]
    fn oem_timestamped_record_decodes() {
        let mut raw = [0u8; 16];
        raw[0..2].copy_from_slice(&0x0001u16.to_le_bytes());
        raw[2] = 0xC3;
        raw[3..7].copy_from_slice(&42u32.to_le_bytes());
        raw[7..10].copy_from_slice(&[0x57, 0x01, 0x00]); // IANA 0x157
        raw[10..16].copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        let entry = decode_entry(&raw).expect("decode");
        assert_eq!(
            entry.record,
            SelRecord::OemTimestamped {
                record_type: 0xC3,
                timestamp: 42,
                manufacturer_id: 0x157,
                data: [1, 2, 3, 4, 5, 6],
            }
        );
    }

    #[test]
    fn oem_untimestamped_record_decodes() {
        let mut raw = [0u8; 16];
        raw[2] = 0xF0;
        raw[3..16].copy_from_slice(b"kernel panic!");

        let entry = decode_entry(&raw).expect("decode");
        let SelRecord::OemNotTimestamped { record_type, data } = entry.record else {
            panic!("expected oem record");
        };
        assert_eq!(record_type, 0xF0);
        assert_eq!(&data, b"kernel panic!");
    }

    #[test]
    fn reserved_record_types_are_rejected() {
        let mut raw = raw_system_event();
        raw[2] = 0x55;
        assert_eq!(decode_entry(&raw), None);
    }
}
