//! FRU inventory reader.
//!
//! Reads the inventory area in chunks over the session, then decodes the
//! common header, the chassis/board/product info areas, and the multi-record
//! area. Checksum validation is lenient per area: a corrupt chassis area does
//! not take the board area down with it.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::commands::{GetFruAreaInfo, ReadFruData};
use crate::error::{CompletionCode, Error, Result};
use crate::session::Session;

/// The LAN message layer caps a message at 32 bytes; 23 bytes of FRU data per
/// read is what is left after framing.
const MAX_READ_BLOCK: u16 = 23;

/// Seconds between the Unix epoch and 1996-01-01 00:00 GMT, the FRU
/// manufacturing-date epoch.
const FRU_EPOCH_UNIX_SECS: u64 = 820_454_400;

/// English language codes use 8-bit ASCII + Latin-1 for text fields; every
/// other language uses UTF-16LE.
fn language_is_english(code: u8) -> bool {
    code == 0 || code == 25
}

/// One type/length-encoded FRU field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FruField {
    /// Text decoded from BCD-plus, 6-bit packed ASCII, or the
    /// language-dependent text encoding.
    Text(String),
    /// Unspecified binary data.
    Binary(Vec<u8>),
}

impl FruField {
    /// The field's text, if it decoded as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FruField::Text(text) => Some(text),
            FruField::Binary(_) => None,
        }
    }
}

/// A decoded FRU inventory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FruInventory {
    /// Chassis info area, when present and checksum-valid.
    pub chassis: Option<ChassisArea>,
    /// Board info area, when present and checksum-valid.
    pub board: Option<BoardArea>,
    /// Product info area, when present and checksum-valid.
    pub product: Option<ProductArea>,
    /// Multi-record area records in chain order.
    pub multi_records: Vec<MultiRecord>,
}

/// Chassis info area.
#[derive(Debug, Clone, PartialEq)]
pub struct ChassisArea {
    /// Chassis type per the SMBIOS enumeration.
    pub chassis_type: u8,
    /// Chassis part number.
    pub part_number: Option<FruField>,
    /// Chassis serial number.
    pub serial: Option<FruField>,
    /// Custom fields in reading order.
    pub custom: Vec<FruField>,
}

/// Board info area.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardArea {
    /// Language code for text fields.
    pub language: u8,
    /// Manufacturing date in minutes since 1996-01-01 00:00 GMT.
    pub manufacturing_date: u32,
    /// Board manufacturer.
    pub manufacturer: Option<FruField>,
    /// Board product name.
    pub name: Option<FruField>,
    /// Board serial number.
    pub serial: Option<FruField>,
    /// Board part number.
    pub part_number: Option<FruField>,
    /// FRU file id.
    pub fru_file_id: Option<FruField>,
    /// Custom fields in reading order.
    pub custom: Vec<FruField>,
}

impl BoardArea {
    /// The manufacturing date as wall-clock time.
    pub fn manufactured_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH
            + Duration::from_secs(FRU_EPOCH_UNIX_SECS + u64::from(self.manufacturing_date) * 60)
    }
}

/// Product info area.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductArea {
    /// Language code for text fields.
    pub language: u8,
    /// Product manufacturer.
    pub manufacturer: Option<FruField>,
    /// Product name.
    pub name: Option<FruField>,
    /// Product part/model number.
    pub part_number: Option<FruField>,
    /// Product version.
    pub version: Option<FruField>,
    /// Product serial number.
    pub serial: Option<FruField>,
    /// Asset tag.
    pub asset_tag: Option<FruField>,
    /// FRU file id.
    pub fru_file_id: Option<FruField>,
    /// Custom fields in reading order.
    pub custom: Vec<FruField>,
}

/// A decoded multi-record area record.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiRecord {
    /// Power supply information (type 0x00).
    PowerSupply(PowerSupplyRecord),
    /// DC output (type 0x01).
    DcOutput(DcOutputRecord),
    /// DC load (type 0x02).
    DcLoad(DcLoadRecord),
    /// Management access (type 0x03).
    ManagementAccess(ManagementAccessRecord),
    /// Base compatibility (type 0x04).
    BaseCompatibility(CompatibilityRecord),
    /// Extended compatibility (type 0x05).
    ExtendedCompatibility(CompatibilityRecord),
    /// OEM record decoded by a registered decoder.
    Oem(OemRecord),
}

/// Power supply information record.
///
/// Sentinel values (0, 0xFF, 0xFFFF) decode to `None`. Voltages are volts,
/// currents amps.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSupplyRecord {
    /// Overall capacity in watts.
    pub overall_capacity: Option<u16>,
    /// Peak VA.
    pub peak_va: Option<u16>,
    /// Inrush current in amps.
    pub inrush_current: Option<u8>,
    /// Inrush interval in milliseconds.
    pub inrush_interval_ms: Option<u8>,
    /// Low end of input voltage range 1.
    pub low_input_voltage1: Option<f32>,
    /// High end of input voltage range 1.
    pub high_input_voltage1: Option<f32>,
    /// Low end of input voltage range 2.
    pub low_input_voltage2: Option<f32>,
    /// High end of input voltage range 2.
    pub high_input_voltage2: Option<f32>,
    /// Low end of input frequency range in Hz.
    pub low_input_frequency: Option<u8>,
    /// High end of input frequency range in Hz.
    pub high_input_frequency: Option<u8>,
    /// AC dropout tolerance in milliseconds.
    pub ac_dropout_tolerance_ms: Option<u8>,
    /// The supply reports predictive failure.
    pub predictive_fail_support: bool,
    /// Power factor correction.
    pub power_factor_correction: bool,
    /// Autoswitch input.
    pub autoswitch: bool,
    /// Hot-swappable.
    pub hot_swappable: bool,
    /// Peak wattage.
    pub peak_wattage: Option<u16>,
    /// Hold-up time at peak wattage in seconds.
    pub hold_up_time_s: Option<u8>,
    /// Combined wattage voltage pair, in volts.
    pub combined_voltages: Option<(f32, f32)>,
    /// Total combined wattage.
    pub total_combined_wattage: Option<u16>,
    /// Predictive-fail tachometer lower threshold in RPS.
    pub predictive_fail_tachometer_lower_threshold: Option<u8>,
}

/// DC output record.
#[derive(Debug, Clone, PartialEq)]
pub struct DcOutputRecord {
    /// Output number within the supply.
    pub output_number: u8,
    /// The output is a standby output.
    pub standby: bool,
    /// Nominal voltage in volts.
    pub nominal_voltage: Option<f32>,
    /// Maximum negative voltage deviation in volts.
    pub max_negative_deviation: Option<f32>,
    /// Maximum positive voltage deviation in volts.
    pub max_positive_deviation: Option<f32>,
    /// Ripple and noise peak-to-peak in volts.
    pub ripple: Option<f32>,
    /// Minimum current draw in amps.
    pub min_current: Option<f32>,
    /// Maximum current draw in amps.
    pub max_current: Option<f32>,
}

/// DC load record.
#[derive(Debug, Clone, PartialEq)]
pub struct DcLoadRecord {
    /// Output number the load draws from.
    pub output_number: u8,
    /// Nominal voltage in volts.
    pub nominal_voltage: Option<f32>,
    /// Specified minimum voltage in volts.
    pub min_voltage: Option<f32>,
    /// Specified maximum voltage in volts.
    pub max_voltage: Option<f32>,
    /// Ripple and noise peak-to-peak in volts.
    pub ripple: Option<f32>,
    /// Minimum current load in amps.
    pub min_current: Option<f32>,
    /// Maximum current load in amps.
    pub max_current: Option<f32>,
}

/// Management access record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementAccessRecord {
    /// System management URL.
    SystemManagementUrl(String),
    /// System name.
    SystemName(String),
    /// System ping address.
    SystemPingAddress(String),
    /// Component management URL.
    ComponentManagementUrl(String),
    /// Component name.
    ComponentName(String),
    /// Component ping address.
    ComponentPingAddress(String),
    /// System unique id.
    SystemUniqueId(Vec<u8>),
}

/// Base or extended compatibility record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityRecord {
    /// Manufacturer IANA id (24-bit).
    pub manufacturer_id: u32,
    /// Entity id the codes apply to.
    pub entity_id: u8,
    /// Compatibility base.
    pub compatibility_base: u8,
    /// Sorted compatibility codes expanded from the code-range bitmap,
    /// starting at the record's code start.
    pub compatible_codes: Vec<u16>,
}

/// An OEM multi-record decoded by a decoder registered in
/// [`FruDecodeOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OemRecord {
    /// Record type the decoder was registered for.
    pub record_type: u8,
    /// Decoder-defined record name.
    pub name: String,
    /// Decoder-defined fields in reading order.
    pub fields: Vec<(String, String)>,
}

/// A decoder for one OEM multi-record type.
pub type OemRecordDecoder = fn(&[u8]) -> Option<OemRecord>;

/// Decode options for [`Session::read_fru_with`].
///
/// Multi-record types outside the standard set are silently dropped unless a
/// decoder is registered for them here.
#[derive(Debug, Clone, Default)]
pub struct FruDecodeOptions {
    oem: HashMap<u8, OemRecordDecoder>,
}

impl FruDecodeOptions {
    /// Options with no OEM decoders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for an OEM record type.
    pub fn with_oem_decoder(mut self, record_type: u8, decoder: OemRecordDecoder) -> Self {
        self.oem.insert(record_type, decoder);
        self
    }
}

/// Read and decode the inventory of `fru_id` over `session`.
///
/// Returns `None` when the BMC reports the FRU id out of range.
pub(crate) async fn read(
    session: &Session,
    fru_id: u8,
    options: &FruDecodeOptions,
) -> Result<Option<FruInventory>> {
    let info = match session.execute(GetFruAreaInfo { fru_id }).await {
        Ok(info) => info,
        Err(Error::Bmc(CompletionCode::ParameterOutOfRange)) => return Ok(None),
        Err(err) => return Err(err),
    };

    // Word-access devices count size, offset, and block in 16-bit words.
    let unit: u16 = if info.by_words { 2 } else { 1 };
    let block_units = MAX_READ_BLOCK / unit;

    let mut data = Vec::with_capacity(usize::from(info.size) * usize::from(unit));
    let mut offset: u16 = 0;
    while offset < info.size {
        let count = (info.size - offset).min(block_units) as u8;
        let chunk = session
            .execute(ReadFruData {
                fru_id,
                offset,
                count,
            })
            .await?;
        if chunk.is_empty() {
            return Err(Error::Protocol("fru read returned no data"));
        }

        // The BMC may return fewer units than requested; advance by what
        // actually came back.
        let returned_units = (chunk.len() as u16).div_ceil(unit);
        offset += returned_units;
        data.extend_from_slice(&chunk);
    }

    decode_inventory(&data, options).map(Some)
}

/// Decode a complete FRU inventory buffer.
pub fn decode_inventory(data: &[u8], options: &FruDecodeOptions) -> Result<FruInventory> {
    let header = data
        .get(..8)
        .ok_or(Error::UnsupportedFruData("truncated common header"))?;
    if header[0] & 0x0F != 0x01 {
        return Err(Error::UnsupportedFruData("unknown common header version"));
    }
    if !sum_is_zero(header) {
        return Err(Error::IncorrectHeaderChecksum);
    }

    // Area offsets in header order: internal use, chassis, board, product,
    // multi-record. Each area runs to the next one by offset, or to the end
    // of the buffer.
    let mut areas: Vec<(usize, usize)> = header[1..6]
        .iter()
        .enumerate()
        .filter(|(_, &offset)| offset != 0)
        .map(|(slot, &offset)| (slot, usize::from(offset) * 8))
        .collect();
    areas.sort_by_key(|&(_, start)| start);

    let mut inventory = FruInventory::default();
    for (position, &(slot, start)) in areas.iter().enumerate() {
        let end = areas
            .get(position + 1)
            .map(|&(_, next_start)| next_start)
            .unwrap_or(data.len())
            .min(data.len());
        if start >= end {
            continue;
        }
        let area = &data[start..end];
        match slot {
            0 => {} // internal use area: opaque
            1 => inventory.chassis = decode_chassis(area),
            2 => inventory.board = decode_board(area),
            3 => inventory.product = decode_product(area),
            4 => inventory.multi_records = decode_multi_records(area, options),
            _ => unreachable!("five header offsets"),
        }
    }
    Ok(inventory)
}

/// Trim an info area to its declared length and validate version and
/// checksum. Bad areas decode to `None` without affecting their siblings.
fn info_area(area: &[u8]) -> Option<&[u8]> {
    let declared = usize::from(*area.get(1)?) * 8;
    let body = area.get(..declared)?;
    if body.len() < 3 || body[0] & 0x0F != 0x01 {
        return None;
    }
    if !sum_is_zero(body) {
        return None;
    }
    Some(body)
}

fn decode_chassis(area: &[u8]) -> Option<ChassisArea> {
    let body = info_area(area)?;
    let chassis_type = body[2];
    // Chassis text fields are language-independent (always English).
    let mut fields = FieldReader::new(&body[3..], 0);
    Some(ChassisArea {
        chassis_type,
        part_number: fields.next_field(),
        serial: fields.next_field(),
        custom: fields.remaining(),
    })
}

fn decode_board(area: &[u8]) -> Option<BoardArea> {
    let body = info_area(area)?;
    if body.len() < 6 {
        return None;
    }
    let language = body[2];
    let manufacturing_date = u32::from(body[3]) | u32::from(body[4]) << 8 | u32::from(body[5]) << 16;
    let mut fields = FieldReader::new(&body[6..], language);
    Some(BoardArea {
        language,
        manufacturing_date,
        manufacturer: fields.next_field(),
        name: fields.next_field(),
        serial: fields.next_field(),
        part_number: fields.next_field(),
        fru_file_id: fields.next_field(),
        custom: fields.remaining(),
    })
}

fn decode_product(area: &[u8]) -> Option<ProductArea> {
    let body = info_area(area)?;
    let language = body[2];
    let mut fields = FieldReader::new(&body[3..], language);
    Some(ProductArea {
        language,
        manufacturer: fields.next_field(),
        name: fields.next_field(),
        part_number: fields.next_field(),
        version: fields.next_field(),
        serial: fields.next_field(),
        asset_tag: fields.next_field(),
        fru_file_id: fields.next_field(),
        custom: fields.remaining(),
    })
}

/// Sequential reader over a type/length-encoded field list.
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
    language: u8,
    done: bool,
}

/// End-of-fields sentinel: type 3, length 1.
const FIELD_SENTINEL: u8 = 0xC1;

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8], language: u8) -> Self {
        Self {
            data,
            pos: 0,
            language,
            done: false,
        }
    }

    /// Decode the next field. `None` for a zero-length (present but empty)
    /// field, and for everything once the sentinel or the end of the buffer
    /// is reached.
    fn next_field(&mut self) -> Option<FruField> {
        if self.done {
            return None;
        }
        let Some(&type_length) = self.data.get(self.pos) else {
            self.done = true;
            return None;
        };
        if type_length == FIELD_SENTINEL {
            self.pos += 1;
            self.done = true;
            return None;
        }
        self.pos += 1;

        let field_type = type_length >> 6;
        let length = usize::from(type_length & 0x3F);
        let Some(raw) = self.data.get(self.pos..self.pos + length) else {
            self.done = true;
            return None;
        };
        self.pos += length;

        if length == 0 {
            return None;
        }
        Some(decode_field(field_type, raw, self.language))
    }

    /// Collect the remaining fields (used for the custom-field tail).
    fn remaining(&mut self) -> Vec<FruField> {
        let mut fields = Vec::new();
        while !self.done {
            if let Some(field) = self.next_field() {
                fields.push(field);
            }
        }
        fields
    }

    #[cfg(test)]
    fn consumed(&self) -> usize {
        self.pos
    }
}

fn decode_field(field_type: u8, raw: &[u8], language: u8) -> FruField {
    match field_type {
        0 => FruField::Binary(raw.to_vec()),
        1 => FruField::Text(decode_bcd_plus(raw)),
        2 => FruField::Text(decode_packed_ascii(raw)),
        _ if language_is_english(language) => {
            // 8-bit ASCII + Latin-1 maps byte-for-byte onto the first Unicode
            // block.
            FruField::Text(raw.iter().map(|&b| char::from(b)).collect())
        }
        _ => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            FruField::Text(String::from_utf16_lossy(&units))
        }
    }
}

fn decode_bcd_plus(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for &byte in raw {
        for nibble in [byte & 0x0F, byte >> 4] {
            out.push(match nibble {
                0x0..=0x9 => char::from(b'0' + nibble),
                0xA => ' ',
                0xB => '-',
                0xC => '.',
                _ => '?',
            });
        }
    }
    out
}

fn decode_packed_ascii(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 4 / 3 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &byte in raw {
        acc |= u32::from(byte) << bits;
        bits += 8;
        while bits >= 6 {
            out.push(char::from((acc & 0x3F) as u8 + 0x20));
            acc >>= 6;
            bits -= 6;
        }
    }
    out
}

fn decode_multi_records(area: &[u8], options: &FruDecodeOptions) -> Vec<MultiRecord> {
    let mut records = Vec::new();
    let mut pos = 0;
    loop {
        let Some(header) = area.get(pos..pos + 5) else {
            break;
        };
        // A bad header checksum abandons the chain: the length field cannot
        // be trusted to find the next record.
        if !sum_is_zero(header) {
            break;
        }
        let record_type = header[0];
        let end_of_list = header[1] & 0x80 != 0;
        let length = usize::from(header[2]);
        let Some(payload) = area.get(pos + 5..pos + 5 + length) else {
            break;
        };
        pos += 5 + length;

        // Payload checksum: sum of payload plus the stored byte is zero.
        let payload_sum = payload
            .iter()
            .fold(header[3], |acc, &b| acc.wrapping_add(b));
        if payload_sum == 0 {
            if let Some(record) = decode_record(record_type, payload, options) {
                records.push(record);
            }
        }

        if end_of_list {
            break;
        }
    }
    records
}

fn decode_record(
    record_type: u8,
    payload: &[u8],
    options: &FruDecodeOptions,
) -> Option<MultiRecord> {
    match record_type {
        0x00 => decode_power_supply(payload).map(MultiRecord::PowerSupply),
        0x01 => decode_dc_output(payload).map(MultiRecord::DcOutput),
        0x02 => decode_dc_load(payload).map(MultiRecord::DcLoad),
        0x03 => decode_management_access(payload).map(MultiRecord::ManagementAccess),
        0x04 => decode_compatibility(payload).map(MultiRecord::BaseCompatibility),
        0x05 => decode_compatibility(payload).map(MultiRecord::ExtendedCompatibility),
        other => {
            let decoder = options.oem.get(&other)?;
            decoder(payload).map(MultiRecord::Oem)
        }
    }
}

fn u8_opt(raw: u8) -> Option<u8> {
    (raw != 0 && raw != 0xFF).then_some(raw)
}

fn u16_opt(raw: u16) -> Option<u16> {
    (raw != 0 && raw != 0xFFFF).then_some(raw)
}

/// 10 mV units to volts, signed, with sentinel handling.
fn volts(raw: u16) -> Option<f32> {
    u16_opt(raw).map(|v| f32::from(v as i16) / 100.0)
}

/// 1 mA units to amps, with sentinel handling.
fn amps(raw: u16) -> Option<f32> {
    u16_opt(raw).map(|v| f32::from(v) / 1000.0)
}

/// 1 mV units to volts, with sentinel handling.
fn millivolts(raw: u16) -> Option<f32> {
    u16_opt(raw).map(|v| f32::from(v) / 1000.0)
}

fn le16(payload: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([payload[at], payload[at + 1]])
}

/// Combined-wattage voltage nibble values, in volts.
fn combined_voltage(nibble: u8) -> Option<f32> {
    match nibble {
        0x0 => Some(12.0),
        0x1 => Some(-12.0),
        0x2 => Some(5.0),
        0x3 => Some(3.3),
        _ => None,
    }
}

fn decode_power_supply(payload: &[u8]) -> Option<PowerSupplyRecord> {
    if payload.len() < 24 {
        return None;
    }

    let flags = payload[17];
    let peak = le16(payload, 18);
    let hold_up = (peak >> 12) as u8;
    let combined = payload[20];

    Some(PowerSupplyRecord {
        overall_capacity: u16_opt(le16(payload, 0) & 0x0FFF),
        peak_va: u16_opt(le16(payload, 2)),
        inrush_current: u8_opt(payload[4]),
        inrush_interval_ms: u8_opt(payload[5]),
        low_input_voltage1: volts(le16(payload, 6)),
        high_input_voltage1: volts(le16(payload, 8)),
        low_input_voltage2: volts(le16(payload, 10)),
        high_input_voltage2: volts(le16(payload, 12)),
        low_input_frequency: u8_opt(payload[14]),
        high_input_frequency: u8_opt(payload[15]),
        ac_dropout_tolerance_ms: u8_opt(payload[16]),
        predictive_fail_support: flags & 0x01 != 0,
        power_factor_correction: flags & 0x02 != 0,
        autoswitch: flags & 0x04 != 0,
        hot_swappable: flags & 0x08 != 0,
        peak_wattage: u16_opt(peak & 0x0FFF),
        hold_up_time_s: u8_opt(hold_up),
        combined_voltages: combined_voltage(combined >> 4)
            .zip(combined_voltage(combined & 0x0F)),
        total_combined_wattage: u16_opt(le16(payload, 21)),
        predictive_fail_tachometer_lower_threshold: u8_opt(payload[23]),
    })
}

fn decode_dc_output(payload: &[u8]) -> Option<DcOutputRecord> {
    if payload.len() < 13 {
        return None;
    }
    Some(DcOutputRecord {
        output_number: payload[0] & 0x0F,
        standby: payload[0] & 0x80 != 0,
        nominal_voltage: volts(le16(payload, 1)),
        max_negative_deviation: volts(le16(payload, 3)),
        max_positive_deviation: volts(le16(payload, 5)),
        ripple: millivolts(le16(payload, 7)),
        min_current: amps(le16(payload, 9)),
        max_current: amps(le16(payload, 11)),
    })
}

fn decode_dc_load(payload: &[u8]) -> Option<DcLoadRecord> {
    if payload.len() < 13 {
        return None;
    }
    Some(DcLoadRecord {
        output_number: payload[0] & 0x0F,
        nominal_voltage: volts(le16(payload, 1)),
        min_voltage: volts(le16(payload, 3)),
        max_voltage: volts(le16(payload, 5)),
        ripple: millivolts(le16(payload, 7)),
        min_current: amps(le16(payload, 9)),
        max_current: amps(le16(payload, 11)),
    })
}

fn decode_management_access(payload: &[u8]) -> Option<ManagementAccessRecord> {
    let (&sub_type, data) = payload.split_first()?;
    let text = || data.iter().map(|&b| char::from(b)).collect::<String>();
    match sub_type {
        0x01 => Some(ManagementAccessRecord::SystemManagementUrl(text())),
        0x02 => Some(ManagementAccessRecord::SystemName(text())),
        0x03 => Some(ManagementAccessRecord::SystemPingAddress(text())),
        0x04 => Some(ManagementAccessRecord::ComponentManagementUrl(text())),
        0x05 => Some(ManagementAccessRecord::ComponentName(text())),
        0x06 => Some(ManagementAccessRecord::ComponentPingAddress(text())),
        0x07 => Some(ManagementAccessRecord::SystemUniqueId(data.to_vec())),
        _ => None,
    }
}

fn decode_compatibility(payload: &[u8]) -> Option<CompatibilityRecord> {
    if payload.len() < 6 {
        return None;
    }
    let manufacturer_id =
        u32::from(payload[0]) | u32::from(payload[1]) << 8 | u32::from(payload[2]) << 16;
    let code_start = u16::from(payload[5] & 0x7F);

    // The range mask enumerates bits MSB-first within each byte; each set bit
    // i contributes code_start + (i div 8) * 8 + (8 - i mod 8), and the code
    // start itself is always compatible.
    let mut codes = vec![code_start];
    for (byte_index, &byte) in payload[6..].iter().enumerate() {
        for bit in 0..8u16 {
            if byte & (0x80 >> bit) != 0 {
                let i = byte_index as u16 * 8 + bit;
                codes.push(code_start + (i / 8) * 8 + (8 - i % 8));
            }
        }
    }
    codes.sort_unstable();
    codes.dedup();

    Some(CompatibilityRecord {
        manufacturer_id,
        entity_id: payload[3],
        compatibility_base: payload[4],
        compatible_codes: codes,
    })
}

fn sum_is_zero(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Append the byte that zeroes the running sum of `bytes`.
    fn close_checksum(bytes: &mut Vec<u8>) {
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        bytes.push((!sum).wrapping_add(1));
    }

    fn common_header(offsets: [u8; 5]) -> Vec<u8> {
        let mut header = vec![0x01];
        header.extend_from_slice(&offsets);
        header.push(0x00);
        close_checksum(&mut header);
        header
    }

    /// Build a board area: language 25, date 1, fields "ACME" and "X42".
    fn sample_board_area() -> Vec<u8> {
        let mut area = vec![
            0x01, 0x03, // version, length 3 * 8 = 24
            25,   // language: English
            0x01, 0x00, 0x00, // manufacturing date: 1 minute past the epoch
            0xC4, b'A', b'C', b'M', b'E', // manufacturer
            0xC3, b'X', b'4', b'2', // name
            0xC1, // sentinel
        ];
        while area.len() < 23 {
            area.push(0x00);
        }
        close_checksum(&mut area);
        area
    }

    #[test]
    fn board_area_decodes_named_fields() {
        let mut buffer = common_header([0, 0, 1, 0, 0]);
        buffer.extend_from_slice(&sample_board_area());
        assert_eq!(buffer.len(), 32);

        let inventory = decode_inventory(&buffer, &FruDecodeOptions::default()).expect("decode");
        let board = inventory.board.expect("board area");
        assert_eq!(board.language, 25);
        assert_eq!(board.manufacturing_date, 1);
        assert_eq!(board.manufacturer, Some(FruField::Text("ACME".into())));
        assert_eq!(board.name, Some(FruField::Text("X42".into())));
        assert_eq!(board.serial, None);
        assert!(board.custom.is_empty());
        assert!(inventory.chassis.is_none());
        assert!(inventory.product.is_none());
    }

    #[test]
    fn bad_chassis_checksum_does_not_invalidate_board() {
        // Chassis at offset 1, board at offset 2.
        let mut chassis = vec![
            0x01, 0x01, // version, length 1 * 8
            0x05, // chassis type
            0xC1, 0x00, 0x00, 0x00,
        ];
        close_checksum(&mut chassis);
        chassis[2] ^= 0xFF; // corrupt

        let mut buffer = common_header([0, 1, 2, 0, 0]);
        buffer.extend_from_slice(&chassis);
        buffer.extend_from_slice(&sample_board_area());

        let inventory = decode_inventory(&buffer, &FruDecodeOptions::default()).expect("decode");
        assert!(inventory.chassis.is_none(), "corrupt area dropped");
        let board = inventory.board.expect("board survives");
        assert_eq!(board.manufacturer, Some(FruField::Text("ACME".into())));
    }

    #[test]
    fn corrupt_common_header_is_an_error() {
        let mut header = common_header([0, 0, 1, 0, 0]);
        header[7] ^= 0x01;
        header.extend_from_slice(&sample_board_area());
        assert!(matches!(
            decode_inventory(&header, &FruDecodeOptions::default()),
            Err(Error::IncorrectHeaderChecksum)
        ));

        assert!(matches!(
            decode_inventory(&[0x01, 0x00], &FruDecodeOptions::default()),
            Err(Error::UnsupportedFruData(_))
        ));
    }

    #[test]
    fn sentinel_first_yields_empty_field_list() {
        let data = [FIELD_SENTINEL, 0xAA, 0xBB];
        let mut reader = FieldReader::new(&data, 0);
        assert_eq!(reader.next_field(), None);
        assert!(reader.remaining().is_empty());
        assert_eq!(reader.consumed(), 1, "cursor sits just past the sentinel");
    }

    #[test]
    fn zero_length_fields_are_omitted_but_consume_their_slot() {
        // First slot: type 3, length 0 (present but empty). Second slot: "777".
        let mut reader = FieldReader::new(&[0xC0, 0xC3, b'7', b'7', b'7', 0xC1], 0);
        assert_eq!(reader.next_field(), None, "empty but present");
        assert_eq!(
            reader.next_field(),
            Some(FruField::Text("777".into())),
            "next slot still decodes"
        );
        assert_eq!(reader.next_field(), None);
        assert!(reader.done);
    }

    #[test]
    fn bcd_plus_and_packed_ascii_decode() {
        // Nibbles decode low-first: 0x21 -> "12", 0xB0 -> "0-".
        assert_eq!(decode_bcd_plus(&[0x21, 0xB0]), "120-");

        // "IPMI" in 6-bit packed ASCII: codes 0x29 0x30 0x2D 0x29, LSB-first.
        assert_eq!(decode_packed_ascii(&[0x29, 0xDC, 0xA6]), "IPMI");
    }

    #[test]
    fn non_english_text_fields_decode_utf16le() {
        let raw = [0x3B, 0x04, 0x34, 0x04]; // "зд"
        let field = decode_field(3, &raw, 7);
        assert_eq!(field, FruField::Text("зд".into()));
    }

    fn multi_record(record_type: u8, end_of_list: bool, payload: &[u8]) -> Vec<u8> {
        let payload_sum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let mut record = vec![
            record_type,
            if end_of_list { 0x82 } else { 0x02 },
            payload.len() as u8,
            (!payload_sum).wrapping_add(1),
        ];
        close_checksum(&mut record);
        record.extend_from_slice(payload);
        record
    }

    #[test]
    fn compatibility_bitmap_expands_msb_first() {
        let payload = [0x22, 0x11, 0x00, 0x01, 42, 10, 0x3F, 0x18];
        let record = decode_compatibility(&payload).expect("decode");
        assert_eq!(record.manufacturer_id, 0x1122);
        assert_eq!(record.entity_id, 0x01);
        assert_eq!(record.compatibility_base, 42);
        assert_eq!(
            record.compatible_codes,
            vec![10, 11, 12, 13, 14, 15, 16, 22, 23]
        );
    }

    #[test]
    fn end_of_list_bit_halts_record_parsing() {
        let compat = [0x22, 0x11, 0x00, 0x01, 42, 10, 0x3F];
        let mut area = multi_record(0x04, true, &compat);
        // A perfectly valid-looking record after the end-of-list marker.
        area.extend_from_slice(&multi_record(0x04, false, &compat));

        let records = decode_multi_records(&area, &FruDecodeOptions::default());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn bad_payload_checksum_skips_only_that_record() {
        let compat = [0x22, 0x11, 0x00, 0x01, 42, 10, 0x3F];
        let mut area = multi_record(0x04, false, &compat);
        let payload_start = area.len() - compat.len();
        area[payload_start] ^= 0xFF; // corrupt first record's payload
        area.extend_from_slice(&multi_record(0x05, true, &compat));

        let records = decode_multi_records(&area, &FruDecodeOptions::default());
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], MultiRecord::ExtendedCompatibility(_)));
    }

    #[test]
    fn bad_header_checksum_abandons_the_chain() {
        let compat = [0x22, 0x11, 0x00, 0x01, 42, 10, 0x3F];
        let mut area = multi_record(0x04, false, &compat);
        area[4] ^= 0x01; // corrupt header checksum of the first record
        area.extend_from_slice(&multi_record(0x04, true, &compat));

        assert!(decode_multi_records(&area, &FruDecodeOptions::default()).is_empty());
    }

    #[test]
    fn unknown_record_types_are_dropped_without_a_decoder() {
        let area = multi_record(0xC0, true, &[0x01, 0x02]);
        assert!(decode_multi_records(&area, &FruDecodeOptions::default()).is_empty());

        fn decode(payload: &[u8]) -> Option<OemRecord> {
            Some(OemRecord {
                record_type: 0xC0,
                name: "vendor".into(),
                fields: vec![("raw".into(), format!("{payload:02x?}"))],
            })
        }
        let options = FruDecodeOptions::new().with_oem_decoder(0xC0, decode);
        let records = decode_multi_records(&area, &options);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], MultiRecord::Oem(_)));
    }

    #[test]
    fn power_supply_record_scales_and_flags() {
        let mut payload = vec![0u8; 24];
        payload[0..2].copy_from_slice(&460u16.to_le_bytes()); // 460 W
        payload[2..4].copy_from_slice(&600u16.to_le_bytes()); // 600 VA
        payload[4] = 35; // inrush amps
        payload[5] = 10; // inrush ms
        payload[6..8].copy_from_slice(&9000u16.to_le_bytes()); // 90.00 V
        payload[8..10].copy_from_slice(&26400u16.to_le_bytes()); // 264.00 V
        payload[14] = 47;
        payload[15] = 63;
        payload[16] = 20;
        payload[17] = 0x0B; // predictive fail, pfc, hot swap
        payload[18..20].copy_from_slice(&(600u16 | (5 << 12)).to_le_bytes());
        payload[20] = 0x02; // 12 V and 5 V combined
        payload[21..23].copy_from_slice(&500u16.to_le_bytes());
        payload[23] = 0xFF; // unspecified threshold

        let record = decode_power_supply(&payload).expect("decode");
        assert_eq!(record.overall_capacity, Some(460));
        assert_eq!(record.peak_va, Some(600));
        assert_eq!(record.inrush_current, Some(35));
        assert_eq!(record.low_input_voltage1, Some(90.0));
        assert_eq!(record.high_input_voltage1, Some(264.0));
        assert_eq!(record.low_input_voltage2, None, "zero is unspecified");
        assert_eq!(record.low_input_frequency, Some(47));
        assert!(record.predictive_fail_support);
        assert!(record.power_factor_correction);
        assert!(!record.autoswitch);
        assert!(record.hot_swappable);
        assert_eq!(record.peak_wattage, Some(600));
        assert_eq!(record.hold_up_time_s, Some(5));
        assert_eq!(record.combined_voltages, Some((12.0, 5.0)));
        assert_eq!(record.total_combined_wattage, Some(500));
        assert_eq!(record.predictive_fail_tachometer_lower_threshold, None);
    }

    #[test]
    fn dc_output_record_scales_units() {
        let mut payload = vec![0u8; 13];
        payload[0] = 0x81; // standby, output 1
        payload[1..3].copy_from_slice(&1200u16.to_le_bytes()); // 12.00 V
        payload[3..5].copy_from_slice(&(-50i16 as u16).to_le_bytes()); // -0.50 V
        payload[5..7].copy_from_slice(&50u16.to_le_bytes());
        payload[7..9].copy_from_slice(&120u16.to_le_bytes()); // 0.120 V ripple
        payload[9..11].copy_from_slice(&100u16.to_le_bytes()); // 0.1 A
        payload[11..13].copy_from_slice(&1500u16.to_le_bytes()); // 1.5 A

        let record = decode_dc_output(&payload).expect("decode");
        assert_eq!(record.output_number, 1);
        assert!(record.standby);
        assert_eq!(record.nominal_voltage, Some(12.0));
        assert_eq!(record.max_negative_deviation, Some(-0.5));
        assert_eq!(record.max_positive_deviation, Some(0.5));
        assert_eq!(record.ripple, Some(0.12));
        assert_eq!(record.min_current, Some(0.1));
        assert_eq!(record.max_current, Some(1.5));
    }

    #[test]
    fn management_access_sub_types() {
        let record = decode_management_access(b"\x01https://bmc.example").expect("decode");
        assert_eq!(
            record,
            ManagementAccessRecord::SystemManagementUrl("https://bmc.example".into())
        );

        let record = decode_management_access(&[0x07, 0xDE, 0xAD]).expect("decode");
        assert_eq!(
            record,
            ManagementAccessRecord::SystemUniqueId(vec![0xDE, 0xAD])
        );

        assert_eq!(decode_management_access(&[0x09, 0x00]), None);
    }

    #[test]
    fn board_manufacturing_date_converts_to_wall_clock() {
        let board = BoardArea {
            language: 0,
            manufacturing_date: 1,
            manufacturer: None,
            name: None,
            serial: None,
            part_number: None,
            fru_file_id: None,
            custom: Vec::new(),
        };
        let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(820_454_400 + 60);
        assert_eq!(board.manufactured_at(), expected);
    }
}
