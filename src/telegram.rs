//! Energy meter telegram decoding.
//!
//! The meter broadcasts fixed-layout frames. Every quantity is a big-endian
//! unsigned integer at a known byte offset, scaled by an integer divisor.
//! The layout lives in [`FIELD_TABLE`]; decoding is a pure function of the
//! bytes and the requested fields.

use crate::error::ProtocolError;
use core::fmt;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Marker every telegram starts with.
pub const MAGIC: [u8; 3] = *b"SMA";

/// Largest datagram the meter emits.
pub const MAX_TELEGRAM_SIZE: usize = 608;

pub type TelegramBuffer = Vec<u8, MAX_TELEGRAM_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    Four,
    Eight,
}

impl FieldWidth {
    pub const fn bytes(self) -> usize {
        match self {
            FieldWidth::Four => 4,
            FieldWidth::Eight => 8,
        }
    }
}

/// Location and scaling of one quantity inside a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub offset: usize,
    pub width: FieldWidth,
    pub divisor: u32,
}

impl FieldSpec {
    pub const fn new(offset: usize, width: FieldWidth, divisor: u32) -> Self {
        Self { offset, width, divisor }
    }

    /// First byte after the field.
    pub const fn end(&self) -> usize {
        self.offset + self.width.bytes()
    }

    /// Raw big-endian value, `None` if the buffer does not cover the field.
    pub fn read_raw(&self, bytes: &[u8]) -> Option<u64> {
        let slice = bytes.get(self.offset..self.end())?;
        Some(slice.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Value in physical units (raw / divisor).
    pub fn read(&self, bytes: &[u8]) -> Option<f64> {
        self.read_raw(bytes)
            .map(|raw| raw as f64 / f64::from(self.divisor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    SerialNumber,
    ImportPower,
    ImportEnergy,
    ExportPower,
    ExportEnergy,
    ImportPowerL1,
    ImportEnergyL1,
    ExportPowerL1,
    ExportEnergyL1,
    ImportPowerL2,
    ImportEnergyL2,
    ExportPowerL2,
    ExportEnergyL2,
    ImportPowerL3,
    ImportEnergyL3,
    ExportPowerL3,
    ExportEnergyL3,
}

pub const FIELD_COUNT: usize = 17;

/// Counter divisor: the meter counts energy in watt-seconds, reported in kWh.
const WS_PER_KWH: u32 = 3_600_000;

/// Telegram layout, indexed by `Field as usize`.
pub const FIELD_TABLE: [(Field, FieldSpec); FIELD_COUNT] = [
    (Field::SerialNumber, FieldSpec::new(0x14, FieldWidth::Four, 1)),
    (Field::ImportPower, FieldSpec::new(0x20, FieldWidth::Four, 10)),
    (Field::ImportEnergy, FieldSpec::new(0x28, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ExportPower, FieldSpec::new(0x34, FieldWidth::Four, 10)),
    (Field::ExportEnergy, FieldSpec::new(0x3C, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ImportPowerL1, FieldSpec::new(0xA8, FieldWidth::Four, 10)),
    (Field::ImportEnergyL1, FieldSpec::new(0xB0, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ExportPowerL1, FieldSpec::new(0xBC, FieldWidth::Four, 10)),
    (Field::ExportEnergyL1, FieldSpec::new(0xC4, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ImportPowerL2, FieldSpec::new(0x138, FieldWidth::Four, 10)),
    (Field::ImportEnergyL2, FieldSpec::new(0x140, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ExportPowerL2, FieldSpec::new(0x14C, FieldWidth::Four, 10)),
    (Field::ExportEnergyL2, FieldSpec::new(0x154, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ImportPowerL3, FieldSpec::new(0x1C8, FieldWidth::Four, 10)),
    (Field::ImportEnergyL3, FieldSpec::new(0x1D0, FieldWidth::Eight, WS_PER_KWH)),
    (Field::ExportPowerL3, FieldSpec::new(0x1DC, FieldWidth::Four, 10)),
    (Field::ExportEnergyL3, FieldSpec::new(0x1E4, FieldWidth::Eight, WS_PER_KWH)),
];

/// Fields the control loop needs.
pub const CORE_FIELDS: [Field; 3] = [Field::SerialNumber, Field::ImportPower, Field::ExportPower];

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = {
        let mut all = [Field::SerialNumber; FIELD_COUNT];
        let mut i = 0;
        while i < FIELD_COUNT {
            all[i] = FIELD_TABLE[i].0;
            i += 1;
        }
        all
    };

    pub const fn spec(self) -> FieldSpec {
        FIELD_TABLE[self as usize].1
    }
}

const fn table_is_indexed() -> bool {
    let mut i = 0;
    while i < FIELD_COUNT {
        if FIELD_TABLE[i].0 as usize != i {
            return false;
        }
        i += 1;
    }
    true
}

const fn max_end(fields: &[Field]) -> usize {
    let mut end = MAGIC.len();
    let mut i = 0;
    while i < fields.len() {
        let field_end = fields[i].spec().end();
        if field_end > end {
            end = field_end;
        }
        i += 1;
    }
    end
}

/// Bytes needed to decode [`CORE_FIELDS`].
pub const CORE_TELEGRAM_LEN: usize = max_end(&CORE_FIELDS);

/// Bytes needed to decode every field of [`FIELD_TABLE`].
pub const FULL_TELEGRAM_LEN: usize = max_end(&Field::ALL);

const_assert!(table_is_indexed());
const_assert!(FULL_TELEGRAM_LEN <= MAX_TELEGRAM_SIZE);
const_assert!(CORE_TELEGRAM_LEN == 0x38);

/// Bytes required to decode `fields` (never less than the magic marker).
pub fn required_len(fields: &[Field]) -> usize {
    max_end(fields)
}

/// One received frame, held only for a single decode cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct Telegram {
    bytes: TelegramBuffer,
}

impl Telegram {
    /// Copies `bytes`; `None` if they exceed [`MAX_TELEGRAM_SIZE`].
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Vec::from_slice(bytes).ok().map(|bytes| Self { bytes })
    }

    pub fn from_hex(hex: &str) -> Result<Self, ProtocolError> {
        let hex = hex.trim();
        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(ProtocolError::InvalidHex);
        }
        let mut bytes = TelegramBuffer::new();
        for pair in hex.as_bytes().chunks(2) {
            let digits = core::str::from_utf8(pair).map_err(|_| ProtocolError::InvalidHex)?;
            let byte = u8::from_str_radix(digits, 16).map_err(|_| ProtocolError::InvalidHex)?;
            bytes.push(byte).map_err(|_| ProtocolError::InvalidHex)?;
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.bytes {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Telegram[{self}]")
    }
}

/// Values of the fields requested from [`decode_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldValues {
    values: [Option<f64>; FIELD_COUNT],
}

impl FieldValues {
    pub fn get(&self, field: Field) -> Option<f64> {
        self.values[field as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        Field::ALL
            .iter()
            .filter_map(move |&field| self.get(field).map(|value| (field, value)))
    }
}

/// The quantities the control loop acts on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecodedTelegram {
    pub serial_number: u32,
    pub import_power_w: f64,
    pub export_power_w: f64,
}

impl DecodedTelegram {
    /// Export minus import, floored to whole watts.
    pub fn surplus_w(&self) -> f64 {
        (self.export_power_w - self.import_power_w).floor()
    }
}

/// Decode an arbitrary set of fields.
///
/// Any buffer long enough to hold the marker is judged on the marker first;
/// only a buffer that carries it can be `Truncated`.
pub fn decode_fields(bytes: &[u8], fields: &[Field]) -> Result<FieldValues, ProtocolError> {
    if bytes.get(..MAGIC.len()).is_some_and(|marker| marker != MAGIC) {
        return Err(ProtocolError::BadMagic);
    }
    let needed = required_len(fields);
    if bytes.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            actual: bytes.len(),
        });
    }

    let mut values = FieldValues::default();
    for &field in fields {
        values.values[field as usize] = field.spec().read(bytes);
    }
    Ok(values)
}

/// Decode serial number and import/export power.
pub fn decode(bytes: &[u8]) -> Result<DecodedTelegram, ProtocolError> {
    decode_fields(bytes, &CORE_FIELDS)?;
    let truncated = || ProtocolError::Truncated {
        needed: CORE_TELEGRAM_LEN,
        actual: bytes.len(),
    };

    let serial = Field::SerialNumber.spec().read_raw(bytes).ok_or_else(truncated)?;
    Ok(DecodedTelegram {
        serial_number: serial as u32,
        import_power_w: Field::ImportPower.spec().read(bytes).ok_or_else(truncated)?,
        export_power_w: Field::ExportPower.spec().read(bytes).ok_or_else(truncated)?,
    })
}

/// Plausibility limits applied after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramLimits {
    pub invalid_serial: u32,
    pub max_surplus_w: f64,
}

impl Default for TelegramLimits {
    fn default() -> Self {
        Self {
            invalid_serial: u32::MAX,
            max_surplus_w: 100_000.0,
        }
    }
}

/// Rejects corrupt frames and returns the floored surplus of a sound one.
pub fn validate(telegram: &DecodedTelegram, limits: &TelegramLimits) -> Result<f64, ProtocolError> {
    if telegram.serial_number == limits.invalid_serial {
        return Err(ProtocolError::InvalidSerial(telegram.serial_number));
    }
    let difference = telegram.export_power_w - telegram.import_power_w;
    if !difference.is_finite() || difference.abs() > limits.max_surplus_w {
        return Err(ProtocolError::ImplausibleSurplus(difference));
    }
    Ok(telegram.surplus_w())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize) -> std::vec::Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[..3].copy_from_slice(&MAGIC);
        bytes
    }

    #[test]
    fn test_four_byte_field_is_scaled_by_divisor() {
        let mut bytes = frame(CORE_TELEGRAM_LEN);
        bytes[0x20..0x24].copy_from_slice(&0x0000_0064u32.to_be_bytes());
        assert_eq!(Field::ImportPower.spec().read(&bytes), Some(10.0));
    }

    #[test]
    fn test_eight_byte_field_reads_big_endian() {
        let mut bytes = frame(FULL_TELEGRAM_LEN);
        bytes[0x28..0x30].copy_from_slice(&7_200_000u64.to_be_bytes());
        assert_eq!(Field::ImportEnergy.spec().read(&bytes), Some(2.0));
    }

    #[test]
    fn test_required_lengths() {
        assert_eq!(CORE_TELEGRAM_LEN, 0x38);
        assert_eq!(FULL_TELEGRAM_LEN, 0x1E4 + 8);
        assert_eq!(required_len(&[]), MAGIC.len());
    }

    #[test]
    fn test_shorter_than_marker_is_truncated() {
        let bytes = [0u8; 2];
        assert!(matches!(decode(&bytes), Err(ProtocolError::Truncated { needed: 0x38, actual: 2 })));
    }

    #[test]
    fn test_short_foreign_datagram_is_bad_magic() {
        assert_eq!(decode(&[0xAB; 10]), Err(ProtocolError::BadMagic));
        assert!(matches!(
            decode(&frame(10)),
            Err(ProtocolError::Truncated { needed: 0x38, actual: 10 })
        ));
    }

    #[test]
    fn test_hex_round_trip_display() {
        let telegram = Telegram::from_hex("534d4100ff").unwrap();
        assert_eq!(telegram.as_bytes(), &[0x53, 0x4d, 0x41, 0x00, 0xff]);
        assert_eq!(telegram.to_string(), "534d4100ff");
    }

    #[test]
    fn test_hex_rejects_odd_length_and_garbage() {
        assert_eq!(Telegram::from_hex("abc"), Err(ProtocolError::InvalidHex));
        assert_eq!(Telegram::from_hex("zz"), Err(ProtocolError::InvalidHex));
        assert_eq!(Telegram::from_hex(""), Err(ProtocolError::InvalidHex));
    }

    #[test]
    fn test_oversized_slice_is_refused() {
        assert!(Telegram::from_slice(&[0u8; MAX_TELEGRAM_SIZE + 1]).is_none());
        assert!(Telegram::from_slice(&[0u8; MAX_TELEGRAM_SIZE]).is_some());
    }
}
