mod common;

use common::telegram_bytes;
use proptest::prelude::*;
use surplus_heater::error::ProtocolError;
use surplus_heater::telegram::*;

#[test]
fn test_decode_core_fields() {
    let bytes = telegram_bytes(1_900_123_456, 1234.5, 150.0);
    let decoded = decode(&bytes).unwrap();

    assert_eq!(decoded.serial_number, 1_900_123_456);
    assert_eq!(decoded.import_power_w, 1234.5);
    assert_eq!(decoded.export_power_w, 150.0);
    assert_eq!(decoded.surplus_w(), -1085.0);
}

#[test]
fn test_raw_100_with_divisor_10_is_10_watts() {
    let mut bytes = telegram_bytes(1, 0.0, 0.0);
    bytes[0x34..0x38].copy_from_slice(&[0x00, 0x00, 0x00, 0x64]);
    assert_eq!(decode(&bytes).unwrap().export_power_w, 10.0);
}

#[test]
fn test_one_missing_byte_is_truncated() {
    let bytes = telegram_bytes(1, 0.0, 0.0);
    let short = &bytes[..bytes.len() - 1];

    assert_eq!(
        decode(short),
        Err(ProtocolError::Truncated {
            needed: CORE_TELEGRAM_LEN,
            actual: CORE_TELEGRAM_LEN - 1
        })
    );
}

#[test]
fn test_short_foreign_datagram_is_not_a_telegram() {
    let datagram = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A];
    assert_eq!(decode(&datagram), Err(ProtocolError::BadMagic));
}

#[test]
fn test_bad_magic() {
    let mut bytes = telegram_bytes(1, 0.0, 0.0);
    bytes[0] = b'X';
    assert_eq!(decode(&bytes), Err(ProtocolError::BadMagic));
}

#[test]
fn test_surplus_is_floored() {
    let decoded = decode(&telegram_bytes(1, 100.3, 300.0)).unwrap();
    // 199.7 floors to 199
    assert_eq!(decoded.surplus_w(), 199.0);

    let decoded = decode(&telegram_bytes(1, 0.2, 0.0)).unwrap();
    assert_eq!(decoded.surplus_w(), -1.0);
}

#[test]
fn test_validate_rejects_invalid_serial() {
    let decoded = decode(&telegram_bytes(u32::MAX, 0.0, 200.0)).unwrap();
    assert_eq!(
        validate(&decoded, &TelegramLimits::default()),
        Err(ProtocolError::InvalidSerial(u32::MAX))
    );
}

#[test]
fn test_validate_rejects_implausible_surplus() {
    let limits = TelegramLimits::default();

    let decoded = decode(&telegram_bytes(7, 0.0, 100_000.5)).unwrap();
    assert!(matches!(validate(&decoded, &limits), Err(ProtocolError::ImplausibleSurplus(_))));

    let decoded = decode(&telegram_bytes(7, 150_000.0, 0.0)).unwrap();
    assert!(matches!(validate(&decoded, &limits), Err(ProtocolError::ImplausibleSurplus(_))));

    let decoded = decode(&telegram_bytes(7, 0.0, 100_000.0)).unwrap();
    assert_eq!(validate(&decoded, &limits), Ok(100_000.0));
}

#[test]
fn test_decode_fields_judges_length_against_requested_set() {
    let bytes = telegram_bytes(1, 0.0, 0.0);

    assert!(decode_fields(&bytes, &CORE_FIELDS).is_ok());
    assert_eq!(
        decode_fields(&bytes, &[Field::ExportEnergy]),
        Err(ProtocolError::Truncated {
            needed: 0x3C + 8,
            actual: CORE_TELEGRAM_LEN
        })
    );
}

#[test]
fn test_full_table_per_phase_fields() {
    let mut bytes = vec![0u8; FULL_TELEGRAM_LEN];
    bytes[..3].copy_from_slice(&MAGIC);
    bytes[0xA8..0xAC].copy_from_slice(&4321u32.to_be_bytes());
    bytes[0x1E4..0x1EC].copy_from_slice(&(3_600_000u64 * 12).to_be_bytes());

    let values = decode_fields(&bytes, &Field::ALL).unwrap();
    assert_eq!(values.get(Field::ImportPowerL1), Some(432.1));
    assert_eq!(values.get(Field::ExportEnergyL3), Some(12.0));
    assert_eq!(values.iter().count(), FIELD_COUNT);
}

#[test]
fn test_unrequested_fields_are_absent() {
    let bytes = telegram_bytes(1, 5.0, 0.0);
    let values = decode_fields(&bytes, &[Field::ImportPower]).unwrap();

    assert_eq!(values.get(Field::ImportPower), Some(5.0));
    assert_eq!(values.get(Field::SerialNumber), None);
}

#[test]
fn test_hex_telegram_decodes() {
    let bytes = telegram_bytes(42, 0.0, 250.0);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

    let telegram = Telegram::from_hex(&hex).unwrap();
    assert_eq!(telegram.len(), CORE_TELEGRAM_LEN);
    assert_eq!(decode(telegram.as_bytes()).unwrap().serial_number, 42);
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..MAX_TELEGRAM_SIZE)) {
        let _ = decode(&bytes);
        let _ = decode_fields(&bytes, &Field::ALL);
    }

    #[test]
    fn short_sma_buffers_are_always_truncated(len in MAGIC.len()..CORE_TELEGRAM_LEN, fill in any::<u8>()) {
        let mut bytes = vec![fill; len];
        bytes[..MAGIC.len()].copy_from_slice(&MAGIC);
        let is_truncated = matches!(decode(&bytes), Err(ProtocolError::Truncated { .. }));
        prop_assert!(is_truncated);
    }

    #[test]
    fn short_foreign_buffers_are_bad_magic(len in MAGIC.len()..CORE_TELEGRAM_LEN, fill in 0x54u8..=0xFF) {
        // Fill bytes above b'S' can never spell the marker.
        let bytes = vec![fill; len];
        prop_assert_eq!(decode(&bytes), Err(ProtocolError::BadMagic));
    }

    #[test]
    fn decoded_powers_match_encoding(import in 0u32..1_000_000, export in 0u32..1_000_000) {
        let mut bytes = telegram_bytes(1, 0.0, 0.0);
        bytes[0x20..0x24].copy_from_slice(&import.to_be_bytes());
        bytes[0x34..0x38].copy_from_slice(&export.to_be_bytes());

        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(decoded.import_power_w, f64::from(import) / 10.0);
        prop_assert_eq!(decoded.export_power_w, f64::from(export) / 10.0);
    }
}
