//! INA219 register map, fixed configuration words and raw-value decoding.
//!
//! The access primitive delivers register words little-endian while the chip
//! transmits them big-endian, so every word crossing the transport gets its
//! bytes swapped by [`swap_word`]. The decoders below take the word exactly
//! as delivered and return the value in its physical unit.

/// The six registers of the INA219 current/power sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Config = 0x00,
    ShuntVoltage = 0x01,
    BusVoltage = 0x02,
    Power = 0x03,
    Current = 0x04,
    Calibration = 0x05,
}

impl Register {
    /// The register address on the chip's command interface.
    pub fn addr(self) -> u8 {
        self as u8
    }
}

// Configuration register fields.
const BRNG: u16 = 0b01; // bus voltage range 32V
const PG: u16 = 0b11; // shunt gain ±320mV
const BADC: u16 = 0b1101; // bus ADC 12 bit, 32 samples
const SADC: u16 = 0b1101; // shunt ADC 12 bit, 32 samples
const MODE: u16 = 0b111; // continuous shunt and bus measurement

/// The operating-mode word written to [`Register::Config`] at startup.
pub const CONFIG_WORD: u16 = (BRNG << 13) | (PG << 11) | (BADC << 7) | (SADC << 3) | MODE;

/// The word written to [`Register::Calibration`] at startup.
///
/// All current and power scaling below assumes this exact value:
/// Current_LSB = 0.04096 / 4096 = 1mA.
pub const CALIBRATION_WORD: u16 = 0x1000;

/// Swap the byte order of a register word.
///
/// Applied to every word read from the transport before decoding, and to
/// every word before it is written.
pub fn swap_word(word: u16) -> u16 {
    word.swap_bytes()
}

/// Decode the shunt voltage register. Signed, 1 LSB = 10µV, returned in
/// 10µV units.
pub fn decode_shunt_voltage(raw: u16) -> i32 {
    swap_word(raw) as i16 as i32
}

/// Decode the bus voltage register in mV.
///
/// The low 3 bits of the register are status flags; the remaining 13 bits
/// are the conversion result at 4mV per LSB.
pub fn decode_bus_voltage(raw: u16) -> i32 {
    ((swap_word(raw) >> 3) as i32) * 4
}

/// Decode the current register. Signed, 1 LSB = 1mA under
/// [`CALIBRATION_WORD`], returned in mA.
pub fn decode_current(raw: u16) -> i32 {
    swap_word(raw) as i16 as i32
}

/// Decode the power register in mW. 1 LSB = 20 × Current_LSB = 20mW.
pub fn decode_power(raw: u16) -> i32 {
    swap_word(raw) as i32 * 20
}

#[test]
fn test_config_word() {
    assert_eq!(CONFIG_WORD, 0x3def);
}

#[test]
fn test_swap_word_is_its_own_inverse() {
    assert_eq!(swap_word(0x3def), 0xef3d);
    assert_eq!(swap_word(swap_word(0x1234)), 0x1234);
}

#[test]
fn test_decode_shunt_voltage_is_signed() {
    assert_eq!(decode_shunt_voltage(swap_word(0x0032)), 50);
    // 0xffff is -1 as a two's complement word
    assert_eq!(decode_shunt_voltage(0xffff), -1);
}

#[test]
fn test_decode_bus_voltage_discards_status_bits() {
    // status bits only
    assert_eq!(decode_bus_voltage(swap_word(0x0007)), 0);
    assert_eq!(decode_bus_voltage(swap_word(0x0008)), 4);
    // 11.4V rail: (2850 << 3) >> 3 * 4
    assert_eq!(decode_bus_voltage(swap_word(2850 << 3)), 11400);
}

#[test]
fn test_decode_bus_voltage_never_negative() {
    for raw in [0x0000u16, 0x8000, 0xffff, 0x1770] {
        assert!(decode_bus_voltage(raw) >= 0);
        assert_eq!(decode_bus_voltage(raw), ((swap_word(raw) >> 3) as i32) * 4);
    }
}

#[test]
fn test_decode_current_is_identity_in_ma() {
    assert_eq!(decode_current(swap_word(70)), 70);
    assert_eq!(decode_current(swap_word(-200i16 as u16)), -200);
}

#[test]
fn test_decode_power_scales_by_20() {
    assert_eq!(decode_power(swap_word(5)), 100);
    // full-scale value must not wrap
    assert_eq!(decode_power(0xffff), 0xffff * 20);
}
