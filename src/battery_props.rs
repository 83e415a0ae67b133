//! The battery property space exposed by the monitor, and the derivations
//! that turn cached raw readings into presentation values.

use thiserror::Error;

/// Lowest cell voltage of one lithium cell in mV.
const CELL_VOLTAGE_MIN_MV: i32 = 3000;
/// Full cell voltage of one lithium cell in mV.
const CELL_VOLTAGE_MAX_MV: i32 = 4200;
/// The UPS module carries three cells in series.
const CELLS_IN_SERIES: i32 = 3;

pub(crate) const PACK_VOLTAGE_MIN_MV: i32 = CELL_VOLTAGE_MIN_MV * CELLS_IN_SERIES;
pub(crate) const PACK_VOLTAGE_MAX_MV: i32 = CELL_VOLTAGE_MAX_MV * CELLS_IN_SERIES;

/// A battery property a caller can query.
///
/// `Technology` and `CycleCount` are recognized power-supply kinds this
/// sensor cannot provide; querying them fails with
/// [`QueryError::Unsupported`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    Status,
    Present,
    VoltageNow,
    CurrentNow,
    PowerNow,
    Capacity,
    CapacityAlertMin,
    ModelName,
    Manufacturer,
    Technology,
    CycleCount,
}

/// The value of one queried [`Property`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Status(BatteryStatus),
    Bool(bool),
    Int(i32),
    Str(&'static str),
}

/// Charge direction, derived from the sign and size of the measured current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryStatus {
    Charging,
    Discharging,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("property {0:?} is not supported by this device")]
    Unsupported(Property),
}

/// Estimate remaining capacity in percent from the pack voltage.
///
/// Linear interpolation between the pack's design limits, truncating
/// integer division, clamped to 0..=100.
pub(crate) fn capacity_percent(bus_voltage_mv: i32) -> i32 {
    let span = PACK_VOLTAGE_MAX_MV - PACK_VOLTAGE_MIN_MV;
    let percent = (bus_voltage_mv - PACK_VOLTAGE_MIN_MV) * 100 / span;
    percent.clamp(0, 100)
}

#[test]
fn test_capacity_percent_endpoints() {
    assert_eq!(capacity_percent(PACK_VOLTAGE_MIN_MV), 0);
    assert_eq!(capacity_percent(PACK_VOLTAGE_MAX_MV), 100);
}

#[test]
fn test_capacity_percent_clamps() {
    assert_eq!(capacity_percent(0), 0);
    assert_eq!(capacity_percent(8999), 0);
    assert_eq!(capacity_percent(12601), 100);
    assert_eq!(capacity_percent(32764), 100);
}

#[test]
fn test_capacity_percent_monotonic() {
    let mut last = 0;
    for mv in (8000..14000).step_by(100) {
        let pct = capacity_percent(mv);
        assert!(pct >= last, "capacity fell from {last} to {pct} at {mv}mV");
        last = pct;
    }
}

#[test]
fn test_capacity_percent_truncates() {
    // 10800mV is exactly half way: 1800 * 100 / 3600
    assert_eq!(capacity_percent(10800), 50);
    // one mV higher still truncates down
    assert_eq!(capacity_percent(10801), 50);
}
