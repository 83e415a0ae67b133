//! Monitor the battery state of a Waveshare UPS Module 3S for Raspberry Pi.
//!
//! The module carries three lithium cells in series behind an INA219
//! current/power sensor. This crate owns the sensor: it writes the fixed
//! configuration and calibration words at startup, then samples the shunt
//! voltage, bus voltage, current and power registers once per second from a
//! background task into a shared cache.
//!
//! Callers read the cache through [`UpsMonitor::get_property`], which never
//! touches the bus and derives the presentation values:
//!
//! - charge status (charging above 50mA of inbound current)
//! - presence (false once no sample has succeeded for 5 seconds)
//! - voltage, current and power in µV/µA/µW
//! - remaining capacity in % of the 9.0V–12.6V pack range
//!
//! The bus itself is not part of the crate; construction takes any
//! [`RegisterTransport`] wrapping a word-sized register channel.
//!
//! # Example
//!
//! ```no_run
//! # use upsmon::{Register, RegisterTransport, TransportError};
//! # struct Bus;
//! # impl RegisterTransport for Bus {
//! #     async fn read_register(&mut self, _: Register) -> Result<u16, TransportError> { Ok(0) }
//! #     async fn write_register(&mut self, _: Register, _: u16) -> Result<(), TransportError> { Ok(()) }
//! # }
//! # #[tokio::main]
//! # pub async fn main() {
//!     let transport = Bus; // your I2C channel to the INA219 at 0x41
//!     let monitor = upsmon::UpsMonitor::new(transport).await.unwrap();
//!     loop {
//!         let voltage = monitor.get_property(upsmon::Property::VoltageNow).unwrap();
//!         println!("{voltage:?}");
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//! # }
//! ```

mod battery_props;
mod register;
mod transport;
mod ups_monitor;

pub use battery_props::{BatteryStatus, Property, PropertyValue, QueryError};
pub use register::Register;
pub use transport::{RegisterTransport, TransportError};
pub use ups_monitor::{InitError, UpsMonitor};
