//! The register-access channel the monitor reads the sensor through.
//!
//! The crate does not talk to any bus itself. Whoever constructs an
//! [`UpsMonitor`](crate::UpsMonitor) supplies a [`RegisterTransport`]
//! wrapping the real channel (typically an I2C/smbus word transaction
//! against device address 0x41).

use crate::register::Register;
use std::future::Future;
use thiserror::Error;

/// A failed register transaction.
///
/// Always recoverable: the sampler logs it and leaves the affected field
/// stale for that cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("register transaction failed: {0}")]
    Io(#[from] std::io::Error),
    /// The device did not acknowledge the transaction.
    #[error("device did not acknowledge")]
    Nak,
}

/// Word-sized register access to the sensor chip.
///
/// Both methods exchange the word in the byte order the underlying channel
/// delivers it, which for smbus word transactions is little-endian; byte
/// order correction is the monitor's job, not the transport's.
///
/// The returned futures must be `Send` because the sampler runs on a
/// spawned task.
pub trait RegisterTransport {
    fn read_register(
        &mut self,
        reg: Register,
    ) -> impl Future<Output = Result<u16, TransportError>> + Send;

    fn write_register(
        &mut self,
        reg: Register,
        word: u16,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
