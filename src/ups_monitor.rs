//! The monitor itself: one-time sensor initialization, the background
//! sampler and the cached, staleness-checked battery state.

use crate::battery_props::{capacity_percent, BatteryStatus, Property, PropertyValue, QueryError};
use crate::register::{self, Register, CALIBRATION_WORD, CONFIG_WORD};
use crate::transport::{RegisterTransport, TransportError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

/// A construction-time failure.
///
/// `Unreachable` and `ConfigWriteFailed` abort construction. A failed
/// calibration write is logged and construction proceeds with whatever
/// calibration the chip already holds.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("sensor did not respond, check the I2C connection: {0}")]
    Unreachable(#[source] TransportError),
    #[error("failed to write configuration data: {0}")]
    ConfigWriteFailed(#[source] TransportError),
    #[error("failed to write calibration data: {0}")]
    CalibrationWriteFailed(#[source] TransportError),
}

/// The latest decoded readings, shared between the sampler task and any
/// number of [`UpsMonitor::get_property`] callers.
///
/// Every access happens under the one mutex, and the lock is only ever
/// held for plain field access. Register transactions are issued outside
/// the critical section so a slow bus never stalls readers.
struct CachedState {
    shunt_voltage_10uv: i32,
    bus_voltage_mv: i32,
    current_ma: i32,
    power_mw: i32,
    charger_active: bool,
    last_update: Instant,
}

impl CachedState {
    fn new() -> Self {
        Self {
            shunt_voltage_10uv: 0,
            bus_voltage_mv: 0,
            current_ma: 0,
            power_mw: 0,
            charger_active: false,
            last_update: Instant::now(),
        }
    }
}

/// Monitors the UPS battery through an INA219 sensor behind a
/// [`RegisterTransport`].
///
/// Construction configures the sensor and starts a background task which
/// samples the four measurement registers once per second into a shared
/// cache. [`get_property`](Self::get_property) serves readings from that
/// cache and never touches the bus.
pub struct UpsMonitor {
    cache: Arc<Mutex<CachedState>>,
    stop_tx: watch::Sender<()>,
    sampler: JoinHandle<()>,
}

impl UpsMonitor {
    const MODEL_NAME: &'static str = "UPS-Module-3S";
    const MANUFACTURER: &'static str = "WaveShare";
    /// How often the sampler reads the measurement registers.
    const SAMPLE_PERIOD: Duration = Duration::from_secs(1);
    /// Cached data older than this makes the battery report as absent.
    const DATA_TIMEOUT: Duration = Duration::from_millis(5000);
    /// Settle time after writing the configuration and calibration words.
    const SETTLE_DELAY: Duration = Duration::from_millis(10);
    /// A current above this is taken to mean the DC charger is connected.
    const CHARGER_ACTIVE_THRESHOLD_MA: i32 = 50;
    const CAPACITY_ALERT_MIN_PCT: i32 = 5;

    /// Initialize the sensor and start the background sampler.
    ///
    /// Fails if the sensor does not respond or rejects its configuration;
    /// no sampler is started in that case.
    pub async fn new<T>(mut transport: T) -> Result<Self, InitError>
    where
        T: RegisterTransport + Send + 'static,
    {
        match Self::initialize(&mut transport).await {
            Ok(()) => {}
            Err(InitError::CalibrationWriteFailed(err)) => {
                warn!("failed to write calibration data, continuing uncalibrated: {err}");
            }
            Err(err) => return Err(err),
        }

        let cache = Arc::new(Mutex::new(CachedState::new()));
        let (stop_tx, stop_rx) = watch::channel(());
        let sampler = tokio::spawn(Self::sample_loop(transport, Arc::clone(&cache), stop_rx));

        Ok(Self {
            cache,
            stop_tx,
            sampler,
        })
    }

    /// Query one battery property from the cached state.
    ///
    /// The whole derivation runs under a single lock acquisition, so each
    /// returned value is consistent with one sampler update. If no sample
    /// has succeeded for longer than [`Self::DATA_TIMEOUT`] the battery
    /// reports as not present; all other properties keep returning the
    /// last-known reading regardless of its age.
    pub fn get_property(&self, prop: Property) -> Result<PropertyValue, QueryError> {
        let state = self.cache.lock();
        let stale = state.last_update.elapsed() > Self::DATA_TIMEOUT;

        match prop {
            Property::Status => Ok(PropertyValue::Status(if state.charger_active {
                BatteryStatus::Charging
            } else {
                BatteryStatus::Discharging
            })),
            Property::Present => Ok(PropertyValue::Bool(!stale)),
            Property::VoltageNow => Ok(PropertyValue::Int(state.bus_voltage_mv * 1000)),
            Property::CurrentNow => Ok(PropertyValue::Int(state.current_ma * 1000)),
            Property::PowerNow => Ok(PropertyValue::Int(state.power_mw * 1000)),
            Property::Capacity => Ok(PropertyValue::Int(capacity_percent(state.bus_voltage_mv))),
            Property::CapacityAlertMin => Ok(PropertyValue::Int(Self::CAPACITY_ALERT_MIN_PCT)),
            Property::ModelName => Ok(PropertyValue::Str(Self::MODEL_NAME)),
            Property::Manufacturer => Ok(PropertyValue::Str(Self::MANUFACTURER)),
            Property::Technology | Property::CycleCount => Err(QueryError::Unsupported(prop)),
        }
    }

    /// Stop the background sampler and release the transport.
    ///
    /// Does not return until the sampler task has fully exited; no register
    /// transaction is issued after that point.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.sampler.await;
    }

    /// One-time sensor setup: liveness probe, configuration and calibration
    /// writes, then diagnostic read-backs.
    async fn initialize<T: RegisterTransport>(transport: &mut T) -> Result<(), InitError> {
        info!("initializing INA219 with config={CONFIG_WORD:#06x}, calib={CALIBRATION_WORD:#06x}");

        // A plain read first, to verify the device is reachable at all.
        let raw = transport
            .read_register(Register::Config)
            .await
            .map_err(InitError::Unreachable)?;
        info!("current config register (raw): {raw:#06x}");

        transport
            .write_register(Register::Config, register::swap_word(CONFIG_WORD))
            .await
            .map_err(InitError::ConfigWriteFailed)?;
        transport
            .write_register(Register::Calibration, register::swap_word(CALIBRATION_WORD))
            .await
            .map_err(InitError::CalibrationWriteFailed)?;

        time::sleep(Self::SETTLE_DELAY).await;

        // Read-backs are diagnostic only. A mismatch is logged but not
        // fatal: some clones report garbage here yet measure fine.
        match transport.read_register(Register::Config).await {
            Ok(raw) => {
                let readback = register::swap_word(raw);
                info!("configuration readback: {readback:#06x} (expected: {CONFIG_WORD:#06x})");
            }
            Err(err) => warn!("configuration readback failed: {err}"),
        }
        match transport.read_register(Register::Calibration).await {
            Ok(raw) => {
                let readback = register::swap_word(raw);
                info!("calibration readback: {readback:#06x} (expected: {CALIBRATION_WORD:#06x})");
            }
            Err(err) => warn!("calibration readback failed: {err}"),
        }
        match transport.read_register(Register::BusVoltage).await {
            Ok(raw) => {
                let mv = register::decode_bus_voltage(raw);
                info!(
                    "bus voltage register: {:#06x} ({mv} mV)",
                    register::swap_word(raw)
                );
            }
            Err(err) => warn!("bus voltage test read failed: {err}"),
        }

        Ok(())
    }

    /// The background sampler.
    ///
    /// Each cycle reads the four measurement registers in a fixed order and
    /// updates the cache field by field, so one failed read leaves only its
    /// own field stale. A failed read is logged and dropped; nothing short
    /// of a stop request ends the loop.
    async fn sample_loop<T: RegisterTransport>(
        mut transport: T,
        cache: Arc<Mutex<CachedState>>,
        mut stop_rx: watch::Receiver<()>,
    ) {
        loop {
            match transport.read_register(Register::ShuntVoltage).await {
                Ok(raw) => {
                    let decoded = register::decode_shunt_voltage(raw);
                    cache.lock().shunt_voltage_10uv = decoded;
                }
                Err(err) => warn!("failed to read shunt voltage: {err}"),
            }

            match transport.read_register(Register::BusVoltage).await {
                Ok(raw) => {
                    let decoded = register::decode_bus_voltage(raw);
                    cache.lock().bus_voltage_mv = decoded;
                }
                Err(err) => warn!("failed to read bus voltage: {err}"),
            }

            match transport.read_register(Register::Current).await {
                Ok(raw) => {
                    let decoded = register::decode_current(raw);
                    let charger_active = decoded > Self::CHARGER_ACTIVE_THRESHOLD_MA;
                    // Current and charger status must agree, so both are
                    // written in the same critical section.
                    let mut state = cache.lock();
                    state.current_ma = decoded;
                    state.charger_active = charger_active;
                }
                Err(err) => warn!("failed to read current: {err}"),
            }

            let power_read_ok = match transport.read_register(Register::Power).await {
                Ok(raw) => {
                    let decoded = register::decode_power(raw);
                    cache.lock().power_mw = decoded;
                    true
                }
                Err(err) => {
                    warn!("failed to read power: {err}");
                    false
                }
            };

            // The freshness stamp follows the final read of the cycle, as
            // the original driver did. A chip that fails only the power
            // read will look perpetually absent.
            if power_read_ok {
                let mut state = cache.lock();
                state.last_update = Instant::now();
                debug!(
                    "cycle complete: shunt={} x10uV bus={} mV current={} mA power={} mW",
                    state.shunt_voltage_10uv,
                    state.bus_voltage_mv,
                    state.current_ma,
                    state.power_mw
                );
            }

            // Sleep out the rest of the period, waking early on a stop
            // request or if the monitor handle was dropped.
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = time::sleep(Self::SAMPLE_PERIOD) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An in-memory sensor standing in for the real transport. Words are
    /// stored as the bus would deliver them (little-endian); test failure
    /// injection is per register and can change while the sampler runs.
    #[derive(Clone, Default)]
    struct FakeTransport {
        inner: Arc<Mutex<FakeInner>>,
    }

    #[derive(Default)]
    struct FakeInner {
        words: [u16; 6],
        fail_read: [bool; 6],
        fail_write: [bool; 6],
        written: Vec<(Register, u16)>,
        reads: usize,
    }

    impl FakeTransport {
        /// Store a register value as the chip itself would hold it.
        fn set_chip_value(&self, reg: Register, value: u16) {
            self.inner.lock().words[reg.addr() as usize] = register::swap_word(value);
        }

        fn fail_reads(&self, reg: Register) {
            self.inner.lock().fail_read[reg.addr() as usize] = true;
        }

        fn fail_all_reads(&self) {
            self.inner.lock().fail_read = [true; 6];
        }

        fn fail_writes(&self, reg: Register) {
            self.inner.lock().fail_write[reg.addr() as usize] = true;
        }

        fn written(&self) -> Vec<(Register, u16)> {
            self.inner.lock().written.clone()
        }

        fn read_count(&self) -> usize {
            self.inner.lock().reads
        }
    }

    impl RegisterTransport for FakeTransport {
        async fn read_register(&mut self, reg: Register) -> Result<u16, TransportError> {
            let mut inner = self.inner.lock();
            inner.reads += 1;
            if inner.fail_read[reg.addr() as usize] {
                return Err(TransportError::Nak);
            }
            Ok(inner.words[reg.addr() as usize])
        }

        async fn write_register(&mut self, reg: Register, word: u16) -> Result<(), TransportError> {
            let mut inner = self.inner.lock();
            if inner.fail_write[reg.addr() as usize] {
                return Err(TransportError::Nak);
            }
            inner.words[reg.addr() as usize] = word;
            inner.written.push((reg, word));
            Ok(())
        }
    }

    /// A fake reporting an 11.4V rail charging at 70mA.
    fn healthy_fake() -> FakeTransport {
        let fake = FakeTransport::default();
        fake.set_chip_value(Register::ShuntVoltage, 0x0032);
        fake.set_chip_value(Register::BusVoltage, 2850 << 3);
        fake.set_chip_value(Register::Current, 70);
        fake.set_chip_value(Register::Power, 5);
        fake
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_populates_cache() {
        let fake = healthy_fake();
        let monitor = UpsMonitor::new(fake).await.unwrap();
        time::sleep(Duration::from_millis(1)).await;

        let p = |prop| monitor.get_property(prop).unwrap();
        assert_eq!(p(Property::CurrentNow), PropertyValue::Int(70_000));
        assert_eq!(
            p(Property::Status),
            PropertyValue::Status(BatteryStatus::Charging)
        );
        assert_eq!(p(Property::PowerNow), PropertyValue::Int(100_000));
        assert_eq!(p(Property::VoltageNow), PropertyValue::Int(11_400_000));
        assert_eq!(p(Property::Capacity), PropertyValue::Int(66));
        assert_eq!(p(Property::Present), PropertyValue::Bool(true));
        assert_eq!(
            p(Property::ModelName),
            PropertyValue::Str("UPS-Module-3S")
        );
        assert_eq!(p(Property::Manufacturer), PropertyValue::Str("WaveShare"));
        assert_eq!(p(Property::CapacityAlertMin), PropertyValue::Int(5));

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_reports_absent_but_keeps_values() {
        let fake = healthy_fake();
        let monitor = UpsMonitor::new(fake.clone()).await.unwrap();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            monitor.get_property(Property::Present).unwrap(),
            PropertyValue::Bool(true)
        );

        // The sensor drops off the bus; every later cycle fails.
        fake.fail_all_reads();
        time::sleep(Duration::from_millis(6000)).await;

        assert_eq!(
            monitor.get_property(Property::Present).unwrap(),
            PropertyValue::Bool(false)
        );
        // Other properties still serve the last cached reading.
        assert_eq!(
            monitor.get_property(Property::CurrentNow).unwrap(),
            PropertyValue::Int(70_000)
        );
        assert_eq!(
            monitor.get_property(Property::VoltageNow).unwrap(),
            PropertyValue::Int(11_400_000)
        );

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_register_read_leaves_only_that_field_stale() {
        let fake = healthy_fake();
        fake.fail_reads(Register::Current);
        let monitor = UpsMonitor::new(fake).await.unwrap();
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            monitor.get_property(Property::VoltageNow).unwrap(),
            PropertyValue::Int(11_400_000)
        );
        assert_eq!(
            monitor.get_property(Property::PowerNow).unwrap(),
            PropertyValue::Int(100_000)
        );
        // Current and charger status keep their prior (initial) values.
        assert_eq!(
            monitor.get_property(Property::CurrentNow).unwrap(),
            PropertyValue::Int(0)
        );
        assert_eq!(
            monitor.get_property(Property::Status).unwrap(),
            PropertyValue::Status(BatteryStatus::Discharging)
        );
        // The final (power) read succeeded, so the data is fresh.
        assert_eq!(
            monitor.get_property(Property::Present).unwrap(),
            PropertyValue::Bool(true)
        );

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_stamp_tracks_the_power_read() {
        let fake = healthy_fake();
        fake.fail_reads(Register::Power);
        let monitor = UpsMonitor::new(fake).await.unwrap();
        time::sleep(Duration::from_millis(6000)).await;

        // Voltage keeps updating every cycle, but without a successful
        // power read the stamp never advances and the battery reports
        // as absent.
        assert_eq!(
            monitor.get_property(Property::VoltageNow).unwrap(),
            PropertyValue::Int(11_400_000)
        );
        assert_eq!(
            monitor.get_property(Property::Present).unwrap(),
            PropertyValue::Bool(false)
        );

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_device_fails_construction() {
        let fake = healthy_fake();
        fake.fail_reads(Register::Config);
        let result = UpsMonitor::new(fake).await;
        assert!(matches!(result, Err(InitError::Unreachable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_write_failure_fails_construction() {
        let fake = healthy_fake();
        fake.fail_writes(Register::Config);
        let result = UpsMonitor::new(fake).await;
        assert!(matches!(result, Err(InitError::ConfigWriteFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_write_failure_is_not_fatal() {
        let fake = healthy_fake();
        fake.fail_writes(Register::Calibration);
        let monitor = UpsMonitor::new(fake).await.unwrap();
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            monitor.get_property(Property::Present).unwrap(),
            PropertyValue::Bool(true)
        );

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialization_writes_byte_swapped_words() {
        let fake = healthy_fake();
        let monitor = UpsMonitor::new(fake.clone()).await.unwrap();

        let written = fake.written();
        assert_eq!(written[0], (Register::Config, register::swap_word(0x3def)));
        assert_eq!(
            written[1],
            (Register::Calibration, register::swap_word(0x1000))
        );

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_all_sampling() {
        let fake = healthy_fake();
        let monitor = UpsMonitor::new(fake.clone()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        monitor.stop().await;
        let reads_at_stop = fake.read_count();
        time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(fake.read_count(), reads_at_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_property_is_rejected() {
        let monitor = UpsMonitor::new(healthy_fake()).await.unwrap();
        assert!(matches!(
            monitor.get_property(Property::CycleCount),
            Err(QueryError::Unsupported(Property::CycleCount))
        ));
        assert!(matches!(
            monitor.get_property(Property::Technology),
            Err(QueryError::Unsupported(Property::Technology))
        ));
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_queries_see_only_complete_updates() {
        let fake = healthy_fake();
        let monitor = Arc::new(UpsMonitor::new(fake).await.unwrap());

        let mut readers = Vec::new();
        for _ in 0..4 {
            let monitor = Arc::clone(&monitor);
            readers.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let value = monitor.get_property(Property::VoltageNow).unwrap();
                    // Either the zero-initialized cache or a fully
                    // decoded sample, never anything in between.
                    assert!(
                        value == PropertyValue::Int(0) || value == PropertyValue::Int(11_400_000),
                        "torn read: {value:?}"
                    );
                    tokio::task::yield_now().await;
                }
            }));
        }
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
