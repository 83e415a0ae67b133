//! Runs the monitor against a simulated UPS so the crate can be tried
//! without any hardware attached.

use std::time::Duration;
use upsmon::{Property, Register, RegisterTransport, TransportError, UpsMonitor};

/// A pretend INA219 on a pretend 3-cell pack, slowly discharging.
struct SimulatedUps {
    regs: [u16; 6],
    tick: u16,
}

impl SimulatedUps {
    fn new() -> Self {
        Self {
            regs: [0; 6],
            tick: 0,
        }
    }

    fn chip_value(&self, reg: Register) -> u16 {
        match reg {
            Register::ShuntVoltage => 150,
            Register::BusVoltage => {
                // 12.2V with a 4mV droop per read
                let mv = 12_200u32.saturating_sub(u32::from(self.tick) * 4);
                ((mv as u16) / 4) << 3
            }
            // discharging at 350mA, drawing about 4.2W
            Register::Current => (-350i16) as u16,
            Register::Power => 4200 / 20,
            Register::Config | Register::Calibration => self.regs[reg.addr() as usize],
        }
    }
}

impl RegisterTransport for SimulatedUps {
    async fn read_register(&mut self, reg: Register) -> Result<u16, TransportError> {
        self.tick += 1;
        // deliver little-endian, as a real smbus word read would
        Ok(self.chip_value(reg).swap_bytes())
    }

    async fn write_register(&mut self, reg: Register, word: u16) -> Result<(), TransportError> {
        self.regs[reg.addr() as usize] = word.swap_bytes();
        Ok(())
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let monitor = UpsMonitor::new(SimulatedUps::new()).await?;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        for prop in [
            Property::Status,
            Property::Present,
            Property::VoltageNow,
            Property::CurrentNow,
            Property::PowerNow,
            Property::Capacity,
        ] {
            println!("{prop:?}: {:?}", monitor.get_property(prop)?);
        }
        println!();
    }

    monitor.stop().await;
    Ok(())
}
