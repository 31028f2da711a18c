//! fdm_hardware: hardware and simulation backends behind `fdm_traits`.
//!
//! Features:
//! - `hardware`: enable Raspberry Pi GPIO/SPI-backed implementations.
//! - (default) no `hardware` feature: use simulation types that satisfy the
//!   traits.
//!
//! Note: The `rppal` dependency is optional and only enabled when the
//! `hardware` feature is active, so CI on x86 builds without GPIO libs.

pub mod error;

#[cfg(feature = "hardware")]
mod mcp3008;

#[cfg(not(feature = "hardware"))]
pub mod sim {
    use fdm_traits::{AdcChannel, HeaterPin};
    use std::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

    /// Simulated thermistor channel with an optional first-order thermal
    /// plant: each read nudges the reading toward an ambient-or-heated
    /// equilibrium depending on the paired heater pin level.
    pub struct SimThermistor {
        raw: Arc<AtomicU16>,
        heater_level: Option<Arc<AtomicBool>>,
        /// Raw value drifted toward when the heater is off.
        ambient_raw: u16,
        /// Raw value drifted toward while the heater is on (NTC: lower is
        /// hotter).
        heated_raw: u16,
        /// Approach step per read, in raw counts.
        slew: u16,
    }

    impl SimThermistor {
        /// Fixed reading, no plant.
        pub fn fixed(raw: u16) -> Self {
            Self {
                raw: Arc::new(AtomicU16::new(raw)),
                heater_level: None,
                ambient_raw: raw,
                heated_raw: raw,
                slew: 0,
            }
        }

        /// Plant model coupled to a heater pin level.
        pub fn with_plant(
            start_raw: u16,
            heated_raw: u16,
            slew: u16,
            heater_level: Arc<AtomicBool>,
        ) -> Self {
            Self {
                raw: Arc::new(AtomicU16::new(start_raw)),
                heater_level: Some(heater_level),
                ambient_raw: start_raw,
                heated_raw,
                slew,
            }
        }

        /// External handle for tests that script the reading directly.
        pub fn raw_handle(&self) -> Arc<AtomicU16> {
            Arc::clone(&self.raw)
        }
    }

    impl AdcChannel for SimThermistor {
        fn start_conversion(&mut self) {}

        fn read(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>> {
            let current = self.raw.load(Ordering::Relaxed);
            if self.slew > 0 {
                let heating = self
                    .heater_level
                    .as_ref()
                    .is_some_and(|level| level.load(Ordering::Relaxed));
                let goal = if heating { self.heated_raw } else { self.ambient_raw };
                let next = if current > goal {
                    current.saturating_sub(self.slew).max(goal)
                } else {
                    current.saturating_add(self.slew).min(goal)
                };
                self.raw.store(next, Ordering::Relaxed);
            }
            Ok(self.raw.load(Ordering::Relaxed))
        }
    }

    /// Simulated heater output; the level is shared so a `SimThermistor`
    /// plant (or a test) can observe it.
    pub struct SimHeaterPin {
        level: Arc<AtomicBool>,
    }

    impl SimHeaterPin {
        pub fn new() -> Self {
            Self {
                level: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn level_handle(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.level)
        }
    }

    impl Default for SimHeaterPin {
        fn default() -> Self {
            Self::new()
        }
    }

    impl HeaterPin for SimHeaterPin {
        fn set_high(&mut self) {
            self.level.store(true, Ordering::Release);
        }

        fn set_low(&mut self) {
            self.level.store(false, Ordering::Release);
        }
    }
}

#[cfg(feature = "hardware")]
pub mod hardware {
    use crate::error::HwError;
    use crate::mcp3008::Mcp3008;
    use anyhow::{Context, Result};
    use fdm_traits::{AdcChannel, HeaterPin};
    use rppal::gpio::{Gpio, OutputPin};
    use std::error::Error;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };
    use std::thread;
    use std::time::Duration;
    use tracing::info;

    /// Heater element on a GPIO output (through an SSR or MOSFET board).
    pub struct GpioHeaterPin {
        pin: OutputPin,
    }

    impl GpioHeaterPin {
        pub fn try_new(bcm_pin: u8) -> Result<Self> {
            let gpio = Gpio::new().context("open GPIO")?;
            let pin = gpio
                .get(bcm_pin)
                .context("get heater pin")?
                .into_output_low();
            info!(bcm_pin, "heater output ready");
            Ok(Self { pin })
        }
    }

    impl HeaterPin for GpioHeaterPin {
        fn set_high(&mut self) {
            self.pin.set_high();
        }

        fn set_low(&mut self) {
            self.pin.set_low();
        }
    }

    /// One MCP3008 channel exposed as an `AdcChannel`.
    pub struct SpiThermistor {
        adc: Mcp3008,
        channel: u8,
    }

    impl SpiThermistor {
        pub fn try_new(channel: u8) -> Result<Self> {
            let adc = Mcp3008::try_new().context("open MCP3008")?;
            Ok(Self { adc, channel })
        }
    }

    impl AdcChannel for SpiThermistor {
        fn start_conversion(&mut self) {
            // The MCP3008 converts within the SPI transaction itself;
            // nothing to kick off ahead of the read.
        }

        fn read(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>> {
            let sample = self.adc.read_channel(self.channel)?;
            if sample > 1023 {
                return Err(Box::new(HwError::BadSample));
            }
            Ok(sample)
        }
    }

    /// E-stop checker: poll a GPIO input on a background thread, expose as
    /// a closure.
    pub fn make_estop_checker(
        pin: u8,
        active_low: bool,
        poll_ms: u64,
    ) -> Result<Box<dyn Fn() -> bool + Send + Sync>> {
        let gpio = Gpio::new().context("open GPIO")?;
        let pin = gpio.get(pin).context("get E-STOP pin")?.into_input();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_bg = flag.clone();
        thread::spawn(move || {
            loop {
                let level_low = pin.read() == rppal::gpio::Level::Low;
                let active = if active_low { level_low } else { !level_low };
                flag_bg.store(active, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(poll_ms.max(1)));
            }
        });
        Ok(Box::new(move || flag.load(Ordering::Relaxed)))
    }
}

// Re-exports for callers (CLI/tests) to pick the right backend easily.
#[cfg(not(feature = "hardware"))]
pub use sim::{SimHeaterPin, SimThermistor};

#[cfg(feature = "hardware")]
pub use hardware::{GpioHeaterPin, SpiThermistor, make_estop_checker};
