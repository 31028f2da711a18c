use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::HwError;

/// MCP3008 10-bit SPI ADC, single-ended mode.
pub struct Mcp3008 {
    spi: rppal::spi::Spi,
}

impl Mcp3008 {
    pub fn try_new() -> Result<Self, HwError> {
        let spi = rppal::spi::Spi::new(
            rppal::spi::Bus::Spi0,
            rppal::spi::SlaveSelect::Ss0,
            1_000_000,
            rppal::spi::Mode::Mode0,
        )
        .map_err(|e| HwError::Spi(e.to_string()))?;
        Ok(Self { spi })
    }

    /// Read one channel (0..=7). Start bit, single-ended flag and channel
    /// go out in the first two bytes; the 10-bit result straddles the
    /// second and third.
    pub fn read_channel(&mut self, channel: u8) -> Result<u16, HwError> {
        if channel > 7 {
            return Err(HwError::BadSample);
        }
        let tx = [0x01, (0x08 | channel) << 4, 0x00];
        let mut rx = [0u8; 3];
        let deadline = Instant::now() + Duration::from_millis(5);
        loop {
            match self.spi.transfer(&mut rx, &tx) {
                Ok(_) => break,
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(HwError::Spi(e.to_string()));
                    }
                }
            }
        }
        let value = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
        trace!(channel, raw = value, "mcp3008 read");
        Ok(value)
    }
}
