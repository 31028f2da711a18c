//! Test and helper mocks for fdm_core.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fdm_traits::{AdcChannel, Clock, HeaterPin, StepperPort};

/// Manually advanced clock. `sleep` moves virtual time forward instead of
/// blocking, so watch-rise windows, runaway periods, and inactivity
/// timeouts elapse in test time.
///
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    origin: Instant,
    offset_us: Arc<AtomicU64>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.offset_us.fetch_add(us, Ordering::Relaxed);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_micros(self.offset_us.load(Ordering::Relaxed))
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// An ADC channel whose conversion value is set externally (tests, thermal
/// simulations driving the control loop).
pub struct MockAdc {
    value: Arc<AtomicU16>,
}

impl MockAdc {
    pub fn fixed(value: u16) -> Self {
        Self {
            value: Arc::new(AtomicU16::new(value)),
        }
    }

    /// Shared handle so the test can change the reading mid-run.
    pub fn settable(value: u16) -> (Self, Arc<AtomicU16>) {
        let cell = Arc::new(AtomicU16::new(value));
        (
            Self {
                value: Arc::clone(&cell),
            },
            cell,
        )
    }
}

impl AdcChannel for MockAdc {
    fn start_conversion(&mut self) {}

    fn read(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.value.load(Ordering::Relaxed))
    }
}

/// An ADC channel that always errors; exercises the sampler's skip path.
pub struct FailingAdc;

impl AdcChannel for FailingAdc {
    fn start_conversion(&mut self) {}

    fn read(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("adc unavailable")))
    }
}

/// A heater pin that records its level for assertions.
pub struct RecordingHeaterPin {
    level: Arc<AtomicBool>,
}

impl RecordingHeaterPin {
    pub fn new() -> Self {
        Self {
            level: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn level_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.level)
    }
}

impl Default for RecordingHeaterPin {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaterPin for RecordingHeaterPin {
    fn set_high(&mut self) {
        self.level.store(true, Ordering::Release);
    }

    fn set_low(&mut self) {
        self.level.store(false, Ordering::Release);
    }
}

/// A stepper port that ignores everything; for planners whose consumer side
/// is driven directly through the queue in tests.
#[derive(Default)]
pub struct NullStepperPort;

impl StepperPort for NullStepperPort {
    fn wake(&self) {}

    fn stop(&self) {}

    fn position(&self, _axis: usize) -> i32 {
        0
    }

    fn set_position(&self, _axis: usize, _steps: i32) {}
}
