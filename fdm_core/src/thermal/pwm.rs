//! Counter-based soft PWM over the heater pins.
//!
//! A per-tick counter wraps modulo 256; a heater output is high while the
//! counter is at or below its duty (and the duty is nonzero). The duty
//! cells are byte-sized atomics written by the controller and read here,
//! so there is no read-modify-write window to race against.

use std::sync::atomic::Ordering;

use fdm_traits::HeaterPin;

use super::control::HeaterOutputs;

pub struct SoftPwm<H: HeaterPin> {
    hotend_pin: H,
    bed_pin: H,
    outputs: HeaterOutputs,
    counter: u8,
}

impl<H: HeaterPin> SoftPwm<H> {
    pub fn new(hotend_pin: H, bed_pin: H, outputs: HeaterOutputs) -> Self {
        Self {
            hotend_pin,
            bed_pin,
            outputs,
            counter: 0,
        }
    }

    /// One PWM tick. While the kill latch is cleared both outputs are
    /// forced low regardless of duty.
    pub fn tick(&mut self) {
        if !self.outputs.enabled.load(Ordering::Acquire) {
            self.hotend_pin.set_low();
            self.bed_pin.set_low();
            return;
        }
        let hotend_duty = self.outputs.hotend_duty.load(Ordering::Acquire);
        let bed_duty = self.outputs.bed_duty.load(Ordering::Acquire);

        let hotend_on = hotend_duty > 0 && self.counter <= hotend_duty;
        let bed_on = bed_duty > 0 && self.counter <= bed_duty;
        self.hotend_pin.set(hotend_on);
        self.bed_pin.set(bed_on);

        self.counter = self.counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingHeaterPin;

    #[test]
    fn zero_duty_never_raises_output() {
        let outputs = HeaterOutputs::default();
        let hotend = RecordingHeaterPin::new();
        let level = hotend.level_handle();
        let mut pwm = SoftPwm::new(hotend, RecordingHeaterPin::new(), outputs);
        for _ in 0..512 {
            pwm.tick();
            assert!(!level.load(Ordering::Relaxed));
        }
    }

    #[test]
    fn duty_cycle_matches_counter_window() {
        let outputs = HeaterOutputs::default();
        outputs.hotend_duty.store(63, Ordering::Release);
        let hotend = RecordingHeaterPin::new();
        let level = hotend.level_handle();
        let mut pwm = SoftPwm::new(hotend, RecordingHeaterPin::new(), outputs);
        let mut high_ticks = 0u32;
        for _ in 0..256 {
            pwm.tick();
            if level.load(Ordering::Relaxed) {
                high_ticks += 1;
            }
        }
        // counter 0..=63 inclusive -> 64 high ticks out of 256.
        assert_eq!(high_ticks, 64);
    }

    #[test]
    fn kill_latch_forces_low_despite_duty() {
        let outputs = HeaterOutputs::default();
        outputs.hotend_duty.store(255, Ordering::Release);
        outputs.enabled.store(false, Ordering::Release);
        let hotend = RecordingHeaterPin::new();
        let level = hotend.level_handle();
        let mut pwm = SoftPwm::new(hotend, RecordingHeaterPin::new(), outputs);
        for _ in 0..16 {
            pwm.tick();
            assert!(!level.load(Ordering::Relaxed));
        }
    }
}
