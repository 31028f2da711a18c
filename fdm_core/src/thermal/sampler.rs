//! Periodic ADC oversampling pipeline.
//!
//! A four-state machine advanced once per timer tick: initiate the hotend
//! conversion, read it, initiate the bed conversion, read it. Reads
//! accumulate into running averages; completing the bed read publishes a
//! coherent (hotend, bed) pair to the control side. The consumer sees
//! either a whole old pair or a whole fresh one, never a mix.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_channel as xch;
use fdm_traits::{AdcChannel, Clock};
use tracing::trace;

use super::table::OVERSAMPLE;

/// One coherent pair of oversampled raw readings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPair {
    pub hotend: u16,
    pub bed: u16,
}

#[derive(Clone, Copy, Debug)]
enum SensorState {
    InitHotend,
    ReadHotend,
    InitBed,
    ReadBed,
}

/// Windowed running average in oversampled raw units.
///
/// Each push retires the current average and adds the new sample, so the
/// window converges without storing its history.
#[derive(Clone, Copy, Debug, Default)]
struct RunningAverage {
    sum: u32,
}

const AVG_WINDOW: u32 = 32;

impl RunningAverage {
    fn get(&self) -> u16 {
        (self.sum / AVG_WINDOW) as u16
    }

    fn push(&mut self, value: u16) {
        self.sum = self.sum - u32::from(self.get()) + u32::from(value);
    }
}

/// Consumer handle: latest pair plus a freshness watchdog input.
pub struct RawFeed {
    rx: xch::Receiver<RawPair>,
    last_ok_ms: Arc<AtomicU64>,
}

impl RawFeed {
    /// Drain the channel and return the most recent pair, if any arrived
    /// since the last call.
    pub fn latest(&self) -> Option<RawPair> {
        self.rx.try_iter().last()
    }

    /// Milliseconds since the sampler last published.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok_ms.load(Ordering::Relaxed))
    }
}

pub struct AdcSampler<A: AdcChannel> {
    hotend: A,
    bed: A,
    state: SensorState,
    hotend_avg: RunningAverage,
    bed_avg: RunningAverage,
    tx: xch::Sender<RawPair>,
    last_ok_ms: Arc<AtomicU64>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
}

impl<A: AdcChannel> AdcSampler<A> {
    pub fn new(hotend: A, bed: A, clock: Arc<dyn Clock + Send + Sync>) -> (Self, RawFeed) {
        let (tx, rx) = xch::bounded(1);
        let last_ok_ms = Arc::new(AtomicU64::new(0));
        let epoch = clock.now();
        let sampler = Self {
            hotend,
            bed,
            state: SensorState::InitHotend,
            hotend_avg: RunningAverage::default(),
            bed_avg: RunningAverage::default(),
            tx,
            last_ok_ms: Arc::clone(&last_ok_ms),
            clock,
            epoch,
        };
        let feed = RawFeed { rx, last_ok_ms };
        (sampler, feed)
    }

    /// Advance the state machine one step. Called from the periodic tick.
    ///
    /// A failed read keeps the previous average; the control side's
    /// freshness watchdog covers a persistently dead sensor.
    pub fn tick(&mut self) {
        self.state = match self.state {
            SensorState::InitHotend => {
                self.hotend.start_conversion();
                SensorState::ReadHotend
            }
            SensorState::ReadHotend => {
                match self.hotend.read() {
                    Ok(sample) => self.hotend_avg.push(sample.min(1023) * OVERSAMPLE),
                    Err(e) => trace!(error = %e, "hotend adc read failed"),
                }
                SensorState::InitBed
            }
            SensorState::InitBed => {
                self.bed.start_conversion();
                SensorState::ReadBed
            }
            SensorState::ReadBed => {
                match self.bed.read() {
                    Ok(sample) => self.bed_avg.push(sample.min(1023) * OVERSAMPLE),
                    Err(e) => trace!(error = %e, "bed adc read failed"),
                }
                let pair = RawPair {
                    hotend: self.hotend_avg.get(),
                    bed: self.bed_avg.get(),
                };
                // bounded(1): a pair the consumer never picked up is simply
                // superseded four ticks later.
                let _ = self.tx.try_send(pair);
                let now = self.clock.ms_since(self.epoch);
                self.last_ok_ms.store(now, Ordering::Relaxed);
                SensorState::InitHotend
            }
        };
    }
}
