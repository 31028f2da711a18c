//! Temperature sensing, control, and safety: ADC oversampling pipeline,
//! heater duty computation with min/max + watch-rise + runaway guards, and
//! the counter-based soft-PWM driver.

pub mod control;
pub mod pwm;
pub mod sampler;
pub mod table;

pub use control::{HeaterOutputs, TemperatureController, Trend};
pub use pwm::SoftPwm;
pub use sampler::{AdcSampler, RawFeed, RawPair};
pub use table::Celsius;
