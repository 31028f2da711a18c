#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Motion-planning and thermal core of a fused-filament printer (hardware-agnostic).
//!
//! All hardware interactions go through the `fdm_traits` boundary
//! (`HeaterPin`, `AdcChannel`, `StepperPort`, `Clock`).
//!
//! ## Architecture
//!
//! - **Motion**: a fixed-capacity ring of movement blocks, a block builder
//!   that admits Cartesian moves under feedrate/acceleration/jerk limits, a
//!   two-pass look-ahead that relaxes junction entry speeds, and a trapezoid
//!   generator that partitions each block's step events into
//!   accelerate/cruise/decelerate phases (`motion` module).
//! - **Thermal**: a periodic ADC oversampling state machine, a temperature
//!   controller with min/max, watch-rise and thermal-runaway guards, and a
//!   counter-based soft-PWM driver (`thermal` module).
//! - **Protocol**: the serial line discipline (line numbers, XOR checksum,
//!   `ok`/`Resend`) at the upstream boundary (`protocol` module).
//! - **Machine**: the owned root wiring the above, with the kill/emergency
//!   paths (`machine` module).
//!
//! ## Units
//!
//! Positions enter in millimeters and live internally as integer steps.
//! Temperatures are fixed-point [`thermal::Celsius`] (1/16 °C) so the
//! control loop compares in a single integer unit.

pub mod config;
pub mod error;
pub mod machine;
pub mod mocks;
pub mod motion;
pub mod protocol;
pub mod thermal;
pub mod util;

pub use config::{MotionCfg, SafetyCfg, ThermalCfg};
pub use machine::{Machine, MachineState};
pub use motion::block::{Block, BlockFlags, NUM_AXES};
pub use motion::planner::{Axis, Planner};
pub use thermal::Celsius;
