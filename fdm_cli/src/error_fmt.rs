//! Map typed core errors to operator-facing guidance.

use fdm_core::error::{PlanError, ThermalFault};

pub fn humanize(err: &eyre::Report) -> String {
    if let Some(fault) = err.downcast_ref::<ThermalFault>() {
        return match fault {
            ThermalFault::Runaway => {
                "What happened: Thermal runaway protection tripped.\nLikely causes: Thermistor detached from the heater block, or the heater cartridge fell out.\nHow to fix: Power off, check that the sensor and cartridge are seated, then power cycle.".to_string()
            }
            ThermalFault::WatchRiseFailed => {
                "What happened: The heater did not warm up after its setpoint was applied.\nLikely causes: Broken heater cartridge, bad wiring, or a blown fuse/MOSFET.\nHow to fix: Check heater wiring and resistance, then power cycle.".to_string()
            }
            ThermalFault::HotendMaxTemp | ThermalFault::BedMaxTemp => {
                "What happened: A temperature reading exceeded the calibrated maximum.\nLikely causes: Shorted thermistor or a stuck heater driver.\nHow to fix: Inspect the sensor wiring and the heater MOSFET, then power cycle.".to_string()
            }
            ThermalFault::HotendMinTemp | ThermalFault::BedMinTemp => {
                "What happened: A temperature reading fell below the calibrated minimum while heating.\nLikely causes: Open-circuit or disconnected thermistor.\nHow to fix: Reconnect or replace the sensor, then power cycle.".to_string()
            }
        };
    }

    if let Some(pe) = err.downcast_ref::<PlanError>() {
        return match pe {
            PlanError::QueueFull => "What happened: The planner ring stayed full.\nLikely causes: The step consumer is not draining blocks.\nHow to fix: Check that the consumer side is running.".to_string(),
            PlanError::BadExtruder(idx) => format!(
                "What happened: Extruder index {idx} does not exist.\nHow to fix: Use tool index below the configured extruder count."
            ),
            PlanError::BadTarget => "What happened: A move target contained a non-finite coordinate.\nHow to fix: Fix the offending line in the move file.".to_string(),
        };
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!("Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {err}")
}
