use thiserror::Error;

/// Errors raised while admitting or planning a move.
#[derive(Debug, Error, Clone)]
pub enum PlanError {
    #[error("planner queue full")]
    QueueFull,
    #[error("extruder index {0} out of range")]
    BadExtruder(u8),
    #[error("non-finite target coordinate")]
    BadTarget,
}

/// Fatal thermal conditions. Any of these kills the machine.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ThermalFault {
    #[error("hotend over maximum temperature")]
    HotendMaxTemp,
    #[error("hotend under minimum temperature")]
    HotendMinTemp,
    #[error("bed over maximum temperature")]
    BedMaxTemp,
    #[error("bed under minimum temperature")]
    BedMinTemp,
    #[error("heating failed: no temperature rise within watch period")]
    WatchRiseFailed,
    #[error("thermal runaway")]
    Runaway,
}

/// Line-discipline failures at the serial boundary. All of these request a
/// resend and never enqueue anything.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    #[error("line number is not last line number + 1")]
    LineNumber { expected: u32 },
    #[error("checksum mismatch")]
    Checksum { expected: u32 },
    #[error("missing checksum with line number")]
    MissingChecksum { expected: u32 },
    #[error("empty or garbled line")]
    Garbled,
}

/// Invalid configuration handed to a constructor. Raised before any state
/// is built, so a rejected config leaves nothing half-wired.
#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
