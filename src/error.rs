//! Error types for the target link, the pulse device and sweep configuration

use std::io;
use crate::config::Axis;

/// A failure of the line-oriented link to the target board
#[derive(Debug, thiserror::Error)]
pub enum LinkError
{
    #[error("target link is not open")]
    NotOpen,

    #[error("target link was closed by the remote end")]
    Closed,

    #[error("target link I/O error: {0}")]
    Io(#[from] io::Error),

    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// A failure reported by the pulse device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError
{
    /// The device power cycled in the middle of an operation
    ///
    /// This is an expected (if abnormal) condition when firing high voltage pulses next to the
    /// device's own electronics. It is handled by recovering the current grid point rather than
    /// aborting the sweep.
    #[error("pulse device reset detected")]
    Reset,

    /// The device refused the operation because a fault condition is active
    #[error("pulse device fault: {0}")]
    Fault(String),

    #[error("{0} is not supported by this pulse device")]
    Unsupported(&'static str),

    #[error("pulse device I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DeviceError
{
    pub fn is_reset(&self) -> bool
    {
        matches!(self, Self::Reset)
    }
}

/// A sweep configuration which cannot be run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError
{
    #[error("{axis} range ends at {end} before it starts at {start}")]
    InvertedRange { axis: Axis, start: u32, end: u32 },

    #[error("{axis} step must be at least 1")]
    ZeroStep { axis: Axis },

    #[error("pulses per point must be at least 1")]
    NoPulses,

    #[error("pulse repeat {0} is outside 1..=10000")]
    PulseRepeatOutOfRange(u32),

    #[error("deadtime {0}ms is outside 1..=1000ms")]
    DeadtimeOutOfRange(u32),

    #[error("pulse interval {0}s is not a finite, non-negative number of seconds")]
    InvalidInterval(f64),

    #[error("target mode {0:?} must be non-empty and fit on one line")]
    InvalidMode(String),

    #[error("{axis} value {value} is outside the probe limits {min}..={max}")]
    OutsideProbeLimits { axis: Axis, value: u32, min: u32, max: u32 },
}
