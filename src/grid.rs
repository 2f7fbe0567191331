//! The three dimensional sweep grid

use std::fmt;
use serde::{ Serialize, Deserialize };
use crate::{
    config::{ Axis, SweepConfig },
    units::{ Volt, Nanosecond, Microsecond },
};

/// One cell of the sweep grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint
{
    pub voltage: Volt,
    pub pulse_width: Nanosecond,
    pub delay: Microsecond,
}

impl fmt::Display for GridPoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "V={} PW={} D={}", self.voltage, self.pulse_width, self.delay)
    }
}

/// The Cartesian product of the per-axis value lists
///
/// Points are visited with voltage outermost and delay innermost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepGrid
{
    voltages: Vec<u32>,
    pulse_widths: Vec<u32>,
    delays: Vec<u32>,
}

impl SweepGrid
{
    pub fn from_config(config: &SweepConfig) -> Self
    {
        Self {
            voltages: config.axis_values(Axis::Voltage),
            pulse_widths: config.axis_values(Axis::PulseWidth),
            delays: config.axis_values(Axis::Delay),
        }
    }

    /// Number of levels along one axis
    pub fn levels(&self, axis: Axis) -> usize
    {
        match axis {
            Axis::Voltage => self.voltages.len(),
            Axis::PulseWidth => self.pulse_widths.len(),
            Axis::Delay => self.delays.len(),
        }
    }

    /// Total number of points
    pub fn len(&self) -> usize
    {
        self.voltages.len() * self.pulse_widths.len() * self.delays.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Iterate over every point in traversal order
    pub fn points(&self) -> impl Iterator<Item = GridPoint> + '_
    {
        self.voltages.iter().flat_map(move |voltage| {
            self.pulse_widths.iter().flat_map(move |pulse_width| {
                self.delays.iter().map(move |delay| GridPoint {
                    voltage: Volt::new(*voltage),
                    pulse_width: Nanosecond::new(*pulse_width),
                    delay: Microsecond::new(*delay),
                })
            })
        })
    }
}

impl fmt::Display for SweepGrid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{}V x {}PW x {}Delay = {} points",
            self.voltages.len(),
            self.pulse_widths.len(),
            self.delays.len(),
            self.len(),
        )
    }
}
