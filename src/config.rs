//! Sweep configuration and validation
//!
//! A [`SweepConfig`] is only obtainable through [`SweepConfigBuilder::build`], which checks the
//! requested ranges against each other and, if a probe tip is given, against that probe's limits.
//! Once built, a configuration is immutable for the lifetime of a run.

use std::{
    collections::BTreeSet,
    fmt,
    time::Duration,
};
use serde::{ Serialize, Deserialize };
use crate::{
    device::ProbeTip,
    error::ConfigError,
    units::{ Millisecond },
};

/// One of the three swept parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis
{
    Voltage,
    PulseWidth,
    Delay,
}

impl fmt::Display for Axis
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Voltage => f.write_str("voltage"),
            Self::PulseWidth => f.write_str("pulse width"),
            Self::Delay => f.write_str("delay"),
        }
    }
}

/// An inclusive `start..=end` range walked in whole `step`s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRange
{
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

impl AxisRange
{
    pub const fn new(start: u32, end: u32, step: u32) -> Self
    {
        Self {
            start: start,
            end: end,
            step: step,
        }
    }

    /// A range holding only `value`
    pub const fn fixed(value: u32) -> Self
    {
        Self::new(value, value, 1)
    }

    /// Every value the range visits, in ascending order
    ///
    /// An inverted range still yields its start so that a sweep always makes forward progress. A
    /// step of zero is treated as one.
    pub fn values(&self) -> Vec<u32>
    {
        let values: Vec<u32> = (self.start..=self.end)
            .step_by(self.step.max(1) as usize)
            .collect();

        if values.is_empty() {
            vec![self.start]
        }
        else {
            values
        }
    }
}

/// A validated, immutable sweep configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepConfig
{
    voltage: AxisRange,
    pulse_width: AxisRange,
    delay: AxisRange,
    active_axes: BTreeSet<Axis>,
    pulses_per_point: u32,
    pulse_repeat: u32,
    deadtime: Millisecond,
    pulse_interval: Duration,
    target_mode: String,
    probe: Option<ProbeTip>,
}

impl SweepConfig
{
    pub fn builder() -> SweepConfigBuilder
    {
        SweepConfigBuilder::new()
    }

    pub fn range(&self, axis: Axis) -> &AxisRange
    {
        match axis {
            Axis::Voltage => &self.voltage,
            Axis::PulseWidth => &self.pulse_width,
            Axis::Delay => &self.delay,
        }
    }

    pub fn is_active(&self, axis: Axis) -> bool
    {
        self.active_axes.contains(&axis)
    }

    /// The values visited along `axis`; an inactive axis is held at the start of its range
    pub fn axis_values(&self, axis: Axis) -> Vec<u32>
    {
        let range = self.range(axis);

        if self.is_active(axis) {
            range.values()
        }
        else {
            vec![range.start]
        }
    }

    pub fn pulses_per_point(&self) -> u32
    {
        self.pulses_per_point
    }

    pub fn pulse_repeat(&self) -> u32
    {
        self.pulse_repeat
    }

    pub fn deadtime(&self) -> Millisecond
    {
        self.deadtime
    }

    pub fn pulse_interval(&self) -> Duration
    {
        self.pulse_interval
    }

    pub fn target_mode(&self) -> &str
    {
        &self.target_mode
    }

    pub fn probe(&self) -> Option<ProbeTip>
    {
        self.probe
    }
}

/// Collects sweep parameters and validates them into a [`SweepConfig`]
///
/// Unset parameters keep the defaults of the bench setup this tool was written for: 200V to 400V
/// in 50V steps, 80ns to 480ns in 40ns steps, five pulses per point two seconds apart, with the
/// voltage and pulse width axes swept and the delay axis held at 0us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfigBuilder
{
    voltage: AxisRange,
    pulse_width: AxisRange,
    delay: AxisRange,
    active_axes: BTreeSet<Axis>,
    pulses_per_point: u32,
    pulse_repeat: u32,
    deadtime_ms: u32,
    pulse_interval_secs: f64,
    target_mode: String,
    probe: Option<ProbeTip>,
}

impl Default for SweepConfigBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SweepConfigBuilder
{
    pub fn new() -> Self
    {
        Self {
            voltage: AxisRange::new(200, 400, 50),
            pulse_width: AxisRange::new(80, 480, 40),
            delay: AxisRange::new(0, 0, 5),
            active_axes: [Axis::Voltage, Axis::PulseWidth].into_iter().collect(),
            pulses_per_point: 5,
            pulse_repeat: 1,
            deadtime_ms: 10,
            pulse_interval_secs: 2.0,
            target_mode: "1".to_string(),
            probe: None,
        }
    }

    pub fn voltage_range(mut self, range: AxisRange) -> Self
    {
        self.voltage = range;
        self
    }

    pub fn pulse_width_range(mut self, range: AxisRange) -> Self
    {
        self.pulse_width = range;
        self
    }

    pub fn delay_range(mut self, range: AxisRange) -> Self
    {
        self.delay = range;
        self
    }

    /// Replace the set of swept axes
    pub fn active_axes<I>(mut self, axes: I) -> Self
        where I: IntoIterator<Item = Axis>
    {
        self.active_axes = axes.into_iter().collect();
        self
    }

    /// Sweep or hold a single axis, leaving the others untouched
    pub fn sweep(mut self, axis: Axis, active: bool) -> Self
    {
        if active {
            self.active_axes.insert(axis);
        }
        else {
            self.active_axes.remove(&axis);
        }
        self
    }

    pub fn pulses_per_point(mut self, pulses: u32) -> Self
    {
        self.pulses_per_point = pulses;
        self
    }

    pub fn pulse_repeat(mut self, repeat: u32) -> Self
    {
        self.pulse_repeat = repeat;
        self
    }

    pub fn deadtime(mut self, deadtime: Millisecond) -> Self
    {
        self.deadtime_ms = deadtime.get();
        self
    }

    pub fn pulse_interval_secs(mut self, seconds: f64) -> Self
    {
        self.pulse_interval_secs = seconds;
        self
    }

    pub fn target_mode(mut self, mode: impl Into<String>) -> Self
    {
        self.target_mode = mode.into();
        self
    }

    /// Check the configuration against the limits of a probe tip
    pub fn probe(mut self, probe: ProbeTip) -> Self
    {
        self.probe = Some(probe);
        self
    }

    fn check_range(&self, axis: Axis, range: &AxisRange) -> Result<(), ConfigError>
    {
        if !self.active_axes.contains(&axis) {
            return Ok(());
        }

        if range.step == 0 {
            return Err(ConfigError::ZeroStep { axis: axis });
        }

        if range.end < range.start {
            return Err(ConfigError::InvertedRange { axis: axis, start: range.start, end: range.end });
        }

        Ok(())
    }

    fn check_probe(&self, axis: Axis, range: &AxisRange, min: u32, max: u32) -> Result<(), ConfigError>
    {
        let swept_max = if self.active_axes.contains(&axis) { range.end } else { range.start };

        for value in [range.start, swept_max] {
            if value < min || value > max {
                return Err(ConfigError::OutsideProbeLimits { axis: axis, value: value, min: min, max: max });
            }
        }

        Ok(())
    }

    /// Validate the collected parameters
    pub fn build(self) -> Result<SweepConfig, ConfigError>
    {
        self.check_range(Axis::Voltage, &self.voltage)?;
        self.check_range(Axis::PulseWidth, &self.pulse_width)?;
        self.check_range(Axis::Delay, &self.delay)?;

        if self.pulses_per_point == 0 {
            return Err(ConfigError::NoPulses);
        }

        if self.pulse_repeat == 0 || self.pulse_repeat > 10_000 {
            return Err(ConfigError::PulseRepeatOutOfRange(self.pulse_repeat));
        }

        if self.deadtime_ms == 0 || self.deadtime_ms > 1000 {
            return Err(ConfigError::DeadtimeOutOfRange(self.deadtime_ms));
        }

        let pulse_interval = Duration::try_from_secs_f64(self.pulse_interval_secs)
            .map_err(|_| ConfigError::InvalidInterval(self.pulse_interval_secs))?;

        if self.target_mode.is_empty() || self.target_mode.contains(&['\r', '\n'][..]) {
            return Err(ConfigError::InvalidMode(self.target_mode));
        }

        if let Some(probe) = self.probe {
            let limits = probe.limits();
            self.check_probe(Axis::Voltage, &self.voltage, limits.voltage_min.get(), limits.voltage_max.get())?;
            let (pw_min, pw_max) = limits.pulse_width_bounds();
            self.check_probe(Axis::PulseWidth, &self.pulse_width, pw_min.get(), pw_max.get())?;
        }

        Ok(SweepConfig {
            voltage: self.voltage,
            pulse_width: self.pulse_width,
            delay: self.delay,
            active_axes: self.active_axes,
            pulses_per_point: self.pulses_per_point,
            pulse_repeat: self.pulse_repeat,
            deadtime: Millisecond::new(self.deadtime_ms),
            pulse_interval: pulse_interval,
            target_mode: self.target_mode,
            probe: self.probe,
        })
    }
}
