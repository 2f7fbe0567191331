//! Pulse device API and probe tip limits
//!
//! # Purpose
//! The fault injection hardware is an external collaborator: this crate does not speak its wire
//! protocol, it only drives it through the [`PulseDevice`] trait. An implementation wraps whatever
//! vendor library or serial protocol the actual glitcher uses.
//!
//! # Device Reset
//! Firing high voltage pulses close to the device's own electronics occasionally makes it power
//! cycle in the middle of an operation. Implementations report this as [`DeviceError::Reset`] from
//! whichever call observed it, so that the sweep engine can abandon the current grid point and
//! carry on instead of treating it as a hard failure.
//!
//! # Probe Tips
//! Each injection probe tip has its own safe voltage range and a voltage dependent window of usable
//! pulse widths. [`ProbeTip::limits`] describes these so that sweeps can be validated before any
//! charge is applied.

use async_trait::async_trait;
use serde::{ Serialize, Deserialize };
use crate::{
    cmd::DeviceParam,
    error::DeviceError,
    units::{ Volt, Nanosecond },
};

/// The operations the sweep engine needs from the fault injection hardware
///
/// All calls may fail with [`DeviceError::Reset`]. [`disarm`](PulseDevice::disarm) must be
/// idempotent since it is called before every parameter change and again on every exit path.
#[async_trait]
pub trait PulseDevice: Send
{
    /// Program one parameter
    ///
    /// Parameters must only be changed while disarmed.
    async fn set(&mut self, param: DeviceParam) -> Result<(), DeviceError>;

    /// Whether [`DeviceParam::TriggerOffset`] can be programmed on this device
    fn supports_trigger_offset(&self) -> bool
    {
        false
    }

    /// Enable the high voltage output stage
    async fn arm(&mut self) -> Result<(), DeviceError>;

    /// Disable the high voltage output stage
    async fn disarm(&mut self) -> Result<(), DeviceError>;

    async fn is_armed(&mut self) -> Result<bool, DeviceError>;

    /// Fire a pulse burst from software
    ///
    /// Sweeps are synchronized by the target's hardware trigger and never call this.
    async fn fire(&mut self) -> Result<(), DeviceError>;

    /// Clear the currently active faults
    async fn clear_faults(&mut self) -> Result<(), DeviceError>;

    /// Describe the currently active faults, if any
    async fn read_faults(&mut self) -> Result<Vec<String>, DeviceError>
    {
        Ok(Vec::new())
    }
}

/// An electromagnetic injection probe tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeTip
{
    /// 4mm coil
    #[serde(rename = "4mm")]
    Mm4,
    /// 1mm coil
    #[serde(rename = "1mm")]
    Mm1,
}

/// One row of a probe's pulse width table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseWidthWindow
{
    pub voltage: u32,
    pub pulse_width_min: u32,
    pub pulse_width_max: u32,
}

macro_rules! window
{
    ( $voltage:literal => $min:literal ..= $max:literal ) => {
        PulseWidthWindow { voltage: $voltage, pulse_width_min: $min, pulse_width_max: $max }
    };
}

/// Voltage and pulse width limits of a probe tip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLimits
{
    pub voltage_min: Volt,
    pub voltage_max: Volt,
    /// Usable pulse widths at increasing voltages
    pub table: &'static [PulseWidthWindow],
}

static MM4_TABLE: [PulseWidthWindow; 8] = [
    window!(125 => 38..=500),
    window!(150 => 35..=400),
    window!(200 => 30..=270),
    window!(250 => 27..=200),
    window!(300 => 24..=160),
    window!(325 => 28..=140),
    window!(350 => 26..=130),
    window!(400 => 25..=105),
];

static MM1_TABLE: [PulseWidthWindow; 6] = [
    window!(110 => 33..=82),
    window!(150 => 26..=55),
    window!(200 => 21..=38),
    window!(250 => 18..=28),
    window!(290 => 16..=22),
    window!(300 => 16..=20),
];

impl ProbeTip
{
    pub fn limits(&self) -> ProbeLimits
    {
        match self {
            Self::Mm4 => ProbeLimits {
                voltage_min: Volt::new(125),
                voltage_max: Volt::new(400),
                table: &MM4_TABLE,
            },
            Self::Mm1 => ProbeLimits {
                voltage_min: Volt::new(110),
                voltage_max: Volt::new(300),
                table: &MM1_TABLE,
            },
        }
    }
}

impl ProbeLimits
{
    /// The narrowest and widest pulse usable at any voltage
    pub fn pulse_width_bounds(&self) -> (Nanosecond, Nanosecond)
    {
        let min = self.table.iter().map(|row| row.pulse_width_min).min().unwrap_or(0);
        let max = self.table.iter().map(|row| row.pulse_width_max).max().unwrap_or(0);

        (Nanosecond::new(min), Nanosecond::new(max))
    }

    /// The usable pulse width window at `voltage`
    ///
    /// Linearly interpolates between table rows. Voltages outside the table are clamped to its
    /// first or last row.
    pub fn pulse_width_limits(&self, voltage: Volt) -> (Nanosecond, Nanosecond)
    {
        let (first, last) = match (self.table.first(), self.table.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return (Nanosecond::new(0), Nanosecond::new(0)),
        };
        let voltage = voltage.get().clamp(first.voltage, last.voltage);

        for pair in self.table.windows(2) {
            let (low, high) = (&pair[0], &pair[1]);

            if low.voltage <= voltage && voltage <= high.voltage {
                if low.voltage == high.voltage {
                    return (Nanosecond::new(low.pulse_width_min), Nanosecond::new(low.pulse_width_max));
                }

                let t = (voltage - low.voltage) as f64 / (high.voltage - low.voltage) as f64;
                let lerp = |a: u32, b: u32| (a as f64 + t * (b as f64 - a as f64)).round() as u32;

                return (
                    Nanosecond::new(lerp(low.pulse_width_min, high.pulse_width_min)),
                    Nanosecond::new(lerp(low.pulse_width_max, high.pulse_width_max)),
                );
            }
        }

        (Nanosecond::new(last.pulse_width_min), Nanosecond::new(last.pulse_width_max))
    }

    /// Whether a pulse of `width` is within the window usable at `voltage`
    pub fn allows(&self, voltage: Volt, width: Nanosecond) -> bool
    {
        let (min, max) = self.pulse_width_limits(voltage);
        min <= width && width <= max
    }
}

#[cfg(test)]
mod tests
{
    use super::ProbeTip;
    use crate::units::{ Volt, Nanosecond };

    #[test]
    fn table_rows_are_exact()
    {
        let limits = ProbeTip::Mm4.limits();
        assert_eq!(limits.pulse_width_limits(Volt::new(300)), (Nanosecond::new(24), Nanosecond::new(160)));
        assert_eq!(limits.pulse_width_limits(Volt::new(125)), (Nanosecond::new(38), Nanosecond::new(500)));
    }

    #[test]
    fn interpolates_between_rows()
    {
        let limits = ProbeTip::Mm4.limits();
        // 20% of the way from 250V (27..=200) to 300V (24..=160)
        assert_eq!(limits.pulse_width_limits(Volt::new(260)), (Nanosecond::new(26), Nanosecond::new(192)));
    }

    #[test]
    fn clamps_outside_table()
    {
        let limits = ProbeTip::Mm1.limits();
        assert_eq!(limits.pulse_width_limits(Volt::new(50)), (Nanosecond::new(33), Nanosecond::new(82)));
        assert_eq!(limits.pulse_width_limits(Volt::new(450)), (Nanosecond::new(16), Nanosecond::new(20)));
    }

    #[test]
    fn global_bounds_span_table()
    {
        assert_eq!(ProbeTip::Mm4.limits().pulse_width_bounds(), (Nanosecond::new(24), Nanosecond::new(500)));
        assert_eq!(ProbeTip::Mm1.limits().pulse_width_bounds(), (Nanosecond::new(16), Nanosecond::new(82)));
    }

    #[test]
    fn allows_checks_envelope()
    {
        let limits = ProbeTip::Mm4.limits();
        assert!(limits.allows(Volt::new(400), Nanosecond::new(100)));
        assert!(!limits.allows(Volt::new(400), Nanosecond::new(480)));
    }
}
