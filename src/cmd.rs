//! Target command definition and pulse device parameter serialization

use std::fmt;
use crate::units::{ Volt, Nanosecond, Microsecond, Millisecond };

/// Commands understood by the target firmware
///
/// Commands are plain ASCII and are terminated by the link with `CR LF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCmd
{
    /// Select the operating mode of the target before baselining
    ///
    /// Command: `MODE:<n>`
    SelectMode(String),
    /// Run one cryptographic operation and stream back the response block
    ///
    /// Command: `START`
    Start,
}

impl fmt::Display for TargetCmd
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::SelectMode(mode) => write!(f, "MODE:{}", mode),
            Self::Start => f.write_str("START"),
        }
    }
}

/// A single settable parameter of the pulse device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceParam
{
    Voltage(Volt),
    PulseWidth(Nanosecond),
    /// Number of pulses in one burst
    PulseRepeat(u32),
    Deadtime(Millisecond),
    /// Silences the device's audible arm/fire indicator
    Mute(bool),
    /// Only available on devices with a trigger offset control
    TriggerOffset(Microsecond),
}

impl DeviceParam
{
    /// A short human readable name of the parameter, independent of its value
    pub fn name(&self) -> &'static str
    {
        match self {
            Self::Voltage(_) => "voltage",
            Self::PulseWidth(_) => "pulse width",
            Self::PulseRepeat(_) => "pulse repeat",
            Self::Deadtime(_) => "deadtime",
            Self::Mute(_) => "mute",
            Self::TriggerOffset(_) => "trigger offset",
        }
    }
}

impl fmt::Display for DeviceParam
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Voltage(volts) => write!(f, "{} = {}", self.name(), volts),
            Self::PulseWidth(width) => write!(f, "{} = {}", self.name(), width),
            Self::PulseRepeat(count) => write!(f, "{} = {}", self.name(), count),
            Self::Deadtime(deadtime) => write!(f, "{} = {}", self.name(), deadtime),
            Self::Mute(mute) => write!(f, "{} = {}", self.name(), if *mute { "on" } else { "off" }),
            Self::TriggerOffset(offset) => write!(f, "{} = {}", self.name(), offset),
        }
    }
}
