//! Physical units for pulse device parameters
//!
//! The pulse device is only ever programmed in whole units of its native resolution: volts for
//! the charge voltage, nanoseconds for the pulse width, microseconds for the trigger offset and
//! milliseconds for the burst deadtime. Each quantity gets its own type so a pulse width can never
//! be handed to the voltage setter by accident.

use std::{
    fmt,
    time::Duration,
};
use serde::{ Serialize, Deserialize };

macro_rules! impl_unit
{
    { $(#[$doc:meta])* $u:ident, $symbol:literal } => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $u
        {
            value: u32,
        }

        impl $u
        {
            /// The written shorthand symbol
            pub const SYMBOL: &'static str = $symbol;

            pub const fn new(value: u32) -> Self
            {
                Self { value: value }
            }

            /// The raw magnitude in this unit
            pub const fn get(&self) -> u32
            {
                self.value
            }

            pub const fn is_zero(&self) -> bool
            {
                self.value == 0
            }
        }

        impl From<u32> for $u
        {
            fn from(this: u32) -> Self
            {
                Self::new(this)
            }
        }

        impl From<$u> for u32
        {
            fn from(this: $u) -> u32
            {
                this.value
            }
        }

        impl fmt::Display for $u
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
            {
                write!(f, "{}{}", self.value, Self::SYMBOL)
            }
        }
    }
}

impl_unit!{
    /// Charge voltage of the pulse generator's capacitor bank
    Volt, "V"
}
impl_unit!{
    /// Width of a single injected pulse
    Nanosecond, "ns"
}
impl_unit!{
    /// Offset between the hardware trigger edge and the injected pulse
    Microsecond, "us"
}
impl_unit!{
    /// Dead time between consecutive pulses of a burst
    Millisecond, "ms"
}

impl From<Millisecond> for Duration
{
    fn from(this: Millisecond) -> Duration
    {
        Duration::from_millis(this.get() as u64)
    }
}

impl From<Microsecond> for Duration
{
    fn from(this: Microsecond) -> Duration
    {
        Duration::from_micros(this.get() as u64)
    }
}

#[cfg(test)]
mod tests
{
    use super::{ Volt, Nanosecond, Microsecond, Millisecond };
    use std::time::Duration;

    #[test]
    fn display_appends_symbol()
    {
        assert_eq!(&format!("{}", Volt::new(300)), "300V");
        assert_eq!(&format!("{}", Nanosecond::new(160)), "160ns");
        assert_eq!(&format!("{}", Microsecond::new(5)), "5us");
        assert_eq!(&format!("{}", Millisecond::new(10)), "10ms");
    }

    #[test]
    fn time_units_convert_to_duration()
    {
        assert_eq!(Duration::from(Millisecond::new(10)), Duration::from_millis(10));
        assert_eq!(Duration::from(Microsecond::new(125)), Duration::from_micros(125));
    }

    #[test]
    fn serializes_as_bare_number()
    {
        let json = serde_json::to_string(&Volt::new(250)).unwrap();
        assert_eq!(json, "250");
        let back: Volt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Volt::new(250));
    }
}
