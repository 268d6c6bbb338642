//! Sensor unit codes (IPMI 2.0 table 43-15)

use std::fmt;

const UNIT_NAMES: [&str; 93] = [
    "unspecified",
    "degrees C",
    "degrees F",
    "degrees K",
    "Volts",
    "Amps",
    "Watts",
    "Joules",
    "Coulombs",
    "VA",
    "Nits",
    "lumen",
    "lux",
    "Candela",
    "kPa",
    "PSI",
    "Newton",
    "CFM",
    "RPM",
    "Hz",
    "microsecond",
    "millisecond",
    "second",
    "minute",
    "hour",
    "day",
    "week",
    "mil",
    "inches",
    "feet",
    "cu in",
    "cu feet",
    "mm",
    "cm",
    "m",
    "cu cm",
    "cu m",
    "liters",
    "fluid ounce",
    "radians",
    "steradians",
    "revolutions",
    "cycles",
    "gravities",
    "ounce",
    "pound",
    "ft-lb",
    "oz-in",
    "gauss",
    "gilberts",
    "henry",
    "millihenry",
    "farad",
    "microfarad",
    "ohms",
    "siemens",
    "mole",
    "becquerel",
    "PPM",
    "reserved",
    "Decibels",
    "DbA",
    "DbC",
    "gray",
    "sievert",
    "color temp deg K",
    "bit",
    "kilobit",
    "megabit",
    "gigabit",
    "byte",
    "kilobyte",
    "megabyte",
    "gigabyte",
    "word",
    "dword",
    "qword",
    "line",
    "hit",
    "miss",
    "retry",
    "reset",
    "overflow",
    "underrun",
    "collision",
    "packets",
    "messages",
    "characters",
    "error",
    "correctable error",
    "uncorrectable error",
    "fatal error",
    "grams",
];

/// Name of a base or modifier unit type code
pub fn unit_name(code: u8) -> &'static str {
    UNIT_NAMES.get(code as usize).copied().unwrap_or("unknown")
}

/// Rate a reading is expressed against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    None,
    PerMicrosecond,
    PerMillisecond,
    PerSecond,
    PerMinute,
    PerHour,
    PerDay,
    Reserved,
}

impl RateUnit {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => RateUnit::None,
            1 => RateUnit::PerMicrosecond,
            2 => RateUnit::PerMillisecond,
            3 => RateUnit::PerSecond,
            4 => RateUnit::PerMinute,
            5 => RateUnit::PerHour,
            6 => RateUnit::PerDay,
            _ => RateUnit::Reserved,
        }
    }

    fn suffix(&self) -> Option<&'static str> {
        match self {
            RateUnit::None | RateUnit::Reserved => None,
            RateUnit::PerMicrosecond => Some("per microsecond"),
            RateUnit::PerMillisecond => Some("per millisecond"),
            RateUnit::PerSecond => Some("per second"),
            RateUnit::PerMinute => Some("per minute"),
            RateUnit::PerHour => Some("per hour"),
            RateUnit::PerDay => Some("per day"),
        }
    }
}

/// How the modifier unit combines with the base unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierUnit {
    None,
    Divide,
    Multiply,
}

impl ModifierUnit {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => ModifierUnit::Divide,
            2 => ModifierUnit::Multiply,
            _ => ModifierUnit::None,
        }
    }
}

/// Units of a sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorUnits {
    pub base: u8,
    pub modifier: u8,
    pub modifier_unit: ModifierUnit,
    pub rate: RateUnit,
    pub percentage: bool,
}

impl SensorUnits {
    pub fn base_name(&self) -> &'static str {
        unit_name(self.base)
    }
}

impl fmt::Display for SensorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.percentage {
            f.write_str("% ")?;
        }
        f.write_str(self.base_name())?;
        match self.modifier_unit {
            ModifierUnit::Divide => write!(f, "/{}", unit_name(self.modifier))?,
            ModifierUnit::Multiply => write!(f, "*{}", unit_name(self.modifier))?,
            ModifierUnit::None => {}
        }
        if let Some(suffix) = self.rate.suffix() {
            write!(f, " {}", suffix)?;
        }
        Ok(())
    }
}
