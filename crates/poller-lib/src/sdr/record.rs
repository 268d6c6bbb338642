//! SDR record decoding
//!
//! Only the full sensor record (type 0x01) is decoded field by field, since
//! it is the only record type carrying a conversion formula. Offsets below
//! are 0-based positions in the record including its 5-byte header.

use super::units::{ModifierUnit, RateUnit, SensorUnits};
use crate::ipmi::{RecordId, SensorNumber};

/// Size of the header common to every SDR record
pub const HEADER_SIZE: usize = 5;

pub const FULL_SENSOR_RECORD: u8 = 0x01;

/// Event/reading type code of threshold based sensors
pub const THRESHOLD_READING_TYPE: u8 = 0x01;

/// Fixed fields of a full sensor record, up to the ID string
const FULL_RECORD_FIXED_LEN: usize = 48;

const BCD_PLUS: &[u8; 16] = b"0123456789 -.:,_";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is {actual} bytes, at least {expected} required")]
    Truncated { expected: usize, actual: usize },
}

/// Header shared by every SDR record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_id: RecordId,
    pub sdr_version: u8,
    pub record_type: u8,
    /// Bytes following the header
    pub length: u8,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        require(bytes, HEADER_SIZE)?;
        Ok(Self {
            record_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            sdr_version: bytes[2],
            record_type: bytes[3],
            length: bytes[4],
        })
    }

    /// Size of the complete record, header included
    pub fn total_size(&self) -> usize {
        self.length as usize + HEADER_SIZE
    }
}

/// A decoded SDR record
#[derive(Debug, Clone, PartialEq)]
pub enum SdrRecord {
    Full(SensorDescriptor),
    Other(RecordHeader),
}

impl SdrRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let header = RecordHeader::parse(bytes)?;
        match header.record_type {
            FULL_SENSOR_RECORD => SensorDescriptor::decode(header, bytes).map(SdrRecord::Full),
            _ => Ok(SdrRecord::Other(header)),
        }
    }
}

/// Representation of the raw reading byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogFormat {
    Unsigned,
    OnesComplement,
    TwosComplement,
    /// The sensor does not return an analog reading
    None,
}

impl AnalogFormat {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AnalogFormat::Unsigned,
            1 => AnalogFormat::OnesComplement,
            2 => AnalogFormat::TwosComplement,
            _ => AnalogFormat::None,
        }
    }

    fn signed_value(&self, raw: u8) -> Option<i32> {
        match self {
            AnalogFormat::Unsigned => Some(raw as i32),
            AnalogFormat::OnesComplement if raw & 0x80 != 0 => Some(raw as i8 as i32 + 1),
            AnalogFormat::OnesComplement => Some(raw as i32),
            AnalogFormat::TwosComplement => Some(raw as i8 as i32),
            AnalogFormat::None => None,
        }
    }
}

/// Linearization function `L` of the conversion formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linearization {
    Linear,
    Ln,
    Log10,
    Log2,
    Exp,
    Exp10,
    Exp2,
    Reciprocal,
    Square,
    Cube,
    SquareRoot,
    CubeRoot,
    /// Non-linear or OEM formula; values are not convertible from the record
    NonLinear(u8),
}

impl Linearization {
    fn from_code(code: u8) -> Self {
        match code & 0x7F {
            0x00 => Linearization::Linear,
            0x01 => Linearization::Ln,
            0x02 => Linearization::Log10,
            0x03 => Linearization::Log2,
            0x04 => Linearization::Exp,
            0x05 => Linearization::Exp10,
            0x06 => Linearization::Exp2,
            0x07 => Linearization::Reciprocal,
            0x08 => Linearization::Square,
            0x09 => Linearization::Cube,
            0x0A => Linearization::SquareRoot,
            0x0B => Linearization::CubeRoot,
            other => Linearization::NonLinear(other),
        }
    }

    fn apply(&self, x: f64) -> Option<f64> {
        let y = match self {
            Linearization::Linear => x,
            Linearization::Ln => x.ln(),
            Linearization::Log10 => x.log10(),
            Linearization::Log2 => x.log2(),
            Linearization::Exp => x.exp(),
            Linearization::Exp10 => 10f64.powf(x),
            Linearization::Exp2 => x.exp2(),
            Linearization::Reciprocal => x.recip(),
            Linearization::Square => x * x,
            Linearization::Cube => x * x * x,
            Linearization::SquareRoot => x.sqrt(),
            Linearization::CubeRoot => x.cbrt(),
            Linearization::NonLinear(_) => return None,
        };
        y.is_finite().then_some(y)
    }
}

/// Parameters of `y = L[(M * x + B * 10^K1) * 10^K2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub format: AnalogFormat,
    pub linearization: Linearization,
    pub m: i16,
    pub b: i16,
    /// K1
    pub b_exp: i8,
    /// K2
    pub r_exp: i8,
    /// In +/- half raw counts
    pub tolerance: u8,
    pub accuracy: u16,
    pub accuracy_exp: u8,
}

impl Conversion {
    /// Whether raw readings of this sensor can be converted at all
    pub fn is_convertible(&self) -> bool {
        self.format != AnalogFormat::None
            && !matches!(self.linearization, Linearization::NonLinear(_))
    }

    /// Convert a raw reading to engineering units
    pub fn convert(&self, raw: u8) -> Option<f64> {
        let x = self.format.signed_value(raw)?;
        let value = (self.m as i32 * x) as f64 + scale(self.b as f64, self.b_exp);
        self.linearization.apply(scale(value, self.r_exp))
    }
}

/// Multiply by `10^exp`, dividing for negative exponents to keep decimal results exact
fn scale(value: f64, exp: i8) -> f64 {
    if exp >= 0 {
        value * 10f64.powi(exp as i32)
    } else {
        value / 10f64.powi(-(exp as i32))
    }
}

/// Threshold values in engineering units, present only when readable
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Thresholds {
    pub upper_non_recoverable: Option<f64>,
    pub upper_critical: Option<f64>,
    pub upper_non_critical: Option<f64>,
    pub lower_non_recoverable: Option<f64>,
    pub lower_critical: Option<f64>,
    pub lower_non_critical: Option<f64>,
}

impl Thresholds {
    fn decode(readable_mask: u8, raw: &[u8], conversion: &Conversion) -> Self {
        let threshold = |bit: u8, value: u8| {
            (readable_mask & (1 << bit) != 0)
                .then(|| conversion.convert(value))
                .flatten()
        };

        Self {
            upper_non_recoverable: threshold(5, raw[0]),
            upper_critical: threshold(4, raw[1]),
            upper_non_critical: threshold(3, raw[2]),
            lower_non_recoverable: threshold(2, raw[3]),
            lower_critical: threshold(1, raw[4]),
            lower_non_critical: threshold(0, raw[5]),
        }
    }
}

/// A parsed full sensor record
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    pub record_id: RecordId,
    pub sensor_number: SensorNumber,
    pub owner_id: u8,
    pub lun: u8,
    pub entity_id: u8,
    pub entity_instance: u8,
    pub sensor_type: u8,
    pub event_reading_type: u8,
    pub name: String,
    pub units: SensorUnits,
    pub conversion: Conversion,
    pub nominal_reading: Option<f64>,
    pub thresholds: Thresholds,
}

impl SensorDescriptor {
    fn decode(header: RecordHeader, bytes: &[u8]) -> Result<Self, RecordError> {
        require(bytes, FULL_RECORD_FIXED_LEN)?;

        let units1 = bytes[20];
        let conversion = Conversion {
            format: AnalogFormat::from_bits(units1 >> 6),
            linearization: Linearization::from_code(bytes[23]),
            m: signed_10bit(bytes[24], bytes[25] >> 6),
            b: signed_10bit(bytes[26], bytes[27] >> 6),
            b_exp: signed_nibble(bytes[29] & 0x0F),
            r_exp: signed_nibble(bytes[29] >> 4),
            tolerance: bytes[25] & 0x3F,
            accuracy: (bytes[27] & 0x3F) as u16 | ((bytes[28] as u16 & 0xF0) << 2),
            accuracy_exp: (bytes[28] >> 2) & 0x03,
        };

        let units = SensorUnits {
            base: bytes[21],
            modifier: bytes[22],
            modifier_unit: ModifierUnit::from_bits(units1 >> 1),
            rate: RateUnit::from_bits(units1 >> 3),
            percentage: units1 & 0x01 != 0,
        };

        let nominal_reading = (bytes[30] & 0x01 != 0)
            .then(|| conversion.convert(bytes[31]))
            .flatten();

        let thresholds = if bytes[13] == THRESHOLD_READING_TYPE {
            Thresholds::decode(bytes[18], &bytes[36..42], &conversion)
        } else {
            Thresholds::default()
        };

        Ok(Self {
            record_id: header.record_id,
            sensor_number: bytes[7],
            owner_id: bytes[5],
            lun: bytes[6] & 0x03,
            entity_id: bytes[8],
            entity_instance: bytes[9],
            sensor_type: bytes[12],
            event_reading_type: bytes[13],
            name: decode_id_string(bytes[47], &bytes[FULL_RECORD_FIXED_LEN..]),
            units,
            conversion,
            nominal_reading,
            thresholds,
        })
    }

    /// Whether live readings of this sensor yield a value
    pub fn has_analog_reading(&self) -> bool {
        self.conversion.is_convertible()
    }

    /// Convert a raw reading of this sensor to engineering units
    pub fn convert(&self, raw: u8) -> Option<f64> {
        self.conversion.convert(raw)
    }
}

fn require(bytes: &[u8], expected: usize) -> Result<(), RecordError> {
    if bytes.len() < expected {
        return Err(RecordError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn signed_nibble(nibble: u8) -> i8 {
    ((nibble << 4) as i8) >> 4
}

fn signed_10bit(ls: u8, ms: u8) -> i16 {
    let raw = ((ms as u16 & 0x03) << 8) | ls as u16;
    ((raw << 6) as i16) >> 6
}

/// Decode the sensor ID string from its type/length byte
fn decode_id_string(type_length: u8, data: &[u8]) -> String {
    let length = (type_length & 0x1F) as usize;
    let data = &data[..length.min(data.len())];

    let decoded: String = match type_length >> 6 {
        0b01 => data
            .iter()
            .flat_map(|b| [b & 0x0F, b >> 4])
            .map(|nibble| BCD_PLUS[nibble as usize] as char)
            .collect(),
        0b10 => data
            .chunks(3)
            .flat_map(|chunk| {
                let b0 = chunk[0];
                let b1 = chunk.get(1).copied().unwrap_or(0);
                let b2 = chunk.get(2).copied().unwrap_or(0);
                [
                    b0 & 0x3F,
                    ((b0 >> 6) | (b1 << 2)) & 0x3F,
                    ((b1 >> 4) | (b2 << 4)) & 0x3F,
                    b2 >> 2,
                ]
            })
            .map(|six| (six + 0x20) as char)
            .collect(),
        _ => data.iter().map(|&b| b as char).collect(),
    };

    decoded
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}
