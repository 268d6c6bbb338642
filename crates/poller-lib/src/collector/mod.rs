//! Measurement collection and poll scheduling
//!
//! [`collect`] reads every declared sensor of one host once. An
//! [`EntityPoller`] wraps it with the host's session, descriptor cache and
//! overlap guard, and the [`PollScheduler`] drives all pollers on a fixed
//! cadence.

mod poller;
mod scheduler;

pub use poller::{EntityPoller, PollGuard, TickOutcome};
pub use scheduler::{PollScheduler, DEFAULT_INITIAL_DELAY};

use crate::error::{PollerError, Result};
use crate::ipmi::{CompletionKind, IpmiSession, Request, TransportError};
use crate::models::{MeasurementBatch, MonitoredEntity};
use crate::sdr::DescriptorCache;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Response of Get Sensor Reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub raw: u8,
    pub scanning_enabled: bool,
    /// "Reading/state unavailable" flag
    pub unavailable: bool,
}

impl SensorReading {
    pub fn parse(response: &[u8]) -> std::result::Result<Self, TransportError> {
        match response {
            [raw, flags, ..] => Ok(Self {
                raw: *raw,
                scanning_enabled: flags & 0x40 != 0,
                unavailable: flags & 0x20 != 0,
            }),
            _ => Err(TransportError::Malformed(format!(
                "sensor reading response of {} bytes",
                response.len()
            ))),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.scanning_enabled && !self.unavailable
    }
}

/// Read every sensor that is both declared by `entity` and described in
/// `cache`, in ascending sensor number order
///
/// "Data not present" readings are omitted. Any other failure aborts the
/// pass and the partial batch is discarded.
pub fn collect<S: IpmiSession + ?Sized>(
    entity: &MonitoredEntity,
    cache: &DescriptorCache,
    session: &S,
    timestamp: DateTime<Utc>,
) -> Result<MeasurementBatch> {
    let mut batch = MeasurementBatch::new(entity.source.as_str(), timestamp);

    for (&sensor_number, descriptor) in cache {
        let Some(spec) = entity.sensor(sensor_number) else {
            continue;
        };

        if !descriptor.has_analog_reading() {
            debug!(sensor_number, sensor = %descriptor.name, "Sensor has no linear analog reading");
            continue;
        }

        let response = match session.request(&Request::GetSensorReading { sensor_number }) {
            Ok(response) => response,
            Err(e) if e.completion_kind() == Some(CompletionKind::DataNotPresent) => {
                debug!(sensor_number, "Sensor reading not present");
                continue;
            }
            Err(source) => {
                return Err(PollerError::CollectionAborted {
                    sensor_number,
                    source,
                })
            }
        };

        let reading = SensorReading::parse(&response).map_err(|source| {
            PollerError::CollectionAborted {
                sensor_number,
                source,
            }
        })?;

        if !reading.is_valid() {
            debug!(sensor_number, ?reading, "Sensor reading unavailable");
            continue;
        }

        match descriptor.convert(reading.raw) {
            Some(value) => batch.insert(&spec.metric.name, value, spec.source_override.as_deref()),
            None => debug!(sensor_number, raw = reading.raw, "Reading outside conversion domain"),
        }
    }

    Ok(batch)
}
