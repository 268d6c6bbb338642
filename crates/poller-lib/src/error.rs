//! Error types of the polling engine

use crate::ipmi::{RecordId, SensorNumber, TransportError};
use crate::sdr::RecordError;

#[derive(thiserror::Error, Debug)]
pub enum PollerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("record {record_id:#06x} could not be retrieved even in minimal fragments")]
    RecordUnavailable {
        record_id: RecordId,
        #[source]
        source: TransportError,
    },

    #[error("SDR enumeration failed at record {record_id:#06x}")]
    EnumerationFailed {
        record_id: RecordId,
        #[source]
        source: Box<PollerError>,
    },

    #[error("SDR chain revisits record {0:#06x}")]
    RecordCycle(RecordId),

    #[error("malformed SDR record: {0}")]
    Record(#[from] RecordError),

    #[error("collection aborted reading sensor {sensor_number}")]
    CollectionAborted {
        sensor_number: SensorNumber,
        #[source]
        source: TransportError,
    },

    #[error("no usable IPMI session with {host}")]
    SessionUnavailable {
        host: String,
        #[source]
        source: TransportError,
    },
}

impl PollerError {
    pub(crate) fn enumeration_failed(record_id: RecordId, source: PollerError) -> Self {
        PollerError::EnumerationFailed {
            record_id,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, PollerError>;
