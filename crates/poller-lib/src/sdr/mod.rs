//! Sensor Data Repository access
//!
//! Walks a controller's SDR one record at a time, renewing the repository
//! reservation when the controller cancels it, and decodes full sensor
//! records into [`SensorDescriptor`]s.

mod cache;
mod fetch;
mod record;
mod reservation;
mod units;

pub use cache::{
    build_descriptor_cache, enumerate, DescriptorCache, Enumeration, FIRST_RECORD, LAST_RECORD,
};
pub use fetch::{
    fetch_record, FetchedRecord, HEADER_FRAGMENT, INITIAL_FRAGMENT, MIN_FRAGMENT, WHOLE_RECORD,
};
pub use record::{
    AnalogFormat, Conversion, Linearization, RecordError, RecordHeader, SdrRecord,
    SensorDescriptor, Thresholds, FULL_SENSOR_RECORD, HEADER_SIZE,
};
pub use reservation::{reserve, ReservationManager};
pub use units::{unit_name, ModifierUnit, RateUnit, SensorUnits};
