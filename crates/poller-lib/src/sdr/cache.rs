//! Sensor descriptor cache built by walking the SDR chain

use super::fetch::fetch_record;
use super::record::{SdrRecord, SensorDescriptor};
use super::reservation::ReservationManager;
use crate::error::{PollerError, Result};
use crate::ipmi::{IpmiSession, RecordId, SensorNumber};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Record id addressing the first record of the repository
pub const FIRST_RECORD: RecordId = 0x0000;

/// "Next record id" marking the end of the repository
pub const LAST_RECORD: RecordId = 0xFFFF;

/// Full sensor records of one host, keyed by sensor number
pub type DescriptorCache = BTreeMap<SensorNumber, SensorDescriptor>;

/// Result of one complete SDR walk
#[derive(Debug, Default)]
pub struct Enumeration {
    pub descriptors: DescriptorCache,
    pub records_read: usize,
    pub records_skipped: usize,
    pub reservation_renewals: u32,
}

/// Walk the repository and collect every full sensor record
pub fn build_descriptor_cache<S: IpmiSession + ?Sized>(session: &S) -> Result<DescriptorCache> {
    enumerate(session).map(|enumeration| enumeration.descriptors)
}

/// Walk the repository from the first record until the end marker
///
/// A "reservation cancelled" completion is answered with one renewal and a
/// retry of the same record; a second cancellation before any record was read
/// with the renewed token aborts the walk.
pub fn enumerate<S: IpmiSession + ?Sized>(session: &S) -> Result<Enumeration> {
    let mut reservation = ReservationManager::new();
    let mut visited = HashSet::new();
    let mut enumeration = Enumeration::default();
    let mut cursor = FIRST_RECORD;

    while cursor != LAST_RECORD {
        if !visited.insert(cursor) {
            return Err(PollerError::enumeration_failed(
                cursor,
                PollerError::RecordCycle(cursor),
            ));
        }

        let fetched = loop {
            match fetch_record(session, reservation.token(), cursor) {
                Ok(fetched) => break fetched,
                Err(PollerError::Transport(e))
                    if e.is_reservation_cancelled() && reservation.can_renew() =>
                {
                    debug!(record_id = cursor, "SDR reservation cancelled, renewing");
                    reservation
                        .renew(session)
                        .map_err(|e| PollerError::enumeration_failed(cursor, e.into()))?;
                }
                Err(e) => return Err(PollerError::enumeration_failed(cursor, e)),
            }
        };
        reservation.record_progress();
        enumeration.records_read += 1;

        match SdrRecord::decode(&fetched.data) {
            Ok(SdrRecord::Full(descriptor)) => {
                if let Some(previous) = enumeration.descriptors.get(&descriptor.sensor_number) {
                    warn!(
                        sensor_number = descriptor.sensor_number,
                        previous = %previous.name,
                        replacement = %descriptor.name,
                        "Duplicate sensor number in SDR, keeping the later record"
                    );
                }
                enumeration
                    .descriptors
                    .insert(descriptor.sensor_number, descriptor);
            }
            Ok(SdrRecord::Other(header)) => {
                debug!(
                    record_id = header.record_id,
                    record_type = header.record_type,
                    "Skipping non-full SDR record"
                );
                enumeration.records_skipped += 1;
            }
            Err(e) => {
                debug!(record_id = cursor, error = %e, "Skipping undecodable SDR record");
                enumeration.records_skipped += 1;
            }
        }

        cursor = fetched.next_record_id;
    }

    enumeration.reservation_renewals = reservation.renewals();
    Ok(enumeration)
}
