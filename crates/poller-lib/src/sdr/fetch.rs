//! Chunked retrieval of a single SDR record

use super::record::RecordHeader;
use crate::error::{PollerError, Result};
use crate::ipmi::{
    CompletionKind, IpmiSession, RecordId, Request, ReservationToken, TransportError,
};
use tracing::debug;

/// Length value requesting the entire record in one response
pub const WHOLE_RECORD: u8 = 0xFF;

/// Size of the first fragment of a fragmented read, covering the record header
pub const HEADER_FRAGMENT: u8 = 8;

pub const INITIAL_FRAGMENT: u8 = 128;

/// Smallest fragment size tried before giving up on a record
pub const MIN_FRAGMENT: u8 = 8;

/// Raw record bytes plus the id of the record that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    pub data: Vec<u8>,
    pub next_record_id: RecordId,
}

/// Retrieve one record, falling back to fragmented reads when it does not
/// fit into a single response.
///
/// "Reservation cancelled" and session failures are returned as
/// [`PollerError::Transport`] without retrying.
pub fn fetch_record<S: IpmiSession + ?Sized>(
    session: &S,
    reservation: ReservationToken,
    record_id: RecordId,
) -> Result<FetchedRecord> {
    match read(session, reservation, record_id, 0, WHOLE_RECORD) {
        Ok((next_record_id, data)) => {
            return Ok(FetchedRecord {
                data,
                next_record_id,
            })
        }
        Err(e) if e.completion_kind() == Some(CompletionKind::TooLarge) => {
            debug!(record_id, error = %e, "Record too large for one response, fragmenting");
        }
        Err(e) => return Err(e.into()),
    }

    let (next_record_id, mut data) = read(session, reservation, record_id, 0, HEADER_FRAGMENT)
        .map_err(|e| unavailable(record_id, e))?;
    let total = RecordHeader::parse(&data)?.total_size();
    data.truncate(total);

    let mut fragment = INITIAL_FRAGMENT;
    while data.len() < total {
        let offset = u8::try_from(data.len()).map_err(|_| PollerError::RecordUnavailable {
            record_id,
            source: TransportError::Malformed(format!("offset {} exceeds one byte", data.len())),
        })?;
        let length = fragment.min((total - data.len()).min(u8::MAX as usize) as u8);

        let failure = match read(session, reservation, record_id, offset, length) {
            Ok((_, bytes)) if bytes.len() >= length as usize => {
                data.extend_from_slice(&bytes[..length as usize]);
                continue;
            }
            Ok((_, bytes)) => TransportError::Malformed(format!(
                "short fragment: {} of {} bytes",
                bytes.len(),
                length
            )),
            Err(e) if e.is_reservation_cancelled() || e.is_session_failure() => {
                return Err(e.into())
            }
            Err(e) => e,
        };

        if fragment <= MIN_FRAGMENT {
            return Err(PollerError::RecordUnavailable {
                record_id,
                source: failure,
            });
        }

        // A tail shorter than the floor is retried once at the floor size
        fragment = (fragment.min(length) / 2).max(MIN_FRAGMENT);
        debug!(record_id, offset, fragment, error = %failure, "Fragment read failed, shrinking");
    }

    Ok(FetchedRecord {
        data,
        next_record_id,
    })
}

/// Header reads are already at the floor size, so any failure other than
/// cancellation or session loss makes the record unavailable
fn unavailable(record_id: RecordId, error: TransportError) -> PollerError {
    if error.is_reservation_cancelled() || error.is_session_failure() {
        error.into()
    } else {
        PollerError::RecordUnavailable {
            record_id,
            source: error,
        }
    }
}

/// Issue one Get SDR request, returning the next record id and the data read
fn read<S: IpmiSession + ?Sized>(
    session: &S,
    reservation: ReservationToken,
    record_id: RecordId,
    offset: u8,
    length: u8,
) -> std::result::Result<(RecordId, Vec<u8>), TransportError> {
    let mut response = session.request(&Request::GetSdr {
        reservation,
        record_id,
        offset,
        length,
    })?;

    if response.len() < 2 {
        return Err(TransportError::Malformed(format!(
            "Get SDR response of {} bytes",
            response.len()
        )));
    }

    let next = u16::from_le_bytes([response[0], response[1]]);
    Ok((next, response.split_off(2)))
}
