//! Test doubles shared by the unit tests of this crate
//!
//! `FakeController` scripts a BMC's SDR and sensor readings in memory and
//! records every request it receives.

use crate::backend::MetricsSink;
use crate::ipmi::{
    CompletionCode, IpmiConnector, IpmiSession, RecordId, Request, SensorNumber, SessionTarget,
    TransportError,
};
use crate::models::MeasurementBatch;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WHOLE_RECORD: u8 = 0xFF;

#[derive(Default)]
struct ControllerState {
    records: BTreeMap<RecordId, (Vec<u8>, RecordId)>,
    max_response: Option<usize>,
    cancellations: HashMap<RecordId, usize>,
    fragment_failures: HashMap<(RecordId, u8), usize>,
    readings: HashMap<SensorNumber, Result<Vec<u8>, CompletionCode>>,
    fixed_reservation: Option<u16>,
    next_reservation: u16,
    fail_session: bool,
    latency: Duration,
    requests: Vec<Request>,
    sessions_closed: usize,
}

/// In-memory BMC answering SDR and sensor reading requests
#[derive(Clone, Default)]
pub(crate) struct FakeController {
    state: Arc<Mutex<ControllerState>>,
}

impl FakeController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a record to the repository chain
    pub(crate) fn with_record(self, record_id: RecordId, bytes: Vec<u8>, next: RecordId) -> Self {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(record_id, (bytes, next));
        self
    }

    /// Largest response data the controller can return in one message
    pub(crate) fn with_max_response(self, bytes: usize) -> Self {
        self.state.lock().unwrap().max_response = Some(bytes);
        self
    }

    /// Fail the next `times` reads of `record_id` with "reservation cancelled"
    pub(crate) fn cancel_reservation_on(self, record_id: RecordId, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .cancellations
            .insert(record_id, times);
        self
    }

    /// Fail the next `times` fragment reads at `offset` of `record_id`
    pub(crate) fn fail_fragment(self, record_id: RecordId, offset: u8, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .fragment_failures
            .insert((record_id, offset), times);
        self
    }

    /// Always hand out the same reservation token
    pub(crate) fn with_fixed_reservation(self, token: u16) -> Self {
        self.state.lock().unwrap().fixed_reservation = Some(token);
        self
    }

    pub(crate) fn with_reading(self, sensor_number: SensorNumber, raw: u8) -> Self {
        self.state
            .lock()
            .unwrap()
            .readings
            .insert(sensor_number, Ok(vec![raw, 0xC0, 0x00]));
        self
    }

    pub(crate) fn with_reading_bytes(self, sensor_number: SensorNumber, bytes: Vec<u8>) -> Self {
        self.state
            .lock()
            .unwrap()
            .readings
            .insert(sensor_number, Ok(bytes));
        self
    }

    pub(crate) fn with_reading_error(self, sensor_number: SensorNumber, code: CompletionCode) -> Self {
        self.state
            .lock()
            .unwrap()
            .readings
            .insert(sensor_number, Err(code));
        self
    }

    /// Delay every response by `latency`
    pub(crate) fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().latency = latency;
        self
    }

    /// Make the next request fail as if the network session dropped
    pub(crate) fn fail_session_once(&self) {
        self.state.lock().unwrap().fail_session = true;
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    pub(crate) fn sessions_closed(&self) -> usize {
        self.state.lock().unwrap().sessions_closed
    }

    /// Lengths of every Get SDR request issued for `record_id` at a non-zero offset
    pub(crate) fn fragment_lengths(&self, record_id: RecordId) -> Vec<u8> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::GetSdr {
                    record_id: id,
                    offset,
                    length,
                    ..
                } if id == record_id && offset > 0 => Some(length),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn reservations_issued(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, Request::ReserveSdrRepository))
            .count()
    }

    fn answer(state: &mut ControllerState, request: &Request) -> Result<Vec<u8>, TransportError> {
        match *request {
            Request::GetDeviceId => Ok(vec![0x20, 0x01, 0x01, 0x02, 0x02, 0xBF]),
            Request::ReserveSdrRepository => {
                let token = match state.fixed_reservation {
                    Some(token) => token,
                    None => {
                        state.next_reservation = state.next_reservation.wrapping_add(1);
                        state.next_reservation
                    }
                };
                Ok(token.to_le_bytes().to_vec())
            }
            Request::GetSdr {
                record_id,
                offset,
                length,
                ..
            } => {
                if let Some(remaining) = state.cancellations.get_mut(&record_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(TransportError::Completion(
                            CompletionCode::RESERVATION_CANCELLED,
                        ));
                    }
                }

                if offset > 0 {
                    if let Some(remaining) = state.fragment_failures.get_mut(&(record_id, offset)) {
                        if *remaining > 0 {
                            *remaining -= 1;
                            return Err(TransportError::Completion(
                                CompletionCode::CANNOT_RETURN_REQUESTED_LENGTH,
                            ));
                        }
                    }
                }

                let (bytes, next) = state
                    .records
                    .get(&record_id)
                    .ok_or(TransportError::Completion(CompletionCode::DATA_NOT_PRESENT))?;

                let start = offset as usize;
                let end = if length == WHOLE_RECORD {
                    bytes.len()
                } else {
                    (start + length as usize).min(bytes.len())
                };

                if let Some(max) = state.max_response {
                    if end.saturating_sub(start) > max {
                        return Err(TransportError::Completion(
                            CompletionCode::CANNOT_RETURN_REQUESTED_LENGTH,
                        ));
                    }
                }

                let mut response = next.to_le_bytes().to_vec();
                response.extend_from_slice(&bytes[start.min(bytes.len())..end]);
                Ok(response)
            }
            Request::GetSensorReading { sensor_number } => state
                .readings
                .get(&sensor_number)
                .cloned()
                .unwrap_or(Err(CompletionCode::DATA_NOT_PRESENT))
                .map_err(TransportError::Completion),
        }
    }
}

impl IpmiSession for FakeController {
    fn request(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        let latency = self.state.lock().unwrap().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = self.state.lock().unwrap();
        state.requests.push(*request);

        if state.fail_session {
            state.fail_session = false;
            return Err(TransportError::Session {
                host: "fake-bmc".to_string(),
                message: "connection reset".to_string(),
            });
        }

        Self::answer(&mut state, request)
    }

    fn close(&self) {
        self.state.lock().unwrap().sessions_closed += 1;
    }
}

/// Connector handing out sessions backed by one `FakeController`
pub(crate) struct FakeConnector {
    controller: Option<FakeController>,
    opened: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(controller: FakeController) -> Self {
        Self {
            controller: Some(controller),
            opened: AtomicUsize::new(0),
        }
    }

    /// A connector whose handshake always fails
    pub(crate) fn refusing() -> Self {
        Self {
            controller: None,
            opened: AtomicUsize::new(0),
        }
    }

    pub(crate) fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl IpmiConnector for FakeConnector {
    fn open_session(
        &self,
        target: &SessionTarget,
    ) -> Result<Box<dyn IpmiSession + Send>, TransportError> {
        match &self.controller {
            Some(controller) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(controller.clone()))
            }
            None => Err(TransportError::Session {
                host: target.host.clone(),
                message: "authentication failed".to_string(),
            }),
        }
    }

    fn tear_down(&self) {}
}

/// Sink keeping every published batch
#[derive(Default)]
pub(crate) struct RecordingSink {
    batches: Mutex<Vec<MeasurementBatch>>,
}

impl RecordingSink {
    pub(crate) fn batches(&self) -> Vec<MeasurementBatch> {
        self.batches.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn publish(&self, batch: MeasurementBatch) {
        self.batches.lock().unwrap().push(batch);
    }
}

/// Builds raw full sensor record bytes (SDR type 0x01)
pub(crate) struct FullRecordBuilder {
    record_id: RecordId,
    sensor_number: SensorNumber,
    name: String,
    sensor_type: u8,
    analog_format: u8,
    rate_unit: u8,
    percentage: bool,
    base_unit: u8,
    linearization: u8,
    m: i16,
    b: i16,
    b_exp: i8,
    r_exp: i8,
    readable_thresholds: u8,
    thresholds: [u8; 6],
}

impl FullRecordBuilder {
    pub(crate) fn new(record_id: RecordId, sensor_number: SensorNumber, name: &str) -> Self {
        Self {
            record_id,
            sensor_number,
            name: name.to_string(),
            sensor_type: 0x01,
            analog_format: 0,
            rate_unit: 0,
            percentage: false,
            base_unit: 1,
            linearization: 0,
            m: 1,
            b: 0,
            b_exp: 0,
            r_exp: 0,
            readable_thresholds: 0,
            thresholds: [0; 6],
        }
    }

    pub(crate) fn base_unit(mut self, unit: u8) -> Self {
        self.base_unit = unit;
        self
    }

    pub(crate) fn sensor_type(mut self, sensor_type: u8) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    pub(crate) fn analog_format(mut self, format: u8) -> Self {
        self.analog_format = format;
        self
    }

    pub(crate) fn rate_unit(mut self, rate: u8) -> Self {
        self.rate_unit = rate;
        self
    }

    pub(crate) fn percentage(mut self) -> Self {
        self.percentage = true;
        self
    }

    pub(crate) fn linearization(mut self, linearization: u8) -> Self {
        self.linearization = linearization;
        self
    }

    /// Set `y = (m * x + b * 10^b_exp) * 10^r_exp`
    pub(crate) fn formula(mut self, m: i16, b: i16, b_exp: i8, r_exp: i8) -> Self {
        self.m = m;
        self.b = b;
        self.b_exp = b_exp;
        self.r_exp = r_exp;
        self
    }

    /// Raw upper non-critical and upper critical thresholds, marked readable
    pub(crate) fn upper_thresholds(mut self, non_critical: u8, critical: u8) -> Self {
        self.readable_thresholds |= 0b0001_1000;
        self.thresholds[2] = non_critical;
        self.thresholds[1] = critical;
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let m = (self.m as u16) & 0x03FF;
        let b = (self.b as u16) & 0x03FF;
        let name = self.name.as_bytes();

        let mut bytes = vec![0u8; 48];
        bytes[0..2].copy_from_slice(&self.record_id.to_le_bytes());
        bytes[2] = 0x51;
        bytes[3] = 0x01;
        bytes[5] = 0x20;
        bytes[7] = self.sensor_number;
        bytes[8] = 0x07;
        bytes[9] = 0x01;
        bytes[12] = self.sensor_type;
        bytes[13] = 0x01;
        bytes[18] = self.readable_thresholds;
        bytes[19] = self.readable_thresholds;
        bytes[20] = (self.analog_format << 6) | (self.rate_unit << 3) | self.percentage as u8;
        bytes[21] = self.base_unit;
        bytes[23] = self.linearization;
        bytes[24] = (m & 0xFF) as u8;
        bytes[25] = ((m >> 8) as u8) << 6;
        bytes[26] = (b & 0xFF) as u8;
        bytes[27] = ((b >> 8) as u8) << 6;
        bytes[29] = ((self.r_exp as u8) << 4) | (self.b_exp as u8 & 0x0F);
        bytes[36..42].copy_from_slice(&self.thresholds);
        bytes[47] = 0xC0 | name.len() as u8;
        bytes.extend_from_slice(name);
        bytes[4] = (bytes.len() - 5) as u8;
        bytes
    }
}

/// Raw compact sensor record bytes (SDR type 0x02)
pub(crate) fn compact_record(record_id: RecordId, sensor_number: SensorNumber) -> Vec<u8> {
    let mut bytes = vec![0u8; 32];
    bytes[0..2].copy_from_slice(&record_id.to_le_bytes());
    bytes[2] = 0x51;
    bytes[3] = 0x02;
    bytes[4] = 27;
    bytes[7] = sensor_number;
    bytes
}
