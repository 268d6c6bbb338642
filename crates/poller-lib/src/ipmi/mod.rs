//! IPMI transport boundary
//!
//! The polling engine talks to a BMC only through the narrow, synchronous
//! [`IpmiSession::request`] contract defined here. Session establishment and
//! the LAN wire encoding belong to an [`IpmiConnector`] implementation.

mod ipmitool;
mod session;

pub use ipmitool::{IpmitoolConfig, IpmitoolConnector};
pub use session::{LeasedSession, SessionLease};

use std::fmt;

/// Token returned by Reserve SDR Repository
pub type ReservationToken = u16;

/// Identifier of a record within the SDR enumeration chain
pub type RecordId = u16;

/// Channel identifier used to request a live reading
pub type SensorNumber = u8;

/// Network function codes used by the poller
pub mod netfn {
    pub const SENSOR_EVENT: u8 = 0x04;
    pub const APP: u8 = 0x06;
    pub const STORAGE: u8 = 0x0A;
}

/// Commands the polling engine issues to a BMC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Get Device ID, used to probe a freshly opened session
    GetDeviceId,
    /// Reserve SDR Repository
    ReserveSdrRepository,
    /// Get SDR: read `length` bytes at `offset` of record `record_id`
    GetSdr {
        reservation: ReservationToken,
        record_id: RecordId,
        offset: u8,
        length: u8,
    },
    /// Get Sensor Reading
    GetSensorReading { sensor_number: SensorNumber },
}

impl Request {
    pub fn netfn(&self) -> u8 {
        match self {
            Request::GetDeviceId => netfn::APP,
            Request::ReserveSdrRepository | Request::GetSdr { .. } => netfn::STORAGE,
            Request::GetSensorReading { .. } => netfn::SENSOR_EVENT,
        }
    }

    pub fn command(&self) -> u8 {
        match self {
            Request::GetDeviceId => 0x01,
            Request::ReserveSdrRepository => 0x22,
            Request::GetSdr { .. } => 0x23,
            Request::GetSensorReading { .. } => 0x2D,
        }
    }

    /// Request data bytes, multi-byte fields least significant byte first
    pub fn data(&self) -> Vec<u8> {
        match *self {
            Request::GetDeviceId | Request::ReserveSdrRepository => Vec::new(),
            Request::GetSdr {
                reservation,
                record_id,
                offset,
                length,
            } => {
                let [res_ls, res_ms] = reservation.to_le_bytes();
                let [rec_ls, rec_ms] = record_id.to_le_bytes();
                vec![res_ls, res_ms, rec_ls, rec_ms, offset, length]
            }
            Request::GetSensorReading { sensor_number } => vec![sensor_number],
        }
    }
}

/// Classification of completion codes the engine branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionKind {
    /// The response would not fit in a single message
    TooLarge,
    /// The SDR reservation was cancelled or is invalid
    ReservationCancelled,
    /// The requested sensor, data or record is not present
    DataNotPresent,
    Other,
}

/// Completion code reported by the BMC for a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionCode(pub u8);

impl CompletionCode {
    pub const NODE_BUSY: Self = Self(0xC0);
    pub const TIMEOUT: Self = Self(0xC3);
    pub const RESERVATION_CANCELLED: Self = Self(0xC5);
    pub const CANNOT_RETURN_REQUESTED_LENGTH: Self = Self(0xCA);
    pub const DATA_NOT_PRESENT: Self = Self(0xCB);
    pub const CANNOT_RESPOND: Self = Self(0xCE);
    pub const UNSPECIFIED: Self = Self(0xFF);

    pub fn kind(&self) -> CompletionKind {
        match *self {
            Self::CANNOT_RETURN_REQUESTED_LENGTH | Self::CANNOT_RESPOND | Self::UNSPECIFIED => {
                CompletionKind::TooLarge
            }
            Self::RESERVATION_CANCELLED => CompletionKind::ReservationCancelled,
            Self::DATA_NOT_PRESENT => CompletionKind::DataNotPresent,
            _ => CompletionKind::Other,
        }
    }

    fn description(&self) -> &'static str {
        match *self {
            Self::NODE_BUSY => "node busy",
            Self::TIMEOUT => "timeout while processing command",
            Self::RESERVATION_CANCELLED => "reservation cancelled or invalid",
            Self::CANNOT_RETURN_REQUESTED_LENGTH => "cannot return number of requested data bytes",
            Self::DATA_NOT_PRESENT => "requested data not present",
            Self::CANNOT_RESPOND => "command response could not be provided",
            Self::UNSPECIFIED => "unspecified error",
            _ => "unrecognized completion code",
        }
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.description())
    }
}

/// Failure of a single request/response exchange
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("BMC returned completion code {0}")]
    Completion(CompletionCode),

    #[error("session with {host} failed: {message}")]
    Session { host: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn completion_kind(&self) -> Option<CompletionKind> {
        match self {
            TransportError::Completion(code) => Some(code.kind()),
            _ => None,
        }
    }

    pub fn is_reservation_cancelled(&self) -> bool {
        self.completion_kind() == Some(CompletionKind::ReservationCancelled)
    }

    /// Session-level failures leave the session unusable
    pub fn is_session_failure(&self) -> bool {
        matches!(self, TransportError::Session { .. })
    }
}

/// Where and how to open a session
#[derive(Clone)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish()
    }
}

/// An authenticated session with one BMC
pub trait IpmiSession {
    /// Send a request and return the response data following the completion code
    fn request(&self, request: &Request) -> Result<Vec<u8>, TransportError>;

    /// Close the session; further requests are undefined
    fn close(&self) {}
}

impl<S: IpmiSession + ?Sized> IpmiSession for Box<S> {
    fn request(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        (**self).request(request)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Process-wide factory for sessions, shared by every poller
pub trait IpmiConnector: Send + Sync {
    /// Establish and authenticate a session
    fn open_session(
        &self,
        target: &SessionTarget,
    ) -> Result<Box<dyn IpmiSession + Send>, TransportError>;

    /// Release connector-wide resources, called once at shutdown
    fn tear_down(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_sdr_request_encoding() {
        let request = Request::GetSdr {
            reservation: 0x1234,
            record_id: 0x0042,
            offset: 8,
            length: 16,
        };

        assert_eq!(request.netfn(), netfn::STORAGE);
        assert_eq!(request.command(), 0x23);
        assert_eq!(request.data(), vec![0x34, 0x12, 0x42, 0x00, 8, 16]);
    }

    #[test]
    fn test_sensor_reading_request_encoding() {
        let request = Request::GetSensorReading { sensor_number: 0x30 };

        assert_eq!(request.netfn(), netfn::SENSOR_EVENT);
        assert_eq!(request.command(), 0x2D);
        assert_eq!(request.data(), vec![0x30]);
    }

    #[test]
    fn test_completion_code_classification() {
        assert_eq!(
            CompletionCode::CANNOT_RETURN_REQUESTED_LENGTH.kind(),
            CompletionKind::TooLarge
        );
        assert_eq!(CompletionCode::CANNOT_RESPOND.kind(), CompletionKind::TooLarge);
        assert_eq!(CompletionCode::UNSPECIFIED.kind(), CompletionKind::TooLarge);
        assert_eq!(
            CompletionCode::RESERVATION_CANCELLED.kind(),
            CompletionKind::ReservationCancelled
        );
        assert_eq!(
            CompletionCode::DATA_NOT_PRESENT.kind(),
            CompletionKind::DataNotPresent
        );
        assert_eq!(CompletionCode::NODE_BUSY.kind(), CompletionKind::Other);
        assert_eq!(CompletionCode(0xD4).kind(), CompletionKind::Other);
    }

    #[test]
    fn test_transport_error_helpers() {
        let cancelled = TransportError::Completion(CompletionCode::RESERVATION_CANCELLED);
        assert!(cancelled.is_reservation_cancelled());
        assert!(!cancelled.is_session_failure());

        let session = TransportError::Session {
            host: "10.0.0.1".to_string(),
            message: "no route to host".to_string(),
        };
        assert!(session.is_session_failure());
        assert_eq!(session.completion_kind(), None);
    }

    #[test]
    fn test_session_target_debug_omits_password() {
        let target = SessionTarget {
            host: "bmc-1".to_string(),
            port: 623,
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
        };

        let rendered = format!("{:?}", target);
        assert!(rendered.contains("bmc-1"));
        assert!(!rendered.contains("hunter2"));
    }
}
