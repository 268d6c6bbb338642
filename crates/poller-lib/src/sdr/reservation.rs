//! SDR repository reservation

use crate::ipmi::{IpmiSession, Request, ReservationToken, TransportError};
use tracing::debug;

/// Issue Reserve SDR Repository and return the new token
pub fn reserve<S: IpmiSession + ?Sized>(session: &S) -> Result<ReservationToken, TransportError> {
    let response = session.request(&Request::ReserveSdrRepository)?;
    match response.as_slice() {
        [ls, ms, ..] => Ok(u16::from_le_bytes([*ls, *ms])),
        _ => Err(TransportError::Malformed(format!(
            "reservation response of {} bytes",
            response.len()
        ))),
    }
}

/// Reservation token of one enumeration, renewable once per stall
#[derive(Debug, Default)]
pub struct ReservationManager {
    token: ReservationToken,
    renewal_spent: bool,
    renewals: u32,
}

impl ReservationManager {
    /// Starts unreserved (token 0)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> ReservationToken {
        self.token
    }

    /// Whether a cancellation may still be answered with a renewal
    pub fn can_renew(&self) -> bool {
        !self.renewal_spent
    }

    /// Obtain a fresh token, spending the renewal until the next progress
    pub fn renew<S: IpmiSession + ?Sized>(
        &mut self,
        session: &S,
    ) -> Result<ReservationToken, TransportError> {
        self.renewal_spent = true;
        let previous = self.token;
        self.token = reserve(session)?;
        self.renewals += 1;
        debug!(previous, token = self.token, "SDR reservation renewed");
        Ok(self.token)
    }

    /// A record was read with the current token
    pub fn record_progress(&mut self) {
        self.renewal_spent = false;
    }

    /// Renewals issued over the whole enumeration
    pub fn renewals(&self) -> u32 {
        self.renewals
    }
}
