//! Scoped access to a host's long-lived session
//!
//! A [`SessionLease`] owns the session of one monitored host. Each poll
//! acquires it for the duration of the pass; if any request in that scope
//! fails at the session level, the session is closed when the scope ends and
//! a fresh one is opened by the next acquisition.

use super::{IpmiConnector, IpmiSession, Request, SessionTarget, TransportError};
use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

type BoxedSession = Box<dyn IpmiSession + Send>;

pub struct SessionLease {
    connector: Arc<dyn IpmiConnector>,
    target: SessionTarget,
    session: Mutex<Option<BoxedSession>>,
}

impl SessionLease {
    /// Open the initial session. Failure here means the host is never polled.
    pub fn open(
        connector: Arc<dyn IpmiConnector>,
        target: SessionTarget,
    ) -> Result<Self, TransportError> {
        let session = connector.open_session(&target)?;
        info!(host = %target.host, port = target.port, "IPMI session established");

        Ok(Self {
            connector,
            target,
            session: Mutex::new(Some(session)),
        })
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    /// Whether a usable session is currently held
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Acquire the session, reconnecting first if the previous scope broke it
    pub fn acquire(&self) -> Result<LeasedSession<'_>, TransportError> {
        let mut slot = self.lock();

        if slot.is_none() {
            info!(host = %self.target.host, "Re-establishing IPMI session");
            *slot = Some(self.connector.open_session(&self.target)?);
        }

        Ok(LeasedSession {
            slot,
            host: &self.target.host,
            broken: Cell::new(false),
        })
    }

    /// Close the held session, if any
    pub fn close(&self) {
        if let Some(session) = self.lock().take() {
            session.close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<BoxedSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A session borrowed from a [`SessionLease`] for one poll
pub struct LeasedSession<'a> {
    slot: MutexGuard<'a, Option<BoxedSession>>,
    host: &'a str,
    broken: Cell<bool>,
}

impl LeasedSession<'_> {
    pub fn is_broken(&self) -> bool {
        self.broken.get()
    }
}

impl IpmiSession for LeasedSession<'_> {
    fn request(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        let session = self.slot.as_ref().ok_or_else(|| TransportError::Session {
            host: self.host.to_string(),
            message: "session is closed".to_string(),
        })?;

        let result = session.request(request);
        if let Err(e) = &result {
            if e.is_session_failure() {
                self.broken.set(true);
            }
        }
        result
    }
}

impl Drop for LeasedSession<'_> {
    fn drop(&mut self) {
        if self.broken.get() {
            if let Some(session) = self.slot.take() {
                warn!(
                    host = %self.host,
                    "Closing failed IPMI session, it will be re-established on the next poll"
                );
                session.close();
            }
        }
    }
}
