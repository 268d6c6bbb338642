//! Per-host polling state
//!
//! An [`EntityPoller`] owns everything one monitored host needs across
//! ticks: its session lease, its lazily built descriptor cache and the
//! guard that keeps two passes over the same host from running at once.

use super::collect;
use crate::backend::MetricsSink;
use crate::error::{PollerError, Result};
use crate::ipmi::{IpmiConnector, IpmiSession, SessionLease};
use crate::models::MonitoredEntity;
use crate::observability::{PollerMetrics, StructuredLogger};
use crate::sdr::{self, DescriptorCache};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Result of one tick for one host
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A batch with this many measurements was handed to the sink
    Published { measurements: usize },
    /// The pass succeeded but produced no measurements
    Empty,
    /// The previous pass was still running
    Skipped,
    Failed { reason: String },
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Published { .. } => "published",
            TickOutcome::Empty => "empty",
            TickOutcome::Skipped => "skipped",
            TickOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct EntityPoller {
    entity: MonitoredEntity,
    lease: SessionLease,
    sink: Arc<dyn MetricsSink>,
    cache: Mutex<Option<DescriptorCache>>,
    polling: AtomicBool,
    metrics: PollerMetrics,
    logger: StructuredLogger,
}

impl EntityPoller {
    /// Open the host's session; a host whose session cannot be opened is not polled
    pub fn new(
        entity: MonitoredEntity,
        connector: Arc<dyn IpmiConnector>,
        sink: Arc<dyn MetricsSink>,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let lease = SessionLease::open(connector, entity.session_target()).map_err(|source| {
            PollerError::SessionUnavailable {
                host: entity.host.clone(),
                source,
            }
        })?;

        Ok(Self {
            entity,
            lease,
            sink,
            cache: Mutex::new(None),
            polling: AtomicBool::new(false),
            metrics: PollerMetrics::new(),
            logger,
        })
    }

    pub fn host(&self) -> &str {
        &self.entity.host
    }

    pub fn entity(&self) -> &MonitoredEntity {
        &self.entity
    }

    /// Whether a pass over this host is in flight
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Whether the descriptor cache has been built
    pub fn has_descriptor_cache(&self) -> bool {
        self.lock_cache().is_some()
    }

    /// Claim the right to run a pass
    ///
    /// Fails with [`TickOutcome::Skipped`] while another pass holds the guard.
    pub fn try_begin(self: &Arc<Self>) -> std::result::Result<PollGuard, TickOutcome> {
        if self
            .polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(host = %self.entity.host, "Previous poll still running, skipping tick");
            self.metrics.inc_tick(&self.entity.host, TickOutcome::Skipped.label());
            return Err(TickOutcome::Skipped);
        }

        Ok(PollGuard {
            poller: Arc::clone(self),
        })
    }

    /// Run one tick on the calling thread
    pub fn tick(self: &Arc<Self>) -> TickOutcome {
        match self.try_begin() {
            Ok(guard) => guard.run(),
            Err(outcome) => outcome,
        }
    }

    /// Close the host's session
    pub fn close(&self) {
        self.lease.close();
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<DescriptorCache>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_once(&self) -> Result<TickOutcome> {
        let host = self.entity.host.as_str();
        let timestamp = Utc::now();

        let session = self
            .lease
            .acquire()
            .map_err(|source| PollerError::SessionUnavailable {
                host: host.to_string(),
                source,
            })?;

        let mut cache = self.lock_cache();
        if cache.is_none() {
            let descriptors = self.discover(&session)?;
            if descriptors.is_empty() {
                warn!(host, "SDR holds no full sensor records, will enumerate again next tick");
                return Ok(TickOutcome::Empty);
            }
            *cache = Some(descriptors);
        }

        let Some(descriptors) = cache.as_ref() else {
            return Ok(TickOutcome::Empty);
        };

        let timer = self.metrics.start_collection_timer(host);
        let batch = collect(&self.entity, descriptors, &session, timestamp)?;
        timer.observe_duration();
        drop(cache);
        drop(session);

        if batch.is_empty() {
            debug!(host, "Poll produced no measurements");
            return Ok(TickOutcome::Empty);
        }

        let measurements = batch.len();
        self.sink.publish(batch);
        self.metrics.inc_measurements_published(host, measurements);

        Ok(TickOutcome::Published { measurements })
    }

    fn discover<S: IpmiSession + ?Sized>(&self, session: &S) -> Result<DescriptorCache> {
        let host = self.entity.host.as_str();
        let enumeration = sdr::enumerate(session)?;

        self.metrics
            .inc_reservation_renewals(host, enumeration.reservation_renewals);
        self.metrics
            .set_sensors_discovered(host, enumeration.descriptors.len());

        for descriptor in enumeration.descriptors.values() {
            let monitored = self.entity.sensor(descriptor.sensor_number).is_some();
            self.logger.log_sensor_discovered(host, descriptor, monitored);
        }

        for (sensor_number, spec) in &self.entity.sensors {
            if !enumeration.descriptors.contains_key(sensor_number) {
                warn!(
                    host,
                    sensor_number,
                    metric = %spec.metric.name,
                    "Configured sensor has no full sensor record"
                );
            }
        }

        info!(
            host,
            sensors = enumeration.descriptors.len(),
            records_read = enumeration.records_read,
            records_skipped = enumeration.records_skipped,
            reservation_renewals = enumeration.reservation_renewals,
            "SDR enumeration complete"
        );

        Ok(enumeration.descriptors)
    }
}

/// Exclusive right to poll one host, released on drop
pub struct PollGuard {
    poller: Arc<EntityPoller>,
}

impl PollGuard {
    pub fn host(&self) -> &str {
        self.poller.host()
    }

    /// Run one pass; blocks on IPMI I/O
    pub fn run(self) -> TickOutcome {
        let poller = &self.poller;
        let host = poller.entity.host.as_str();

        let outcome = match poller.poll_once() {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = error_chain(&e);
                poller.logger.log_tick_failed(host, &reason);
                TickOutcome::Failed { reason }
            }
        };

        poller.metrics.inc_tick(host, outcome.label());
        outcome
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.poller.polling.store(false, Ordering::Release);
    }
}

fn error_chain(error: &PollerError) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
