//! Observability probes.
//!
//! Request-lifecycle events funnel through one observer so production
//! wiring (logs + counters) and test instrumentation share an interface.

use crate::metrics::Metrics;
use std::sync::Arc;
use tracing::debug;

/// Request lifecycle observer
pub trait Probes: Send + Sync {
    /// The client went away while a response body was streaming
    fn on_client_close(&self);
    /// A socket sat idle past the configured timeout
    fn on_socket_timeout(&self);
    /// A request was rejected because the wait queue was full
    fn on_throttle(&self);
    /// A request started waiting for an admission slot
    fn on_queue_enter(&self);
    /// A request stopped waiting for an admission slot
    fn on_queue_leave(&self);
    /// A request finished the admission-controlled section
    fn on_request_handled(&self);
}

/// Production probes: tracing events plus metric counters
pub struct TracingProbes {
    metrics: Arc<Metrics>,
}

impl TracingProbes {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl Probes for TracingProbes {
    fn on_client_close(&self) {
        debug!("client closed connection mid-stream");
        self.metrics.probe_event("client_close");
    }

    fn on_socket_timeout(&self) {
        debug!("socket idle timeout");
        self.metrics.probe_event("socket_timeout");
    }

    fn on_throttle(&self) {
        debug!("request throttled");
        self.metrics.probe_event("request_throttled");
    }

    fn on_queue_enter(&self) {
        self.metrics.probe_event("queue_enter");
    }

    fn on_queue_leave(&self) {
        self.metrics.probe_event("queue_leave");
    }

    fn on_request_handled(&self) {
        self.metrics.probe_event("request_handled");
    }
}
