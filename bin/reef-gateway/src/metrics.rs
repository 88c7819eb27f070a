//! Gateway metrics with a Prometheus text exporter.
//!
//! Counters and histograms are plain atomics; the exporter renders the
//! text format on scrape. Labels are limited to operation, method, and
//! status — never remote addresses or account identifiers, which would
//! explode cardinality.

use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LATENCY_BUCKETS_MS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

#[derive(Default)]
struct Histogram {
    buckets: [AtomicU64; 11],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn observe(&self, value: Duration) {
        let ms = value.as_millis() as u64;
        for (i, &boundary) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if ms <= boundary {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String, name: &str, operation: &str) {
        let count = self.count.load(Ordering::Relaxed);
        for (i, &boundary) in LATENCY_BUCKETS_MS.iter().enumerate() {
            let cumulative = self.buckets[i].load(Ordering::Relaxed);
            writeln!(
                out,
                "{name}_bucket{{operation=\"{operation}\",le=\"{boundary}\"}} {cumulative}"
            )
            .unwrap();
        }
        writeln!(
            out,
            "{name}_bucket{{operation=\"{operation}\",le=\"+Inf\"}} {count}"
        )
        .unwrap();
        writeln!(
            out,
            "{name}_sum{{operation=\"{operation}\"}} {}",
            self.sum_ms.load(Ordering::Relaxed)
        )
        .unwrap();
        writeln!(out, "{name}_count{{operation=\"{operation}\"}} {count}").unwrap();
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CompletedKey {
    operation: &'static str,
    method: String,
    status: u16,
}

/// Gateway metric registry
pub struct Metrics {
    completed: RwLock<HashMap<CompletedKey, Arc<AtomicU64>>>,
    latency: RwLock<HashMap<&'static str, Arc<Histogram>>>,
    time: RwLock<HashMap<&'static str, Arc<Histogram>>>,
    inbound_bytes: AtomicU64,
    outbound_bytes: AtomicU64,
    deleted_bytes: AtomicU64,
    probe_events: RwLock<HashMap<&'static str, Arc<AtomicU64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            completed: RwLock::new(HashMap::new()),
            latency: RwLock::new(HashMap::new()),
            time: RwLock::new(HashMap::new()),
            inbound_bytes: AtomicU64::new(0),
            outbound_bytes: AtomicU64::new(0),
            deleted_bytes: AtomicU64::new(0),
            probe_events: RwLock::new(HashMap::new()),
        }
    }

    /// Record time-to-response for an operation
    pub fn record_latency(&self, operation: &'static str, latency: Duration) {
        let hist = self
            .latency
            .write()
            .entry(operation)
            .or_default()
            .clone();
        hist.observe(latency);
    }

    /// Record total request time (through the end of the response body)
    /// and count the request completed
    pub fn record_completed(
        &self,
        operation: &'static str,
        method: &Method,
        status: u16,
        total: Duration,
    ) {
        let hist = self.time.write().entry(operation).or_default().clone();
        hist.observe(total);
        let key = CompletedKey {
            operation,
            method: method.as_str().to_string(),
            status,
        };
        let counter = self.completed.write().entry(key).or_default().clone();
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count bytes streamed in from clients
    pub fn add_inbound_bytes(&self, n: u64) {
        self.inbound_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Count bytes streamed out to clients
    pub fn add_outbound_bytes(&self, n: u64) {
        self.outbound_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Count bytes released by object deletion
    pub fn add_deleted_bytes(&self, n: u64) {
        self.deleted_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Count a probe event
    pub fn probe_event(&self, event: &'static str) {
        let counter = self.probe_events.write().entry(event).or_default().clone();
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the registry in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::with_capacity(8 * 1024);

        writeln!(
            out,
            "# HELP http_requests_completed Requests fully completed, including the response body"
        )
        .unwrap();
        writeln!(out, "# TYPE http_requests_completed counter").unwrap();
        for (key, counter) in self.completed.read().iter() {
            writeln!(
                out,
                "http_requests_completed{{operation=\"{}\",method=\"{}\",status=\"{}\"}} {}",
                key.operation,
                key.method,
                key.status,
                counter.load(Ordering::Relaxed)
            )
            .unwrap();
        }

        writeln!(
            out,
            "# HELP http_request_latency_ms Time until the response head was produced"
        )
        .unwrap();
        writeln!(out, "# TYPE http_request_latency_ms histogram").unwrap();
        for (operation, hist) in self.latency.read().iter() {
            hist.render(&mut out, "http_request_latency_ms", operation);
        }

        writeln!(
            out,
            "# HELP http_request_time_ms Time until the response body finished"
        )
        .unwrap();
        writeln!(out, "# TYPE http_request_time_ms histogram").unwrap();
        for (operation, hist) in self.time.read().iter() {
            hist.render(&mut out, "http_request_time_ms", operation);
        }

        for (name, help, value) in [
            (
                "inbound_streamed_bytes",
                "Object body bytes received from clients",
                &self.inbound_bytes,
            ),
            (
                "outbound_streamed_bytes",
                "Object body bytes sent to clients",
                &self.outbound_bytes,
            ),
            (
                "deleted_bytes",
                "Object body bytes released by deletes",
                &self.deleted_bytes,
            ),
        ] {
            writeln!(out, "# HELP {name} {help}").unwrap();
            writeln!(out, "# TYPE {name} counter").unwrap();
            writeln!(out, "{name} {}", value.load(Ordering::Relaxed)).unwrap();
        }

        writeln!(out, "# HELP probe_events_total Request lifecycle probe events").unwrap();
        writeln!(out, "# TYPE probe_events_total counter").unwrap();
        for (event, counter) in self.probe_events.read().iter() {
            writeln!(
                out,
                "probe_events_total{{event=\"{event}\"}} {}",
                counter.load(Ordering::Relaxed)
            )
            .unwrap();
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation name for a route, used as the only high-cardinality-safe
/// request label
fn operation_for(method: &Method, path: &str) -> &'static str {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match (method, segments.as_slice()) {
        (m, [_login, "buckets"]) if m == Method::OPTIONS => "optionsbuckets",
        (m, [_login, "buckets"]) if m == Method::GET => "listbuckets",
        (m, [_login, "buckets", _b]) if m == Method::PUT => "createbucket",
        (m, [_login, "buckets", _b]) if m == Method::HEAD => "headbucket",
        (m, [_login, "buckets", _b]) if m == Method::DELETE => "deletebucket",
        (m, [_login, "buckets", _b, "objects"]) if m == Method::GET => "listobjects",
        (m, [_login, "buckets", _b, "objects", _o, "metadata"]) if m == Method::PUT => {
            "updateobjectmetadata"
        }
        (m, [_login, "buckets", _b, "objects", ..]) if m == Method::PUT => "createobject",
        (m, [_login, "buckets", _b, "objects", ..]) if m == Method::GET => "getobject",
        (m, [_login, "buckets", _b, "objects", ..]) if m == Method::HEAD => "headobject",
        (m, [_login, "buckets", _b, "objects", ..]) if m == Method::DELETE => "deleteobject",
        _ => "other",
    }
}

/// Middleware recording latency at response-head time and total time plus
/// outbound bytes at body completion
pub async fn metrics_layer(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let operation = operation_for(&method, request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;
    metrics.record_latency(operation, start.elapsed());

    let status = response.status().as_u16();
    let (parts, body) = response.into_parts();

    // The guard lives inside the body stream closure; whenever the body
    // finishes or the client goes away, its drop records the total time.
    struct CompletionGuard {
        metrics: Arc<Metrics>,
        operation: &'static str,
        method: Method,
        status: u16,
        start: Instant,
    }
    impl Drop for CompletionGuard {
        fn drop(&mut self) {
            self.metrics.record_completed(
                self.operation,
                &self.method,
                self.status,
                self.start.elapsed(),
            );
        }
    }

    let guard = CompletionGuard {
        metrics: metrics.clone(),
        operation,
        method,
        status,
        start,
    };
    let counted = body.into_data_stream().inspect(move |chunk| {
        let _ = &guard;
        if let Ok(bytes) = chunk {
            metrics.add_outbound_bytes(bytes.len() as u64);
        }
    });
    Response::from_parts(parts, Body::from_stream(counted))
}

/// `GET /metrics` on the metrics listener
pub async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.export_prometheus()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(operation_for(&Method::GET, "/bob/buckets"), "listbuckets");
        assert_eq!(
            operation_for(&Method::PUT, "/bob/buckets/b1"),
            "createbucket"
        );
        assert_eq!(
            operation_for(&Method::GET, "/bob/buckets/b1/objects"),
            "listobjects"
        );
        assert_eq!(
            operation_for(&Method::PUT, "/bob/buckets/b1/objects/k1"),
            "createobject"
        );
        assert_eq!(
            operation_for(&Method::PUT, "/bob/buckets/b1/objects/k1/metadata"),
            "updateobjectmetadata"
        );
        assert_eq!(operation_for(&Method::GET, "/metrics"), "other");
    }

    #[test]
    fn test_export_contains_core_series() {
        let metrics = Metrics::new();
        metrics.record_latency("getobject", Duration::from_millis(7));
        metrics.record_completed("getobject", &Method::GET, 200, Duration::from_millis(9));
        metrics.add_inbound_bytes(11);
        metrics.add_outbound_bytes(22);
        metrics.add_deleted_bytes(33);
        metrics.probe_event("queue_enter");

        let text = metrics.export_prometheus();
        assert!(text.contains(
            "http_requests_completed{operation=\"getobject\",method=\"GET\",status=\"200\"} 1"
        ));
        assert!(text.contains("http_request_latency_ms_bucket{operation=\"getobject\",le=\"10\"}"));
        assert!(text.contains("http_request_time_ms_count{operation=\"getobject\"} 1"));
        assert!(text.contains("inbound_streamed_bytes 11"));
        assert!(text.contains("outbound_streamed_bytes 22"));
        assert!(text.contains("deleted_bytes 33"));
        assert!(text.contains("probe_events_total{event=\"queue_enter\"} 1"));
    }

    #[test]
    fn test_no_forbidden_labels() {
        let metrics = Metrics::new();
        metrics.record_completed("getobject", &Method::GET, 200, Duration::from_millis(1));
        let text = metrics.export_prometheus();
        assert!(!text.contains("remote"));
        assert!(!text.contains("owner"));
        assert!(!text.contains("caller"));
    }
}
