//! Named counters/maps/gauges exposed for scraping (C9).
//!
//! No metrics crate appears anywhere in the pack, so this mirrors the
//! original system's `expvar`-style surface directly: process-global
//! atomics and string-keyed counter maps, serialized to JSON and served
//! over a bare `hyper` HTTP server. The teacher's own `health/mod.rs`
//! reaches for an undeclared `axum` dependency to do the equivalent job;
//! this uses the `hyper`/`hyper-util` server features the teacher's
//! `Cargo.toml` actually declares instead.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, info};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// A simple monotonically-increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A counter that can also move down, used for "currently active" gauges.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set(&self, n: u64) {
        self.0.store(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Sums float seconds into an integer-backed accumulator (`* 1000`, stored
/// as milliseconds) so it can be an `AtomicU64` without a mutex.
#[derive(Debug, Default)]
pub struct Timing(AtomicU64);

impl Timing {
    pub fn add_secs(&self, secs: f64) {
        let millis = (secs * 1000.0).max(0.0) as u64;
        self.0.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn total_secs(&self) -> f64 {
        self.0.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// A string-keyed map of counters, for per-error-string tallies.
#[derive(Debug, Default)]
pub struct CounterMap(Mutex<HashMap<String, u64>>);

impl CounterMap {
    pub fn incr(&self, key: &str) {
        let mut map = self.0.lock().expect("counter map mutex poisoned");
        *map.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.0.lock().expect("counter map mutex poisoned").clone()
    }
}

/// The full telemetry surface named in spec (C9), process-global.
#[derive(Debug, Default)]
pub struct Metrics {
    pub num_accepts: Counter,
    pub accept_errors: CounterMap,
    pub recent_accept_errors: Gauge,
    pub dialog_errors: CounterMap,
    pub command_timeouts: Counter,
    pub bytes_in: Counter,
    pub bytes_out: Counter,
    pub active_connections: Gauge,
    pub return_codes: CounterMap,
    pub spamd_ping_errors: Counter,
    pub spamd_ping_requests: Counter,
    pub spamd_ping_timing: Timing,
    pub spamd_num_reconnects: Counter,
    pub spamd_num_evaluations: Counter,
    pub spamd_eval_timing: Timing,
    pub spamd_eval_errors: CounterMap,
    pub spamd_result_parsing_errors: Counter,
    pub num_mails_rejected_for_spam: Counter,
    pub num_messages_total: Counter,
    pub message_timing_total: Timing,
}

impl Metrics {
    pub fn new() -> Arc<Metrics> {
        Arc::new(Metrics::default())
    }

    /// Renders the surface the way `expvar` would: a flat JSON object of
    /// scalars and nested objects for the per-key maps.
    fn to_json(&self) -> Value {
        json!({
            "smtp-num-accepts": self.num_accepts.get(),
            "smtp-accept-errors": self.accept_errors.snapshot(),
            "smtp-recent-accept-errors": self.recent_accept_errors.get(),
            "smtp-dialog-errors": self.dialog_errors.snapshot(),
            "smtp-command-timeouts": self.command_timeouts.get(),
            "smtp-bytes-in": self.bytes_in.get(),
            "smtp-bytes-out": self.bytes_out.get(),
            "smtp-active-connections": self.active_connections.get(),
            "smtp-return-codes": self.return_codes.snapshot(),
            "spamd-ping-errors": self.spamd_ping_errors.get(),
            "spamd-ping-requests": self.spamd_ping_requests.get(),
            "spamd-ping-timing": self.spamd_ping_timing.total_secs(),
            "spamd-ping-num-reconnects": self.spamd_num_reconnects.get(),
            "spamd-num-evaluations": self.spamd_num_evaluations.get(),
            "spamd-eval-timing": self.spamd_eval_timing.total_secs(),
            "spamd-eval-errors": self.spamd_eval_errors.snapshot(),
            "spamd-result-parsing-errors": self.spamd_result_parsing_errors.get(),
            "num-mails-rejected-for-spam": self.num_mails_rejected_for_spam.get(),
            "num-messages-total": self.num_messages_total.get(),
            "message-timing-total": self.message_timing_total.total_secs(),
        })
    }
}

async fn route(
    req: Request<Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/debug/vars" => {
            let body = serde_json::to_vec(&metrics.to_json()).unwrap_or_default();
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .expect("valid response")
        }
        "/health" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new()))
            .expect("valid response"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .expect("valid response"),
    };
    Ok(response)
}

/// Serves `/debug/vars` (telemetry, JSON) and `/health` (plain 200) on
/// `bind`. Runs until the process exits; errors per-connection are logged
/// and do not bring the listener down.
pub async fn serve(bind: SocketAddr, metrics: Arc<Metrics>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("metrics server listening on {bind}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("metrics server accept error: {e}");
                continue;
            }
        };
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| route(req, metrics.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("metrics connection from {peer} failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_maps_accumulate() {
        let m = Metrics::default();
        m.num_accepts.inc();
        m.num_accepts.inc();
        m.dialog_errors.incr("unauth-pipelining");
        m.dialog_errors.incr("unauth-pipelining");
        m.dialog_errors.incr("empty-command");
        assert_eq!(m.num_accepts.get(), 2);
        let snapshot = m.dialog_errors.snapshot();
        assert_eq!(snapshot.get("unauth-pipelining"), Some(&2));
        assert_eq!(snapshot.get("empty-command"), Some(&1));
    }

    #[test]
    fn gauge_tracks_increments_and_decrements() {
        let g = Gauge::default();
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.get(), 1);
    }

    #[test]
    fn timing_accumulates_seconds() {
        let t = Timing::default();
        t.add_secs(0.25);
        t.add_secs(0.75);
        assert!((t.total_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn json_snapshot_includes_every_named_field() {
        let m = Metrics::default();
        let v = m.to_json();
        for key in [
            "smtp-num-accepts",
            "smtp-accept-errors",
            "smtp-recent-accept-errors",
            "smtp-dialog-errors",
            "smtp-command-timeouts",
            "smtp-bytes-in",
            "smtp-bytes-out",
            "smtp-active-connections",
            "smtp-return-codes",
            "spamd-ping-errors",
            "spamd-ping-requests",
            "spamd-ping-timing",
            "spamd-num-evaluations",
            "spamd-eval-timing",
            "spamd-eval-errors",
            "spamd-result-parsing-errors",
            "num-mails-rejected-for-spam",
            "num-messages-total",
            "message-timing-total",
        ] {
            assert!(v.get(key).is_some(), "missing key {key}");
        }
    }
}
