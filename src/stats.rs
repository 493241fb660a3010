//! Process-wide server counters.
//!
//! All counters are atomics mutated with relaxed ordering; a snapshot copies
//! them field by field, so cross-field consistency is not guaranteed (and not
//! needed by the admin endpoint that serializes it).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

static ALIVE_CONNECTIONS: AtomicI64 = AtomicI64::new(0);
static POOLED_READERS: AtomicI64 = AtomicI64::new(0);
static TOTAL_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static TOTAL_REQUESTS: AtomicU64 = AtomicU64::new(0);
static WAITING_FOR_HEADER: AtomicI64 = AtomicI64::new(0);
static SERVING_HTTP: AtomicI64 = AtomicI64::new(0);
static SERVING_WEBSOCKETS: AtomicI64 = AtomicI64::new(0);

pub fn connection_opened() {
    TOTAL_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    ALIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn connection_closed() {
    ALIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
}

pub fn alive_connections() -> i64 {
    ALIVE_CONNECTIONS.load(Ordering::Relaxed)
}

pub fn request_served() {
    TOTAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn reader_pooled() {
    POOLED_READERS.fetch_add(1, Ordering::Relaxed);
}

pub fn reader_unpooled() {
    POOLED_READERS.fetch_sub(1, Ordering::Relaxed);
}

/// RAII increment/decrement for the gauge-style counters.
pub struct Gauge(&'static AtomicI64);

impl Gauge {
    pub fn waiting_for_header() -> Self {
        Self::enter(&WAITING_FOR_HEADER)
    }

    pub fn serving_http() -> Self {
        Self::enter(&SERVING_HTTP)
    }

    pub fn serving_websocket() -> Self {
        Self::enter(&SERVING_WEBSOCKETS)
    }

    fn enter(counter: &'static AtomicI64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Gauge(counter)
    }
}

impl Drop for Gauge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: String,
    pub alive_connections: i64,
    pub pooled_readers: i64,
    pub total_connections: u64,
    pub total_requests: u64,
    pub waiting_for_header: i64,
    pub serving_http: i64,
    pub serving_websockets: i64,
}

pub fn snapshot() -> StatsSnapshot {
    StatsSnapshot {
        timestamp: chrono::Utc::now().to_rfc3339(),
        alive_connections: ALIVE_CONNECTIONS.load(Ordering::Relaxed),
        pooled_readers: POOLED_READERS.load(Ordering::Relaxed),
        total_connections: TOTAL_CONNECTIONS.load(Ordering::Relaxed),
        total_requests: TOTAL_REQUESTS.load(Ordering::Relaxed),
        waiting_for_header: WAITING_FOR_HEADER.load(Ordering::Relaxed),
        serving_http: SERVING_HTTP.load(Ordering::Relaxed),
        serving_websockets: SERVING_WEBSOCKETS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_balance_on_drop() {
        let before = snapshot().serving_http;
        {
            let _g = Gauge::serving_http();
            assert_eq!(snapshot().serving_http, before + 1);
        }
        assert_eq!(snapshot().serving_http, before);
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        assert!(json.contains("alive_connections"));
    }
}
