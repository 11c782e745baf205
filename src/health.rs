//! # Health and Telemetry
//!
//! [`HealthAggregator`] is the only place derived health fields are computed.
//! It reads the session registry and the rolling metrics store on demand and
//! builds a [`HealthSnapshot`]; nothing is pushed to it.
//!
//! ## Endpoints:
//! - `GET /health/prosody` - the relay health snapshot
//! - `GET /health` - liveness, with process memory where available
//! - `GET /` - service descriptor

use crate::metrics::RollingMetrics;
use crate::relay::SessionRegistry;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum wall-clock time between chunk rate recomputations.
const RATE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Open,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub connection: ConnectionState,
    pub latency_ms_avg: f64,
    pub latency_ms_max: f64,
    pub chunk_rate_fps: u64,
    pub errors_past_minute: usize,
    pub last_message_age_ms: u64,
    pub uptime_seconds: u64,
    pub last_error: Option<String>,
    pub sessions_active: usize,
}

/// The chunk rate stays at its last value until a full interval has passed.
#[derive(Debug)]
struct RateSampler {
    sampled_at: Instant,
    messages_at_sample: u64,
    rate: u64,
}

#[derive(Debug)]
pub struct HealthAggregator {
    metrics: Arc<RollingMetrics>,
    registry: Arc<SessionRegistry>,
    started: Instant,
    sampler: Mutex<RateSampler>,
}

impl HealthAggregator {
    pub fn new(metrics: Arc<RollingMetrics>, registry: Arc<SessionRegistry>) -> Self {
        Self::started_at(metrics, registry, Instant::now())
    }

    pub fn started_at(
        metrics: Arc<RollingMetrics>,
        registry: Arc<SessionRegistry>,
        started: Instant,
    ) -> Self {
        Self {
            metrics,
            registry,
            started,
            sampler: Mutex::new(RateSampler {
                sampled_at: started,
                messages_at_sample: 0,
                rate: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> HealthSnapshot {
        let reading = self.metrics.reading_at(now);
        let sessions_active = self.registry.active_count();

        let connection = if sessions_active > 0 {
            ConnectionState::Open
        } else if self.registry.any_closed_with_error() {
            ConnectionState::Error
        } else {
            ConnectionState::Disconnected
        };

        let chunk_rate_fps = {
            let mut sampler = self.sampler.lock();
            let elapsed = now.saturating_duration_since(sampler.sampled_at);
            if elapsed >= RATE_INTERVAL {
                let counted = reading
                    .messages_received
                    .saturating_sub(sampler.messages_at_sample);
                sampler.rate = (counted as f64 / elapsed.as_secs_f64()) as u64;
                sampler.sampled_at = now;
                sampler.messages_at_sample = reading.messages_received;
            }
            sampler.rate
        };

        let last_message_age_ms = reading
            .last_message_at
            .map(|at| now.saturating_duration_since(at).as_millis() as u64)
            .unwrap_or(0);

        HealthSnapshot {
            connection,
            latency_ms_avg: reading.latency_ms_avg,
            latency_ms_max: reading.latency_ms_max,
            chunk_rate_fps,
            errors_past_minute: reading.errors_past_minute,
            last_message_age_ms,
            uptime_seconds: now.saturating_duration_since(self.started).as_secs(),
            last_error: reading.last_error,
            sessions_active,
        }
    }
}

/// Relay health snapshot.
pub async fn prosody_health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.aggregator.snapshot())
}

/// Liveness check.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "memory": get_memory_info()
    }))
}

pub async fn root(state: web::Data<AppState>) -> HttpResponse {
    let audio = state.get_config().audio;

    HttpResponse::Ok().json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "audio_stream": "/ws/audio/{session_id}",
            "prosody_health": "/health/prosody",
            "health": "/health",
            "sessions": "/api/v1/sessions",
            "config": "/api/v1/config"
        },
        "audio": {
            "encoding": "pcm_s16le",
            "sample_rate": audio.sample_rate,
            "channels": audio.channels,
            "frame_duration_ms": audio.frame_duration_ms,
            "frame_size_bytes": audio.frame_size_bytes()
        }
    }))
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) else {
        return json!({ "available": false });
    };

    let field_bytes = |name: &str| {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };

    json!({
        "resident_memory_bytes": field_bytes("VmRSS:"),
        "virtual_memory_bytes": field_bytes("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    json!({ "available": false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::relay::RelaySession;

    fn aggregator() -> (HealthAggregator, Arc<RollingMetrics>, Arc<SessionRegistry>, Instant) {
        let metrics = Arc::new(RollingMetrics::default());
        let registry = Arc::new(SessionRegistry::new(8, 8));
        let start = Instant::now();
        let aggregator = HealthAggregator::started_at(metrics.clone(), registry.clone(), start);
        (aggregator, metrics, registry, start)
    }

    #[test]
    fn test_fresh_process_is_disconnected() {
        let (aggregator, _, _, start) = aggregator();
        let snapshot = aggregator.snapshot_at(start);

        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
        assert_eq!(snapshot.chunk_rate_fps, 0);
        assert_eq!(snapshot.last_message_age_ms, 0);
        assert_eq!(snapshot.uptime_seconds, 0);
        assert_eq!(snapshot.sessions_active, 0);
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn test_connection_state_derivation() {
        let (aggregator, metrics, registry, start) = aggregator();

        let failed = Arc::new(RelaySession::new("failed"));
        failed.fail(&metrics, &RelayError::DownstreamConnect("refused".into()));
        failed.mark_closed();
        registry.register(failed).unwrap();
        assert_eq!(aggregator.snapshot_at(start).connection, ConnectionState::Error);

        let live = Arc::new(RelaySession::new("live"));
        registry.register(live.clone()).unwrap();
        let snapshot = aggregator.snapshot_at(start);
        assert_eq!(snapshot.connection, ConnectionState::Open);
        assert_eq!(snapshot.sessions_active, 1);

        live.mark_closed();
        registry.retire(&live);
        registry.unregister("failed").unwrap();
        assert_eq!(
            aggregator.snapshot_at(start).connection,
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_chunk_rate_is_stale_until_next_second() {
        let (aggregator, metrics, _, start) = aggregator();

        for _ in 0..30 {
            metrics.record_message_at(start);
        }
        // Less than a second since start: still the initial value
        assert_eq!(aggregator.snapshot_at(start + Duration::from_millis(500)).chunk_rate_fps, 0);

        let at = start + Duration::from_secs(2);
        assert_eq!(aggregator.snapshot_at(at).chunk_rate_fps, 15);

        for _ in 0..10 {
            metrics.record_message_at(at);
        }
        assert_eq!(aggregator.snapshot_at(at + Duration::from_millis(999)).chunk_rate_fps, 15);
        assert_eq!(aggregator.snapshot_at(at + Duration::from_secs(1)).chunk_rate_fps, 10);
        assert_eq!(aggregator.snapshot_at(at + Duration::from_secs(3)).chunk_rate_fps, 0);
    }

    #[test]
    fn test_message_age_and_uptime() {
        let (aggregator, metrics, _, start) = aggregator();
        metrics.record_message_at(start + Duration::from_secs(1));

        let snapshot = aggregator.snapshot_at(start + Duration::from_millis(3_250));
        assert_eq!(snapshot.last_message_age_ms, 2_250);
        assert_eq!(snapshot.uptime_seconds, 3);
    }

    #[test]
    fn test_errors_from_sessions_are_combined() {
        let (aggregator, metrics, registry, start) = aggregator();

        for (id, message) in [("a", "a broke"), ("b", "b broke")] {
            let session = Arc::new(RelaySession::new(id));
            registry.register(session.clone()).unwrap();
            session.fail(&metrics, &RelayError::Downstream(message.into()));
        }

        let snapshot = aggregator.snapshot_at(start + Duration::from_secs(1));
        assert_eq!(snapshot.errors_past_minute, 2);
        assert_eq!(snapshot.last_error.as_deref(), Some("prosody stream error: b broke"));
        assert_eq!(
            registry.get("a").unwrap().last_error().as_deref(),
            Some("prosody stream error: a broke")
        );
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let (aggregator, _, _, start) = aggregator();
        let value = serde_json::to_value(aggregator.snapshot_at(start)).unwrap();

        assert_eq!(value["connection"], "disconnected");
        for field in [
            "latency_ms_avg",
            "latency_ms_max",
            "chunk_rate_fps",
            "errors_past_minute",
            "last_message_age_ms",
            "uptime_seconds",
            "last_error",
            "sessions_active",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
    }
}
