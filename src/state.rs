//! # Application State
//!
//! Everything shared between HTTP handlers, WebSocket actors and relay
//! sessions. Each piece is behind an `Arc`, so cloning `AppState` (which
//! actix does per worker) only bumps reference counts.
//!
//! The metrics store and the registry are created here and handed to every
//! session explicitly; there are no globals.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Every actix worker thread gets its own clone of `AppState`
//! - All clones point at the same registry, metrics store and aggregator
//! - The data is freed when the last clone (handler, actor or session task) drops
//!
//! ### parking_lot::RwLock
//! - Many readers or one writer, like `std::sync::RwLock`
//! - No lock poisoning, so `read()` and `write()` return the guard directly
//!   and there is no `unwrap()` on every access
//!
//! ### Arc<dyn ProsodyConnector>
//! - A trait object: the state does not know which downstream client it holds
//! - Production uses [`HumeStreamConnector`]; tests hand in an in-memory fake
//!   through [`AppState::with_connector`]

use crate::config::AppConfig;
use crate::health::HealthAggregator;
use crate::metrics::RollingMetrics;
use crate::prosody::{HumeStreamConnector, ProsodyConnector};
use crate::relay::{RelayContext, SessionRegistry};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Shared state handed to every handler through `web::Data<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration. Read when a session starts (frame size) and by
    /// `GET /api/v1/config`
    pub config: Arc<RwLock<AppConfig>>,

    /// Process-wide rolling latency and error windows. Every session writes
    /// here; the health aggregator reads
    pub metrics: Arc<RollingMetrics>,

    /// Active sessions plus the most recent closed records
    pub registry: Arc<SessionRegistry>,

    /// Builds `/health/prosody` snapshots from `metrics` and `registry`
    pub aggregator: Arc<HealthAggregator>,

    /// Opens one downstream prosody stream per session
    pub connector: Arc<dyn ProsodyConnector>,

    /// Process start, for the liveness endpoint's uptime
    pub start_time: Instant,
}

impl AppState {
    /// State wired to the real prosody streaming client.
    pub fn new(config: AppConfig) -> Self {
        let connector = Arc::new(HumeStreamConnector::new(&config.prosody));
        Self::with_connector(config, connector)
    }

    /// State wired to any downstream client.
    ///
    /// The aggregator shares the same `metrics` and `registry` Arcs as the
    /// sessions, which is what lets it see their writes.
    pub fn with_connector(config: AppConfig, connector: Arc<dyn ProsodyConnector>) -> Self {
        let metrics = Arc::new(RollingMetrics::default());
        let registry = Arc::new(SessionRegistry::from_config(&config.relay));
        let aggregator = Arc::new(HealthAggregator::new(metrics.clone(), registry.clone()));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics,
            registry,
            aggregator,
            connector,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Shared dependencies for a new relay session.
    pub fn relay_context(&self) -> RelayContext {
        RelayContext {
            connector: self.connector.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            frame_size: self.config.read().audio.frame_size_bytes(),
        }
    }
}
