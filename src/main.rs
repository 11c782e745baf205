//! # Prosody Relay
//!
//! Streams raw PCM audio from WebSocket clients to a prosody inference
//! service and streams emotion results (top emotions, valence, arousal) back.
//!
//! ## Routes:
//! - `GET /ws/audio/{session_id}` - audio in, emotion results out
//! - `GET /health/prosody` - relay health snapshot
//! - `GET /health` - liveness
//! - `GET /` - service descriptor
//! - `GET /api/v1/sessions[/{session_id}]` - per-session counters
//! - `DELETE /api/v1/sessions/{session_id}` - forget a closed session record
//! - `GET /api/v1/config` - effective configuration (API key redacted)
//!
//! ## Key Rust Concepts Used:
//! - **#[actix_web::main]**: starts the actix system (a tokio runtime plus
//!   the actor machinery) and runs `main` as its first future
//! - **move closures**: `HttpServer::new` calls the closure once per worker
//!   thread, so it captures `app_state` by value and clones it per worker
//! - **anyhow::Result**: startup errors of any kind bubble up with `?` and end
//!   the process with a readable message
//! - **tokio::select!**: waits on the server and the shutdown signal at once
//!   and acts on whichever finishes first

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod metrics;
mod middleware;
mod prosody;
mod relay;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{anyhow, Result};
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal task, polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    // Must happen before the first TLS connection to the prosody service
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting prosody-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, {} byte frames, prosody at {}",
        config.server.host,
        config.server.port,
        config.audio.frame_size_bytes(),
        config.prosody.url
    );
    if config.prosody.api_key.is_empty() {
        warn!("No prosody API key configured; downstream connections will be rejected");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default().exclude_regex("^/health"))
            .wrap(middleware::RequestLogging)
            .route("/ws/audio/{session_id}", web::get().to(websocket::audio_stream))
            .route("/health/prosody", web::get().to(health::prosody_health))
            .route("/health", web::get().to(health::health_check))
            .route("/", web::get().to(health::root))
            .service(
                web::scope("/api/v1")
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{session_id}", web::get().to(handlers::get_session))
                    .route("/sessions/{session_id}", web::delete().to(handlers::delete_session))
                    .route("/config", web::get().to(handlers::get_config)),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Stopping the workers stops every socket actor, which cancels its session
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prosody_relay=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
