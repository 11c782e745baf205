//! Effective configuration, with the prosody API key redacted.

use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "bit_depth": config.audio.bit_depth,
                "channels": config.audio.channels,
                "frame_duration_ms": config.audio.frame_duration_ms,
                "frame_size_bytes": config.audio.frame_size_bytes()
            },
            "prosody": {
                "url": config.prosody.url,
                "api_key_set": !config.prosody.api_key.is_empty(),
                "connect_timeout_secs": config.prosody.connect_timeout_secs
            },
            "relay": {
                "max_concurrent_sessions": config.relay.max_concurrent_sessions,
                "retained_closed_sessions": config.relay.retained_closed_sessions
            }
        }
    })))
}
