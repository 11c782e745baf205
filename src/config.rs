//! # Configuration Management
//!
//! Loads the relay configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix
//! - A few platform variables (`HOST`, `PORT`, `HUME_API_KEY`)
//!
//! ## Priority (highest to lowest):
//! 1. Platform variables
//! 2. `APP_*` environment variables (`APP_SERVER__PORT`, `APP_AUDIO__SAMPLE_RATE`, ...)
//! 3. `config.toml`
//! 4. Defaults
//!
//! The audio section determines the frame size every session slices its
//! upstream bytes into; the prosody section points at the inference stream.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Complete relay configuration.
///
/// Grouped by concern so each part of the service only needs to look at the
/// section it cares about (`server` for binding, `audio` for framing, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub prosody: ProsodyConfig,
    pub relay: RelayConfig,
}

/// Where the HTTP/WebSocket server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Format of the raw PCM coming from upstream clients.
///
/// Input is already 16-bit linear PCM; nothing here drives transcoding, it
/// only decides how many bytes make one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Samples per second (16 kHz by default)
    pub sample_rate: u32,
    /// Bits per sample, must be a whole number of bytes
    pub bit_depth: u16,
    /// Interleaved channel count (mono by default)
    pub channels: u16,
    /// Duration of one forwarded frame in milliseconds
    pub frame_duration_ms: u32,
}

/// Connection settings for the downstream prosody inference stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProsodyConfig {
    /// Streaming WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Credential sent in the `X-Hume-Api-Key` header. Never logged.
    pub api_key: String,
    /// Upper bound on the connect handshake; the relay itself never times out
    /// an idle but healthy session.
    pub connect_timeout_secs: u64,
}

/// Limits on how many sessions the relay holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Active sessions allowed at the same time
    pub max_concurrent_sessions: usize,
    /// Closed session records kept around for health reporting
    pub retained_closed_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8001,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                bit_depth: 16,
                channels: 1,
                frame_duration_ms: 40,
            },
            prosody: ProsodyConfig {
                url: "wss://api.hume.ai/v0/stream/models".to_string(),
                api_key: String::new(),
                connect_timeout_secs: 10,
            },
            relay: RelayConfig {
                max_concurrent_sessions: 64,
                retained_closed_sessions: 32,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: Override server port
    /// - `APP_AUDIO__FRAME_DURATION_MS=20`: Smaller frames
    /// - `HUME_API_KEY=...`: Credential for the prosody stream
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // `__` separates sections so field names may keep their underscores:
            // APP_AUDIO__SAMPLE_RATE -> audio.sample_rate
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("HUME_API_KEY") {
            settings = settings.set_override("prosody.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Sample rate and channel count must be greater than 0"));
        }

        if self.audio.bit_depth == 0 || self.audio.bit_depth % 8 != 0 {
            return Err(anyhow::anyhow!(
                "Bit depth must be a positive multiple of 8, got {}",
                self.audio.bit_depth
            ));
        }

        if self.audio.frame_duration_ms == 0 {
            return Err(anyhow::anyhow!("Frame duration must be greater than 0"));
        }

        if self.audio.frame_size_bytes() == 0 {
            return Err(anyhow::anyhow!("Audio settings produce an empty frame"));
        }

        if !(self.prosody.url.starts_with("ws://") || self.prosody.url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Prosody URL must use ws:// or wss://, got {}",
                self.prosody.url
            ));
        }

        if self.prosody.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Prosody connect timeout must be greater than 0"));
        }

        if self.relay.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }
}

impl AudioConfig {
    /// Bytes in one forwarded frame.
    ///
    /// 16000 Hz × 1 channel × 2 bytes × 40 ms / 1000 = 1280 bytes.
    pub fn frame_size_bytes(&self) -> usize {
        let bytes_per_second = self.sample_rate as usize
            * self.channels as usize
            * (self.bit_depth as usize / 8);
        bytes_per_second * self.frame_duration_ms as usize / 1000
    }
}
