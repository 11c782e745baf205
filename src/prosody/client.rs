//! WebSocket client for the streaming prosody API.
//!
//! Opens one WebSocket per relay session, authenticated with the
//! `X-Hume-Api-Key` header, and splits it into a [`FrameSink`] and a
//! [`PredictionSource`]. Ping replies are handled by tungstenite while the
//! read half is polled.

use super::messages::{decode_message, encode_frame, StreamMessage};
use super::{FrameSink, Prediction, PredictionSource, ProsodyConnector, ProsodyStream, StreamOptions};
use crate::config::ProsodyConfig;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

const API_KEY_HEADER: &str = "X-Hume-Api-Key";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects sessions to the prosody streaming endpoint.
#[derive(Debug, Clone)]
pub struct HumeStreamConnector {
    url: String,
    api_key: String,
    connect_timeout: Duration,
}

impl HumeStreamConnector {
    pub fn new(config: &ProsodyConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

#[async_trait]
impl ProsodyConnector for HumeStreamConnector {
    async fn connect(&self, options: StreamOptions) -> RelayResult<ProsodyStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::DownstreamConnect(e.to_string()))?;

        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| RelayError::DownstreamConnect(format!("invalid API key header: {}", e)))?;
        request.headers_mut().insert(API_KEY_HEADER, key);

        debug!(url = %self.url, "Connecting to prosody stream");

        let (ws_stream, response) = match timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(RelayError::DownstreamConnect(e.to_string())),
            Err(_) => {
                return Err(RelayError::DownstreamConnect(format!(
                    "timed out after {}s",
                    self.connect_timeout.as_secs()
                )))
            }
        };

        info!(
            status = %response.status(),
            identify_speakers = options.identify_speakers,
            granularity = ?options.granularity,
            "Connected to prosody stream"
        );

        let (write, read) = ws_stream.split();
        Ok(ProsodyStream {
            sink: Box::new(WsFrameSink { write, options }),
            source: Box::new(WsPredictionSource { read }),
        })
    }
}

struct WsFrameSink {
    write: SplitSink<WsStream, Message>,
    options: StreamOptions,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: Vec<u8>) -> RelayResult<()> {
        let payload =
            encode_frame(&frame, self.options).map_err(|e| RelayError::Protocol(e.to_string()))?;
        self.write.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.write.close().await?;
        Ok(())
    }
}

struct WsPredictionSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl PredictionSource for WsPredictionSource {
    async fn next_prediction(&mut self) -> Option<RelayResult<Prediction>> {
        loop {
            let message = match self.read.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => {
                    trace!("Prosody message: {}", text.chars().take(200).collect::<String>());
                    return Some(match decode_message(&text) {
                        StreamMessage::Prediction(prediction) => Ok(prediction),
                        StreamMessage::ServiceError { code: Some(code), message } => {
                            Err(RelayError::Downstream(format!("{}: {}", code, message)))
                        }
                        StreamMessage::ServiceError { code: None, message } => {
                            Err(RelayError::Downstream(message))
                        }
                    });
                }
                Message::Close(frame) => {
                    debug!("Prosody stream closed by service: {:?}", frame);
                    return None;
                }
                Message::Binary(data) => {
                    debug!("Ignoring {} byte binary message from prosody stream", data.len());
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
