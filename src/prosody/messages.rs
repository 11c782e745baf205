//! Wire format of the streaming prosody API.
//!
//! Every outgoing message carries one base64-encoded frame plus the model
//! options. Responses are JSON objects holding either a `prosody` result or a
//! top-level `error`.

use super::{EmotionScore, Granularity, Prediction, StreamOptions};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    models: RequestModels,
    raw_text: bool,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestModels {
    prosody: ProsodyModelOptions,
}

#[derive(Debug, Serialize)]
struct ProsodyModelOptions {
    identify_speakers: bool,
    granularity: Granularity,
}

/// Build the text message carrying one audio frame.
pub fn encode_frame(frame: &[u8], options: StreamOptions) -> serde_json::Result<String> {
    let data = STANDARD.encode(frame);
    serde_json::to_string(&StreamRequest {
        models: RequestModels {
            prosody: ProsodyModelOptions {
                identify_speakers: options.identify_speakers,
                granularity: options.granularity,
            },
        },
        raw_text: false,
        data: &data,
    })
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    prosody: Option<ProsodyResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProsodyResult {
    #[serde(default)]
    predictions: Vec<ProsodyPrediction>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProsodyPrediction {
    #[serde(default)]
    emotions: Vec<EmotionScore>,
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Prediction(Prediction),
    /// The service reported an error for this stream.
    ServiceError { code: Option<String>, message: String },
}

/// Decode a response. Anything that does not parse as a known shape counts as
/// a prediction without emotion data.
pub fn decode_message(text: &str) -> StreamMessage {
    let response: StreamResponse = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Unparseable prosody payload: {}", e);
            return StreamMessage::Prediction(Prediction::NoEmotions);
        }
    };

    if let Some(error) = response.error {
        return StreamMessage::ServiceError {
            code: response.code.map(value_text),
            message: value_text(error),
        };
    }

    let Some(prosody) = response.prosody else {
        return StreamMessage::Prediction(Prediction::NoEmotions);
    };

    if let Some(warning) = &prosody.warning {
        tracing::debug!("Prosody warning: {}", warning);
    }

    match prosody.predictions.into_iter().next() {
        Some(first) if !first.emotions.is_empty() => {
            StreamMessage::Prediction(Prediction::Emotions(first.emotions))
        }
        _ => StreamMessage::Prediction(Prediction::NoEmotions),
    }
}

fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}
