//! # Prosody Stream Boundary
//!
//! The relay treats the prosody inference service as an opaque, per-session
//! stream: frames go in, prediction messages come out. This module defines
//! that boundary as traits so the relay core can run against the real
//! WebSocket client ([`client::HumeStreamConnector`]) or an in-memory fake in
//! tests.
//!
//! A connection is opened through a [`ProsodyConnector`] and comes back split
//! into its two halves:
//! - [`FrameSink`]: owned by the session's outbound task, closed once at teardown
//! - [`PredictionSource`]: owned by the session's inbound task

pub mod client;
pub mod messages;

use crate::error::RelayResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::HumeStreamConnector;

/// Model options sent with every frame. Fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub identify_speakers: bool,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Word,
    Sentence,
    Utterance,
}

impl Default for StreamOptions {
    /// Speaker identification off, word-level predictions.
    fn default() -> Self {
        Self {
            identify_speakers: false,
            granularity: Granularity::Word,
        }
    }
}

/// One named emotion and its score.
///
/// Scores are fractional magnitudes; they are not normalised to sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub name: String,
    pub score: f64,
}

#[cfg(test)]
impl EmotionScore {
    pub(crate) fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// A prediction message from the stream.
///
/// Messages that carry no emotion data (service warnings such as "no speech
/// detected", or payloads missing the expected fields) are their own variant
/// rather than an empty list, so callers have to decide what to do with them.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Emotions(Vec<EmotionScore>),
    NoEmotions,
}

impl Prediction {
    /// The `n` highest-scoring emotions, best first. `None` when the message
    /// has no emotion data.
    pub fn top_emotions(&self, n: usize) -> Option<Vec<EmotionScore>> {
        match self {
            Prediction::Emotions(emotions) if !emotions.is_empty() => {
                let mut ranked = emotions.clone();
                ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
                ranked.truncate(n);
                Some(ranked)
            }
            _ => None,
        }
    }
}

/// Opens per-session prosody streams.
#[async_trait]
pub trait ProsodyConnector: Send + Sync {
    async fn connect(&self, options: StreamOptions) -> RelayResult<ProsodyStream>;
}

/// Outbound half of a prosody stream.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Vec<u8>) -> RelayResult<()>;

    /// Close the underlying connection.
    async fn close(&mut self) -> RelayResult<()>;
}

/// Inbound half of a prosody stream.
#[async_trait]
pub trait PredictionSource: Send {
    /// Next prediction, or `None` once the service has closed the stream.
    async fn next_prediction(&mut self) -> Option<RelayResult<Prediction>>;
}

/// An open stream, already split into its two halves.
pub struct ProsodyStream {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn PredictionSource>,
}
