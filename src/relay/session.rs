//! # Connection Session
//!
//! A session pairs one upstream audio connection with one downstream prosody
//! stream. After the downstream connects and the session is registered, two
//! tasks run side by side:
//!
//! - **outbound**: upstream chunks → [`FrameBuffer`] → whole frames → downstream
//! - **inbound**: downstream predictions → top 5 emotions + [`Affect`] → upstream
//!
//! Each path stops on its own when its input closes or fails. A failure is
//! recorded on the session and in the shared [`RollingMetrics`], and only ends
//! the path that hit it. Closing the upstream is the one cancellation signal:
//! it ends the outbound path, which cancels the inbound path through the
//! session's [`CancellationToken`].
//!
//! Teardown runs after both tasks are joined, and at most once: the
//! downstream sink is closed, the session is marked closed and retired in the
//! registry.

use crate::audio::{Affect, FrameBuffer};
use crate::error::{RelayError, RelayResult};
use crate::metrics::RollingMetrics;
use crate::prosody::{
    EmotionScore, FrameSink, PredictionSource, ProsodyConnector, ProsodyStream, StreamOptions,
};
use crate::relay::SessionRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Emotions relayed per prediction.
pub const TOP_EMOTIONS: usize = 5;

/// Frames between progress log lines.
const PROGRESS_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    Closed,
}

/// Message sent upstream for every prediction that carried emotion data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionResult {
    pub session_id: String,
    pub emotions: Vec<EmotionScore>,
    pub valence: f64,
    pub arousal: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl EmotionResult {
    pub fn new(session_id: &str, emotions: Vec<EmotionScore>, affect: Affect) -> Self {
        Self {
            session_id: session_id.to_string(),
            emotions,
            valence: round3(affect.valence),
            arousal: round3(affect.arousal),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Where results for one session are delivered.
#[async_trait]
pub trait UpstreamSink: Send + Sync {
    async fn send_result(&self, result: &EmotionResult) -> RelayResult<()>;
}

/// Everything a session needs from the rest of the process.
#[derive(Clone)]
pub struct RelayContext {
    pub connector: Arc<dyn ProsodyConnector>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<RollingMetrics>,
    pub frame_size: usize,
}

#[derive(Debug)]
struct SessionState {
    lifecycle: Lifecycle,
    last_error: Option<String>,
}

/// Per-connection state, shared between the two paths and the registry.
#[derive(Debug)]
pub struct RelaySession {
    id: String,
    state: Mutex<SessionState>,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    torn_down: AtomicBool,
}

impl RelaySession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(SessionState {
                lifecycle: Lifecycle::Active,
                last_error: None,
            }),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Record a path failure here and in the shared error window.
    pub fn fail(&self, metrics: &RollingMetrics, err: &RelayError) {
        let message = err.to_string();
        error!(session_id = %self.id, "Relay error: {}", message);
        self.state.lock().last_error = Some(message.clone());
        metrics.record_error(message);
    }

    pub(crate) fn mark_closed(&self) {
        self.state.lock().lifecycle = Lifecycle::Closed;
    }

    /// Close the downstream, mark the session closed and retire it.
    /// Only the first call does anything.
    pub async fn teardown(&self, sink: Option<Box<dyn FrameSink>>, registry: &SessionRegistry) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(session_id = %self.id, "Downstream close: {}", e);
            }
        }

        self.mark_closed();
        registry.retire(self);

        info!(
            session_id = %self.id,
            frames_sent = self.frames_sent(),
            frames_received = self.frames_received(),
            "Session closed"
        );
    }
}

/// Run one session to completion and return its final record.
///
/// `chunks` carries raw upstream audio and closes when the upstream does. It
/// is bounded: while the downstream is slow to accept frames the upstream
/// transport has to wait for room.
/// `cancel` is triggered by the upstream transport when it goes away.
pub async fn run_session(
    ctx: RelayContext,
    session_id: String,
    chunks: mpsc::Receiver<Vec<u8>>,
    upstream: Box<dyn UpstreamSink>,
    cancel: CancellationToken,
) -> Arc<RelaySession> {
    let session = Arc::new(RelaySession::new(session_id));

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(session_id = %session.id, "Upstream closed before downstream connected");
            session.mark_closed();
            return session;
        }
        connected = ctx.connector.connect(StreamOptions::default()) => connected,
    };

    let ProsodyStream { sink, source } = match connected {
        Ok(stream) => stream,
        Err(e) => {
            // Never becomes active; keep the record so the error is visible
            session.fail(&ctx.metrics, &e);
            session.mark_closed();
            if let Err(e) = ctx.registry.register(session.clone()) {
                debug!(session_id = %session.id, "Failed session not retained: {}", e);
            }
            return session;
        }
    };

    if let Err(e) = ctx.registry.register(session.clone()) {
        session.fail(&ctx.metrics, &e);
        // Not in the registry, so teardown's retire is a no-op for this record
        session.teardown(Some(sink), &ctx.registry).await;
        return session;
    }

    info!(session_id = %session.id, frame_size = ctx.frame_size, "Session active");

    let outbound = tokio::spawn(forward_audio(
        session.clone(),
        chunks,
        sink,
        FrameBuffer::new(ctx.frame_size),
        ctx.metrics.clone(),
        cancel.clone(),
    ));
    let inbound = tokio::spawn(relay_predictions(
        session.clone(),
        source,
        upstream,
        ctx.metrics.clone(),
        cancel.clone(),
    ));

    let (outbound, inbound) = tokio::join!(outbound, inbound);

    let sink = match outbound {
        Ok(sink) => Some(sink),
        Err(e) => {
            session.fail(&ctx.metrics, &RelayError::Protocol(format!("outbound task failed: {}", e)));
            None
        }
    };
    if let Err(e) = inbound {
        session.fail(&ctx.metrics, &RelayError::Protocol(format!("inbound task failed: {}", e)));
    }

    session.teardown(sink, &ctx.registry).await;
    session
}

/// Outbound path. Hands the sink back so teardown can close it.
async fn forward_audio(
    session: Arc<RelaySession>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    mut sink: Box<dyn FrameSink>,
    mut buffer: FrameBuffer,
    metrics: Arc<RollingMetrics>,
    cancel: CancellationToken,
) -> Box<dyn FrameSink> {
    loop {
        // Chunks already queued are forwarded before a cancellation is seen
        let chunk = tokio::select! {
            biased;
            chunk = chunks.recv() => chunk,
            _ = cancel.cancelled() => None,
        };

        let Some(chunk) = chunk else {
            debug!(
                session_id = %session.id,
                buffered = buffer.buffered(),
                frame_size = buffer.frame_size(),
                "Upstream closed, outbound path finished"
            );
            cancel.cancel();
            return sink;
        };

        buffer.append(&chunk);
        for frame in buffer.drain_frames() {
            if let Err(e) = sink.send_frame(frame).await {
                session.fail(&metrics, &e);
                return sink;
            }

            let sent = session.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
            if sent % PROGRESS_INTERVAL == 0 {
                info!(session_id = %session.id, frames_sent = sent, "Forwarding audio");
            }
        }
    }
}

/// Inbound path.
async fn relay_predictions(
    session: Arc<RelaySession>,
    mut source: Box<dyn PredictionSource>,
    upstream: Box<dyn UpstreamSink>,
    metrics: Arc<RollingMetrics>,
    cancel: CancellationToken,
) {
    loop {
        // A message that has already arrived is handled before cancellation
        let next = tokio::select! {
            biased;
            next = source.next_prediction() => next,
            _ = cancel.cancelled() => break,
        };

        let prediction = match next {
            Some(Ok(prediction)) => prediction,
            Some(Err(e)) => {
                session.fail(&metrics, &e);
                break;
            }
            None => {
                debug!(session_id = %session.id, "Downstream closed, inbound path finished");
                break;
            }
        };

        let started = Instant::now();
        metrics.record_message();
        session.frames_received.fetch_add(1, Ordering::Relaxed);

        let Some(emotions) = prediction.top_emotions(TOP_EMOTIONS) else {
            continue;
        };

        let affect = Affect::score(&emotions);
        let result = EmotionResult::new(&session.id, emotions, affect);

        if let Err(e) = upstream.send_result(&result).await {
            if cancel.is_cancelled() {
                debug!(session_id = %session.id, "Upstream gone while sending result");
            } else {
                session.fail(&metrics, &e);
            }
            break;
        }

        let latency = started.elapsed();
        metrics.record_latency(latency);

        debug!(
            session_id = %session.id,
            top = %result.emotions.first().map(|e| e.name.as_str()).unwrap_or("-"),
            valence = result.valence,
            arousal = result.arousal,
            latency_ms = latency.as_secs_f64() * 1000.0,
            "Relayed emotions"
        );
    }

    if cancel.is_cancelled() {
        debug!(session_id = %session.id, "Inbound path cancelled");
    } else {
        warn!(session_id = %session.id, "Inbound path ended before upstream closed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory stand-ins for both sides of a session.

    use super::*;
    use crate::prosody::Prediction;

    #[derive(Debug, Default)]
    pub struct SinkLog {
        pub frames: Vec<Vec<u8>>,
        pub closes: usize,
    }

    pub struct FakeSink {
        log: Arc<Mutex<SinkLog>>,
        fail_with: Option<RelayError>,
        stall: bool,
    }

    #[async_trait]
    impl FrameSink for FakeSink {
        async fn send_frame(&mut self, frame: Vec<u8>) -> RelayResult<()> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.log.lock().frames.push(frame);
            Ok(())
        }

        async fn close(&mut self) -> RelayResult<()> {
            self.log.lock().closes += 1;
            Ok(())
        }
    }

    pub struct FakeSource {
        rx: mpsc::UnboundedReceiver<RelayResult<Prediction>>,
    }

    #[async_trait]
    impl PredictionSource for FakeSource {
        async fn next_prediction(&mut self) -> Option<RelayResult<Prediction>> {
            self.rx.recv().await
        }
    }

    /// Hands out one scripted stream.
    pub struct FakeConnector {
        pub log: Arc<Mutex<SinkLog>>,
        predictions: Mutex<Option<mpsc::UnboundedReceiver<RelayResult<Prediction>>>>,
        connect_error: Option<RelayError>,
        send_error: Option<RelayError>,
        stall_sends: bool,
    }

    impl FakeConnector {
        pub fn new() -> (Self, mpsc::UnboundedSender<RelayResult<Prediction>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Self {
                log: Arc::new(Mutex::new(SinkLog::default())),
                predictions: Mutex::new(Some(rx)),
                connect_error: None,
                send_error: None,
                stall_sends: false,
            };
            (connector, tx)
        }

        pub fn refusing(err: RelayError) -> Self {
            let (mut connector, _) = Self::new();
            connector.connect_error = Some(err);
            connector
        }

        pub fn failing_sends(mut self, err: RelayError) -> Self {
            self.send_error = Some(err);
            self
        }

        /// Every `send_frame` hangs forever.
        pub fn stalling_sends(mut self) -> Self {
            self.stall_sends = true;
            self
        }
    }

    #[async_trait]
    impl ProsodyConnector for FakeConnector {
        async fn connect(&self, options: StreamOptions) -> RelayResult<ProsodyStream> {
            assert_eq!(options, StreamOptions::default());
            if let Some(err) = &self.connect_error {
                return Err(err.clone());
            }
            let rx = self
                .predictions
                .lock()
                .take()
                .ok_or_else(|| RelayError::DownstreamConnect("already connected".to_string()))?;
            Ok(ProsodyStream {
                sink: Box::new(FakeSink {
                    log: self.log.clone(),
                    fail_with: self.send_error.clone(),
                    stall: self.stall_sends,
                }),
                source: Box::new(FakeSource { rx }),
            })
        }
    }

    pub struct ChannelUpstream(pub mpsc::UnboundedSender<EmotionResult>);

    #[async_trait]
    impl UpstreamSink for ChannelUpstream {
        async fn send_result(&self, result: &EmotionResult) -> RelayResult<()> {
            self.0
                .send(result.clone())
                .map_err(|e| RelayError::Upstream(e.to_string()))
        }
    }

    /// Upstream audio queue as the socket actor creates it.
    pub fn chunk_channel() -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        mpsc::channel(16)
    }

    /// Poll `check` until it holds, failing the test after about two seconds.
    pub async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    pub fn context(
        connector: FakeConnector,
        registry: Arc<SessionRegistry>,
        metrics: Arc<RollingMetrics>,
    ) -> RelayContext {
        RelayContext {
            connector: Arc::new(connector),
            registry,
            metrics,
            frame_size: 1280,
        }
    }
}
