//! # Upstream WebSocket Transport
//!
//! `GET /ws/audio/{session_id}` upgrades to a WebSocket handled by a
//! [`RelaySocket`] actor. The actor is a thin bridge between the client and
//! the relay core, which runs on its own tokio task.
//!
//! ## Message Flow:
//! ```text
//! client ──binary──▶ RelaySocket ──chunk queue──▶ outbound path ──▶ prosody
//! client ◀──text──── RelaySocket ◀──SendResult─── inbound path  ◀── prosody
//! ```
//!
//! ## Lifecycle:
//! 1. **Upgrade**: the handler refuses empty identifiers (400) and identifiers
//!    that are already relaying or over the session limit (409)
//! 2. **started()**: spawns [`run_session`] with the receiving end of the
//!    chunk queue and a [`SocketUpstream`] pointing back at this actor
//! 3. **Streaming**: binary messages go onto the chunk queue; text is ignored
//! 4. **stopped()**: the client went away. Dropping the chunk queue and
//!    cancelling the token is what ends the session
//! 5. **SessionEnded**: the session finished on its own (for example the
//!    downstream never connected), so the socket is closed for the client
//!
//! ## Backpressure:
//! The chunk queue is bounded. When it is full the actor stops reading from
//! the socket (`ctx.wait`) until the outbound path has made room, so a slow
//! prosody stream slows the client down instead of growing memory.
//!
//! If the outbound path has already exited (a downstream send failed), later
//! audio is dropped but the socket stays open: results from the inbound path
//! keep flowing until the client disconnects.

use crate::error::{AppError, RelayError, RelayResult};
use crate::relay::{run_session, EmotionResult, RelayContext, UpstreamSink};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A client that has not answered for this long is disconnected.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upstream chunks waiting for the outbound path.
const CHUNK_QUEUE_CAPACITY: usize = 32;

/// A serialized emotion result for the client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendResult(pub String);

/// The relay session has finished; close the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionEnded;

/// One upstream connection.
///
/// ## Actor Model:
/// Actix runs each actor on a single thread and hands it one message at a
/// time, so the fields below need no locking. Everything shared with the
/// relay session crosses over through the chunk queue, the cancellation
/// token or the actor's own mailbox.
pub struct RelaySocket {
    /// Caller-supplied identifier, also the registry key
    session_id: String,

    /// Shared dependencies for the session; taken once in `started()`
    relay: Option<RelayContext>,

    /// Sending end of the chunk queue. `None` once the outbound path is gone
    /// or the socket has stopped
    chunks_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Receiving end, handed to the session in `started()`
    chunks_rx: Option<mpsc::Receiver<Vec<u8>>>,

    /// Fired when the socket stops; the session's only cancellation trigger
    cancel: CancellationToken,

    /// Last time the client showed signs of life
    last_heartbeat: Instant,

    /// Total audio bytes received, for the disconnect log line
    bytes_received: u64,
}

impl RelaySocket {
    pub fn new(session_id: String, relay: RelayContext) -> Self {
        let (chunks_tx, chunks_rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        Self {
            session_id,
            relay: Some(relay),
            chunks_tx: Some(chunks_tx),
            chunks_rx: Some(chunks_rx),
            cancel: CancellationToken::new(),
            last_heartbeat: Instant::now(),
            bytes_received: 0,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_audio(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        self.bytes_received += data.len() as u64;

        let Some(tx) = &self.chunks_tx else {
            return;
        };

        match tx.try_send(data.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                // Hold further socket messages until the outbound path takes this chunk
                let tx = tx.clone();
                ctx.wait(
                    async move { tx.send(chunk).await.is_ok() }
                        .into_actor(self)
                        .map(|delivered, act, _ctx| {
                            if !delivered {
                                act.outbound_finished();
                            }
                        }),
                );
            }
            Err(TrySendError::Closed(_)) => self.outbound_finished(),
        }
    }

    /// The outbound path has exited. Audio from now on is dropped; the socket
    /// stays open for results.
    fn outbound_finished(&mut self) {
        if self.chunks_tx.take().is_some() {
            debug!(session_id = %self.session_id, "Outbound path finished, dropping further audio");
        }
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Upstream connected");
        self.start_heartbeat(ctx);

        let (Some(relay), Some(chunks)) = (self.relay.take(), self.chunks_rx.take()) else {
            error!(session_id = %self.session_id, "Relay socket started twice");
            ctx.stop();
            return;
        };

        let addr = ctx.address();
        let upstream = Box::new(SocketUpstream(addr.clone()));
        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            run_session(relay, session_id, chunks, upstream, cancel).await;
            addr.do_send(SessionEnded);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.chunks_tx.take();
        self.cancel.cancel();
        info!(
            session_id = %self.session_id,
            bytes_received = self.bytes_received,
            "Upstream disconnected"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio(&data, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                warn!(
                    session_id = %self.session_id,
                    length = text.len(),
                    "Ignoring text message on audio stream"
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session_id, "Client closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendResult> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: SendResult, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<SessionEnded> for RelaySocket {
    type Result = ();

    fn handle(&mut self, _msg: SessionEnded, ctx: &mut Self::Context) {
        debug!(session_id = %self.session_id, "Relay session finished, closing upstream");
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// Delivers results through the actor's mailbox.
struct SocketUpstream(Addr<RelaySocket>);

#[async_trait]
impl UpstreamSink for SocketUpstream {
    async fn send_result(&self, result: &EmotionResult) -> RelayResult<()> {
        let json = serde_json::to_string(result).map_err(|e| RelayError::Protocol(e.to_string()))?;
        self.0
            .send(SendResult(json))
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))
    }
}

/// WebSocket upgrade for one audio stream.
///
/// Refused with 409 when the identifier is already relaying or the session
/// limit is reached, so the client learns about it before any audio is sent.
pub async fn audio_stream(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let session_id = path.into_inner();
    if session_id.trim().is_empty() {
        return Err(AppError::BadRequest("session id must not be empty".to_string()).into());
    }

    debug!(
        session_id = %session_id,
        peer = ?req.connection_info().peer_addr(),
        "WebSocket upgrade requested"
    );

    state
        .registry
        .check_admission(&session_id)
        .map_err(AppError::from)?;

    ws::start(RelaySocket::new(session_id, state.relay_context()), &req, stream)
}
