//! # WebSocket Connection Acceptor
//!
//! Handles real-time audio streaming via WebSocket for speech-to-text
//! transcription. Clients connect to `/transcribe` and send complete WAV
//! files as binary messages, interleaved with small JSON control messages.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: client upgrades a GET request on `/transcribe`
//! 2. **Control**: text frames carry `{ "language": "..", "type": "end" }`
//! 3. **Audio**: each binary message is one self-contained WAV payload,
//!    optionally fragmented across frames by the transport
//! 4. **Results**: the server answers with `{"type":"transcript", ...}` and
//!    `{"type":"error", ...}` text frames, in payload order
//! 5. **Close**: either side may close; the server closes with Normal
//!    closure and reason `"session end"` once a session has drained
//!
//! This module owns the HTTP-to-WebSocket boundary only: the upgrade, the
//! adapters that turn `actix-ws` messages into session frames, and session
//! spawn/teardown. The protocol logic itself lives in `crate::session`.

use crate::session::channel::{Frame, FrameSink, FrameSource, TransportError};
use crate::session::TranscribeSession;
use crate::state::AppState;
use crate::transcription::EngineAdapter;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Item, Message, MessageStream, Session};
use async_trait::async_trait;
use bytes::Bytes;
use bytestring::ByteString;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Close reason sent when the server finishes a session.
const CLOSE_REASON: &str = "session end";

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Non-upgrade requests are answered with 400 and a short text body. On a
/// successful upgrade the session runs in a spawned task for the lifetime of
/// the connection; the task disposes the session and updates the live-session
/// gauge on the way out.
pub async fn transcribe(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
    engine: web::Data<EngineAdapter>,
) -> HttpResponse {
    let (response, ws_session, stream) = match actix_ws::handle(&req, body) {
        Ok(parts) => parts,
        Err(err) => {
            debug!(error = %err, "rejecting non-upgrade request to /transcribe");
            return HttpResponse::BadRequest().body("websocket upgrade required");
        }
    };

    let session_id = Uuid::new_v4();
    info!(
        session_id = %session_id,
        peer = ?req.connection_info().realip_remote_addr(),
        "transcription session connected"
    );

    // Sessions run under a child of the process shutdown token, so stopping
    // the server drains every connection.
    let cancel = state.shutdown_token().child_token();
    let max_payload_bytes = state.get_config().performance.max_payload_bytes;
    let engine = engine.into_inner();
    let state = state.into_inner();
    state.increment_active_sessions();

    tokio::spawn(async move {
        let sink: Arc<dyn FrameSink> = Arc::new(WsFrameSink::new(ws_session.clone()));
        let source = Box::new(WsFrameSource::new(stream, ws_session));

        let mut session =
            TranscribeSession::new(source, sink, engine, cancel, max_payload_bytes);
        session.run().await;
        session.dispose().await;

        state.decrement_active_sessions();
        info!(session_id = %session_id, "transcription session ended");
    });

    response
}

/// Tracks an in-progress continuation (fragmented message) on the wire.
enum ContinuationKind {
    /// No continuation in progress.
    Idle,
    /// Fragmented text message; control frames are tiny, so these are rare,
    /// but a pedantic client must not be able to desynchronize the session.
    Text(Vec<u8>),
    /// Fragmented binary message; fragments flow through to the session's
    /// reassembler as they arrive.
    Binary,
}

/// Normalize one continuation item into at most one session frame.
fn normalize_continuation(state: &mut ContinuationKind, item: Item) -> Option<Frame> {
    match item {
        Item::FirstBinary(data) => {
            *state = ContinuationKind::Binary;
            Some(Frame::Binary {
                data,
                end_of_message: false,
            })
        }
        Item::FirstText(data) => {
            *state = ContinuationKind::Text(data.to_vec());
            None
        }
        Item::Continue(data) => match state {
            ContinuationKind::Binary => Some(Frame::Binary {
                data,
                end_of_message: false,
            }),
            ContinuationKind::Text(buffer) => {
                buffer.extend_from_slice(&data);
                None
            }
            // Continuation without a first frame: drop it.
            ContinuationKind::Idle => None,
        },
        Item::Last(data) => match std::mem::replace(state, ContinuationKind::Idle) {
            ContinuationKind::Binary => Some(Frame::Binary {
                data,
                end_of_message: true,
            }),
            ContinuationKind::Text(mut buffer) => {
                buffer.extend_from_slice(&data);
                Some(Frame::Text(Bytes::from(buffer)))
            }
            ContinuationKind::Idle => None,
        },
    }
}

/// Ingress adapter: actix-ws messages → session frames.
///
/// Pings are answered here and pongs swallowed, so the session only ever
/// sees control text, audio binary, and close.
pub struct WsFrameSource {
    stream: MessageStream,
    /// Clone of the connection handle used for pong replies only.
    control: Session,
    continuation: ContinuationKind,
}

impl WsFrameSource {
    pub fn new(stream: MessageStream, control: Session) -> Self {
        Self {
            stream,
            control,
            continuation: ContinuationKind::Idle,
        }
    }
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.recv().await {
                None => return None,
                Some(Err(err)) => {
                    return Some(Err(TransportError::new(err.to_string())));
                }
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => {
                    return Some(Ok(Frame::Text(text.into_bytes())));
                }
                Message::Binary(data) => {
                    return Some(Ok(Frame::Binary {
                        data,
                        end_of_message: true,
                    }));
                }
                Message::Continuation(item) => {
                    if let Some(frame) = normalize_continuation(&mut self.continuation, item) {
                        return Some(Ok(frame));
                    }
                }
                Message::Ping(payload) => {
                    if self.control.pong(&payload).await.is_err() {
                        return Some(Err(TransportError::closed()));
                    }
                }
                Message::Pong(_) | Message::Nop => {}
                Message::Close(reason) => {
                    debug!(reason = ?reason, "client initiated close");
                    return Some(Ok(Frame::Close));
                }
            }
        }
    }
}

/// Egress adapter: session frames → actix-ws sends.
///
/// The underlying `actix_ws::Session` funnels every send through the
/// connection task's command channel, which is what serializes worker
/// transcripts against the ingress loop's best-effort error sends.
pub struct WsFrameSink {
    session: tokio::sync::Mutex<Option<Session>>,
}

impl WsFrameSink {
    pub fn new(session: Session) -> Self {
        Self {
            session: tokio::sync::Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_text(&self, payload: Bytes) -> Result<(), TransportError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Err(TransportError::closed());
        };

        // Outbound frames are serialized JSON and therefore valid UTF-8.
        let text = ByteString::try_from(payload)
            .map_err(|_| TransportError::new("non-utf8 outbound frame"))?;
        session
            .text(text)
            .await
            .map_err(|_| TransportError::closed())
    }

    async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            let _ = session
                .close(Some(CloseReason {
                    code: CloseCode::Normal,
                    description: Some(CLOSE_REASON.to_string()),
                }))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::{ConcurrencyLimiter, Recognizer};
    use actix_web::{http::StatusCode, test, App};

    struct NullRecognizer;

    impl Recognizer for NullRecognizer {
        fn transcribe(&self, _wav_bytes: &[u8], _language: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn test_engine() -> Arc<EngineAdapter> {
        Arc::new(EngineAdapter::new(
            Arc::new(NullRecognizer),
            ConcurrencyLimiter::new(1),
        ))
    }

    #[actix_web::test]
    async fn test_non_upgrade_request_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(AppConfig::default())))
                .app_data(web::Data::from(test_engine()))
                .route("/transcribe", web::get().to(transcribe)),
        )
        .await;

        let request = test::TestRequest::get().uri("/transcribe").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = test::read_body(response).await;
        assert_eq!(&body[..], b"websocket upgrade required");
    }

    #[test]
    fn test_continuation_binary_fragments_flow_through() {
        let mut state = ContinuationKind::Idle;

        let first = normalize_continuation(&mut state, Item::FirstBinary(Bytes::from_static(b"aa")));
        assert_eq!(
            first,
            Some(Frame::Binary {
                data: Bytes::from_static(b"aa"),
                end_of_message: false
            })
        );

        let middle = normalize_continuation(&mut state, Item::Continue(Bytes::from_static(b"bb")));
        assert_eq!(
            middle,
            Some(Frame::Binary {
                data: Bytes::from_static(b"bb"),
                end_of_message: false
            })
        );

        let last = normalize_continuation(&mut state, Item::Last(Bytes::from_static(b"cc")));
        assert_eq!(
            last,
            Some(Frame::Binary {
                data: Bytes::from_static(b"cc"),
                end_of_message: true
            })
        );
    }

    #[test]
    fn test_continuation_text_fragments_are_buffered() {
        let mut state = ContinuationKind::Idle;

        assert_eq!(
            normalize_continuation(&mut state, Item::FirstText(Bytes::from_static(b"{\"lang"))),
            None
        );
        assert_eq!(
            normalize_continuation(&mut state, Item::Continue(Bytes::from_static(b"uage\":"))),
            None
        );
        let last = normalize_continuation(&mut state, Item::Last(Bytes::from_static(b"\"en\"}")));
        assert_eq!(
            last,
            Some(Frame::Text(Bytes::from_static(b"{\"language\":\"en\"}")))
        );
    }

    #[test]
    fn test_orphan_continuation_is_dropped() {
        let mut state = ContinuationKind::Idle;
        assert_eq!(
            normalize_continuation(&mut state, Item::Continue(Bytes::from_static(b"xx"))),
            None
        );
        assert_eq!(
            normalize_continuation(&mut state, Item::Last(Bytes::from_static(b"yy"))),
            None
        );
    }
}
