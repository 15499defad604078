//! # Transcription Session
//!
//! The per-connection state machine. Each WebSocket connection gets exactly
//! one session, which multiplexes three activities over the duplex channel:
//! ingress of control and binary frames, reassembly of fragmented binary
//! frames into complete WAV payloads, and egress of transcript and error
//! messages.
//!
//! ## Session Lifecycle:
//! 1. **Running**: ingress and worker loops both live; audio flows
//! 2. **Draining**: ingress has stopped (end request, Close frame,
//!    cancellation, or transport error); the worker finishes what is queued
//! 3. **Terminated**: worker done, close handshake attempted
//!
//! ## Concurrency Model:
//! Two cooperative tokio tasks per session. They share only the language
//! cell (written by ingress, read by the worker), the bounded audio queue,
//! and the egress side of the channel. Backpressure is the queue: when the
//! engine falls behind, the queue fills, the ingress loop stalls on `write`,
//! and the transport stops accepting client frames.

pub mod channel;
pub mod codec;
pub mod queue;

use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::session::channel::{Frame, FrameSink, FrameSource};
use crate::session::codec::{decode_control, EgressEncoder};
use crate::session::queue::{AudioQueue, AudioQueueReader, QueueWriteError};
use crate::transcription::engine::AUTO_LANGUAGE;
use crate::transcription::{EngineAdapter, TranscribeError};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both loops live, audio flowing.
    Running,
    /// Ingress stopped; worker draining queued payloads.
    Draining,
    /// Worker finished and the close handshake was attempted.
    Terminated,
}

/// One client connection's worth of state and loops.
pub struct TranscribeSession {
    source: Box<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    engine: Arc<EngineAdapter>,
    cancel: CancellationToken,
    queue: Arc<AudioQueue>,
    reader: Option<AudioQueueReader>,
    /// Written only by the ingress loop, read only by the worker. Stale
    /// reads are tolerable: clients change language between payloads.
    language: Arc<RwLock<String>>,
    max_payload_bytes: usize,
    state: SessionState,
    end_requested: bool,
    disposed: bool,
}

impl TranscribeSession {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        engine: Arc<EngineAdapter>,
        cancel: CancellationToken,
        max_payload_bytes: usize,
    ) -> Self {
        let (queue, reader) = AudioQueue::new();
        Self {
            source,
            sink,
            engine,
            cancel,
            queue: Arc::new(queue),
            reader: Some(reader),
            language: Arc::new(RwLock::new(AUTO_LANGUAGE.to_string())),
            max_payload_bytes,
            state: SessionState::Running,
            end_requested: false,
            disposed: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current language selection (`"auto"` until the client picks one).
    pub fn language(&self) -> String {
        self.language.read().unwrap().clone()
    }

    /// Whether the client asked to end the session with a control message.
    pub fn end_requested(&self) -> bool {
        self.end_requested
    }

    /// Drive the session to completion.
    ///
    /// Spawns the worker, runs the ingress loop to its end, then performs
    /// the shutdown sequence: close the queue writer, await the worker
    /// unconditionally, and attempt the Normal-closure handshake. Never
    /// panics across this boundary; worker failures are observed and logged.
    pub async fn run(&mut self) {
        let Some(reader) = self.reader.take() else {
            // run() after dispose() or a second run(): nothing left to drive.
            return;
        };

        let worker = tokio::spawn(worker_loop(
            reader,
            Arc::clone(&self.sink),
            Arc::clone(&self.engine),
            self.cancel.clone(),
            Arc::clone(&self.language),
        ));

        self.ingress_loop().await;
        self.state = SessionState::Draining;

        // Ingress is done writing; let the worker see the end of the queue.
        self.queue.close();

        if let Err(join_err) = worker.await {
            error!(error = %join_err, "transcription worker terminated abnormally");
        }

        self.sink.close().await;
        self.state = SessionState::Terminated;
        debug!("session terminated");
    }

    /// Release everything the session holds. Idempotent; safe to call
    /// whether or not `run` completed.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.queue.close();
        // If the worker never ran, queued payloads are dropped with the
        // reader here; otherwise the worker already consumed them.
        self.reader.take();
        self.sink.close().await;
    }

    /// Single logical reader of the duplex channel.
    ///
    /// Runs until the peer closes, the client requests an end, the
    /// cancellation signal fires, or the transport fails. Binary fragments
    /// are appended to the in-progress payload; the payload is handed to the
    /// queue when the end-of-message flag arrives, which may block and
    /// back-pressure the client.
    async fn ingress_loop(&mut self) {
        let mut assembly: Option<Vec<u8>> = None;

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("ingress cancelled");
                    break;
                }
                frame = self.source.next_frame() => frame,
            };

            let frame = match frame {
                None => {
                    debug!("peer ended the stream");
                    break;
                }
                Some(Err(err)) => {
                    warn!(kind = %err.kind(), "transport error on ingress");
                    break;
                }
                Some(Ok(frame)) => frame,
            };

            match frame {
                Frame::Close => {
                    debug!("close frame received");
                    break;
                }

                Frame::Text(raw) => {
                    let directive = decode_control(&raw);
                    if let Some(language) = directive.language {
                        debug!(language = %language, "language selection updated");
                        *self.language.write().unwrap() = language;
                    }
                    if directive.end_requested {
                        self.end_requested = true;
                        self.queue.close();
                        break;
                    }
                }

                Frame::Binary {
                    data,
                    end_of_message,
                } => {
                    let buffer = assembly.get_or_insert_with(Vec::new);
                    if buffer.len() + data.len() > self.max_payload_bytes {
                        error!(
                            limit_bytes = self.max_payload_bytes,
                            "audio payload exceeds configured size limit"
                        );
                        // Best effort only; the session is draining either
                        // way. This send happens at most once per session,
                        // so it skips the pooled encoder the worker reuses.
                        let frame = EgressEncoder::new().error("audio payload too large");
                        let _ = self.sink.send_text(frame).await;
                        break;
                    }
                    buffer.extend_from_slice(&data);

                    if end_of_message {
                        let Some(payload) = assembly.take() else {
                            continue;
                        };
                        match self.queue.write(payload, &self.cancel).await {
                            Ok(()) => {}
                            Err(QueueWriteError::Cancelled) => break,
                            Err(QueueWriteError::Closed) => break,
                        }
                    }
                }
            }
        }
    }
}

/// Single logical consumer of the audio queue.
///
/// Transcribes payloads in arrival order and emits one transcript frame per
/// non-empty result. Exits when the queue ends or cancellation is observed;
/// payloads still queued at that point are dropped with the reader.
async fn worker_loop(
    mut reader: AudioQueueReader,
    sink: Arc<dyn FrameSink>,
    engine: Arc<EngineAdapter>,
    cancel: CancellationToken,
    language: Arc<RwLock<String>>,
) {
    let mut encoder = EgressEncoder::new();

    while let Some(payload) = reader.next().await {
        if cancel.is_cancelled() {
            drop(payload);
            break;
        }

        let language = language.read().unwrap().clone();
        match engine.transcribe(payload, &language, &cancel).await {
            Ok(text) => {
                if text.trim().is_empty() {
                    // Silence, or a sanitized engine failure: nothing to emit.
                    continue;
                }
                let frame = encoder.transcript(&text);
                if let Err(err) = sink.send_text(frame).await {
                    warn!(error = %err, "dropping transcript, channel unavailable");
                    break;
                }
            }
            Err(TranscribeError::Cancelled) => break,
        }
    }
}
