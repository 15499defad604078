//! # Transcription Module
//!
//! Everything between a session's worker loop and the native speech
//! recognition engine:
//!
//! - **Recognizer**: the black-box engine contract and its whisper.cpp
//!   binding (model loading, WAV decode, segment concatenation)
//! - **Engine Adapter**: one-payload transcription with failure sanitization
//! - **Concurrency Limiter**: the process-wide cap on simultaneous engine
//!   invocations, shared by every session
//!
//! The engine is CPU- and memory-hungry native code; the limiter is what
//! keeps an arbitrary number of sessions from trampling it.

use std::fmt;

pub mod engine;
pub mod limiter;
pub mod recognizer;

pub use engine::EngineAdapter;
pub use limiter::ConcurrencyLimiter;
pub use recognizer::{Recognizer, WhisperRecognizer};

/// Error surfaced by `EngineAdapter::transcribe`.
///
/// Engine failures never appear here; the adapter sanitizes them to empty
/// text so the session can keep going. Cancellation is the only outcome the
/// caller must react to.
#[derive(Debug, PartialEq, Eq)]
pub enum TranscribeError {
    /// The session's cancellation signal fired while waiting for an engine
    /// slot or before the call could start.
    Cancelled,
}

impl fmt::Display for TranscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscribeError::Cancelled => write!(f, "transcription cancelled"),
        }
    }
}

impl std::error::Error for TranscribeError {}
