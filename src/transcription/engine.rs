//! # Engine Adapter
//!
//! Single-payload transcription on top of the black-box recognizer, with the
//! process-wide concurrency gate applied around every invocation.
//!
//! ## Key Responsibilities:
//! - **Admission**: acquire a limiter lease before touching the engine; the
//!   lease is scoped so it is returned on every exit path
//! - **Isolation**: engine failures and panics are logged and translated to
//!   empty text, so one bad payload never tears down a session
//! - **Threading**: inference is blocking native code and runs on the tokio
//!   blocking pool, keeping the async worker free to observe cancellation

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::transcription::limiter::ConcurrencyLimiter;
use crate::transcription::recognizer::Recognizer;
use crate::transcription::TranscribeError;

/// Language value used when the client has not chosen one.
pub const AUTO_LANGUAGE: &str = "auto";

/// Shared adapter between sessions and the recognition engine. Process
/// singleton; carries no per-session state.
pub struct EngineAdapter {
    recognizer: Arc<dyn Recognizer>,
    limiter: ConcurrencyLimiter,
}

impl EngineAdapter {
    pub fn new(recognizer: Arc<dyn Recognizer>, limiter: ConcurrencyLimiter) -> Self {
        Self {
            recognizer,
            limiter,
        }
    }

    /// The limiter guarding this engine (exposed for the health surface).
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Transcribe one complete WAV payload.
    ///
    /// Waits for an engine slot (observing `cancel`), runs the recognizer,
    /// and returns the trimmed transcript. An empty return means "nothing to
    /// emit": silence, or an engine failure that was logged and swallowed.
    /// Only cancellation surfaces as an error.
    ///
    /// The payload buffer is consumed; it is dropped here once the engine is
    /// done with it, whatever the outcome.
    pub async fn transcribe(
        &self,
        payload: Vec<u8>,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TranscribeError> {
        let _lease = self.limiter.acquire(cancel).await?;

        let language = normalize_language(language);
        let payload_len = payload.len();
        debug!(
            payload_bytes = payload_len,
            language = %language,
            "starting transcription"
        );

        let recognizer = Arc::clone(&self.recognizer);
        let outcome = tokio::task::spawn_blocking(move || {
            // The payload buffer lives and dies inside this closure.
            recognizer.transcribe(&payload, &language)
        })
        .await;

        match outcome {
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(err)) => {
                error!(
                    payload_bytes = payload_len,
                    error = %format!("{:#}", err),
                    "transcription failed"
                );
                Ok(String::new())
            }
            Err(join_err) => {
                error!(
                    payload_bytes = payload_len,
                    error = %join_err,
                    "transcription task panicked"
                );
                Ok(String::new())
            }
        }
        // _lease dropped here: the permit returns on every path above
    }
}

/// Substitute the automatic-detection language for empty or whitespace input.
fn normalize_language(language: &str) -> String {
    let trimmed = language.trim();
    if trimmed.is_empty() {
        AUTO_LANGUAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the language it was called with and replies with fixed text.
    struct RecordingRecognizer {
        reply: &'static str,
        languages: Mutex<Vec<String>>,
    }

    impl RecordingRecognizer {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                languages: Mutex::new(Vec::new()),
            }
        }
    }

    impl Recognizer for RecordingRecognizer {
        fn transcribe(&self, _wav_bytes: &[u8], language: &str) -> anyhow::Result<String> {
            self.languages.lock().unwrap().push(language.to_string());
            Ok(self.reply.to_string())
        }
    }

    struct FailingRecognizer;

    impl Recognizer for FailingRecognizer {
        fn transcribe(&self, _wav_bytes: &[u8], _language: &str) -> anyhow::Result<String> {
            Err(anyhow!("native engine exploded"))
        }
    }

    fn adapter(recognizer: Arc<dyn Recognizer>, max_concurrent: usize) -> EngineAdapter {
        EngineAdapter::new(recognizer, ConcurrencyLimiter::new(max_concurrent))
    }

    #[tokio::test]
    async fn test_transcribe_trims_whitespace() {
        let engine = adapter(Arc::new(RecordingRecognizer::new("  hello world \n")), 1);
        let cancel = CancellationToken::new();

        let text = engine
            .transcribe(vec![1, 2, 3], "en", &cancel)
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_empty_language_becomes_auto() {
        let recognizer = Arc::new(RecordingRecognizer::new("ok"));
        let engine = adapter(recognizer.clone(), 1);
        let cancel = CancellationToken::new();

        engine.transcribe(vec![0], "", &cancel).await.unwrap();
        engine.transcribe(vec![0], "   ", &cancel).await.unwrap();
        engine.transcribe(vec![0], "en", &cancel).await.unwrap();

        let languages = recognizer.languages.lock().unwrap().clone();
        assert_eq!(languages, vec!["auto", "auto", "en"]);
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_empty_text() {
        let engine = adapter(Arc::new(FailingRecognizer), 1);
        let cancel = CancellationToken::new();

        let text = engine
            .transcribe(vec![1, 2, 3], "en", &cancel)
            .await
            .unwrap();
        assert_eq!(text, "");
        // The lease came back despite the failure.
        assert_eq!(engine.limiter().available_permits(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting_for_slot() {
        struct SlowRecognizer;
        impl Recognizer for SlowRecognizer {
            fn transcribe(&self, _wav_bytes: &[u8], _language: &str) -> anyhow::Result<String> {
                std::thread::sleep(Duration::from_millis(200));
                Ok("slow".to_string())
            }
        }

        let engine = Arc::new(adapter(Arc::new(SlowRecognizer), 1));
        let cancel = CancellationToken::new();

        // Occupy the only slot.
        let busy = tokio::spawn({
            let engine = engine.clone();
            let cancel = cancel.clone();
            async move { engine.transcribe(vec![0], "en", &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The second call is stuck at the gate; cancel it there.
        let waiter_cancel = CancellationToken::new();
        waiter_cancel.cancel();
        let result = engine.transcribe(vec![1], "en", &waiter_cancel).await;
        assert!(matches!(result, Err(TranscribeError::Cancelled)));

        busy.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_admission_cap_across_concurrent_calls() {
        /// Tracks how many transcriptions run at once.
        struct CountingRecognizer {
            concurrent: AtomicU32,
            high_water: AtomicU32,
        }

        impl Recognizer for CountingRecognizer {
            fn transcribe(&self, _wav_bytes: &[u8], _language: &str) -> anyhow::Result<String> {
                let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.high_water.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok("done".to_string())
            }
        }

        let recognizer = Arc::new(CountingRecognizer {
            concurrent: AtomicU32::new(0),
            high_water: AtomicU32::new(0),
        });
        let engine = Arc::new(adapter(recognizer.clone(), 2));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for tag in 0..8u8 {
            let engine = engine.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                engine.transcribe(vec![tag], "en", &cancel).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let high_water = recognizer.high_water.load(Ordering::SeqCst);
        assert!(
            high_water <= 2,
            "engine ran {} calls concurrently (cap is 2)",
            high_water
        );
    }
}
