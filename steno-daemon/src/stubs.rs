//! In-process stub collaborators used when no richer backend is configured:
//! `StubAudioSource`/`StubAudioSourceFactory`, `StubRecognizer`/
//! `StubRecognizerFactory`, `StubSummarizer`, and `AllowAllPermissionProbe`.
//!
//! Audio capture, the real recognizer, and LLM backends are external
//! collaborators per `spec.md` §1 — out of scope for this repo. These stubs
//! exist so the daemon runs end-to-end without them, directly modeled on
//! the teacher's `StubModel` (`dictum-core/src/inference/stub.rs`): an
//! echo-style placeholder that produces deterministic output so the rest of
//! the pipeline can be exercised, rather than a literal no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use rand::Rng;
use uuid::Uuid;

use steno_core::{
    AudioSource, AudioSourceFactory, PcmBuffer, PermissionProbe, RecognizerHandle,
    RecognizerResult, Source, SpeechRecognizerFactory, StoredSegment, Summarizer, Summary, Topic,
};
use steno_core::error::CollaboratorError;

/// Samples per stub buffer and the pacing between them. 100ms @ 16kHz
/// mono, a typical streaming-ASR chunk size.
const STUB_SAMPLE_RATE: u32 = 16_000;
const STUB_BUFFER_SAMPLES: usize = 1_600;
const STUB_BUFFER_INTERVAL: Duration = Duration::from_millis(100);

/// Always-allow permission probe. The real OS capture-permission prompt is
/// out of scope (`spec.md` §1); this is the seam the engine calls through.
pub struct AllowAllPermissionProbe;

impl PermissionProbe for AllowAllPermissionProbe {
    fn check(&self, _source: Source) -> Result<(), String> {
        Ok(())
    }
}

/// Produces a continuous sequence of low-amplitude PCM buffers at a jittered
/// cadence — the contract explicitly allows sub-real-time/bursty producers
/// (`spec.md` §4.2), so the stub leans into that rather than a perfectly
/// regular timer.
pub struct StubAudioSource;

#[async_trait]
impl AudioSource for StubAudioSource {
    async fn start(
        &mut self,
    ) -> Result<BoxStream<'static, Result<PcmBuffer, CollaboratorError>>, CollaboratorError> {
        let stream = futures::stream::unfold((), |()| async {
            let jitter_ms = rand::thread_rng().gen_range(0..40);
            tokio::time::sleep(STUB_BUFFER_INTERVAL + Duration::from_millis(jitter_ms)).await;
            let buffer = PcmBuffer {
                samples: vec![0.0; STUB_BUFFER_SAMPLES],
                sample_rate: STUB_SAMPLE_RATE,
                channels: 1,
            };
            Some((Ok(buffer), ()))
        });
        Ok(stream.boxed())
    }

    async fn stop(&mut self) {}
}

pub struct StubAudioSourceFactory;

impl AudioSourceFactory for StubAudioSourceFactory {
    fn make(
        &self,
        _device: Option<&str>,
        _source: Source,
    ) -> Result<Box<dyn AudioSource>, CollaboratorError> {
        Ok(Box::new(StubAudioSource))
    }

    fn list_devices(&self) -> Vec<String> {
        vec!["stub-default".to_string()]
    }
}

/// Echo-style recognizer: every buffer yields a `"…"` partial; every tenth
/// buffer commits a final utterance describing how many samples it has
/// seen so far, so the full segment/summary/topic pipeline has something
/// to chew on without a real recognizer wired in.
pub struct StubRecognizer {
    buffers_seen: u64,
}

#[async_trait]
impl RecognizerHandle for StubRecognizer {
    fn transcribe(
        &mut self,
        buffers: BoxStream<'static, Result<PcmBuffer, CollaboratorError>>,
    ) -> BoxStream<'static, Result<RecognizerResult, CollaboratorError>> {
        let mut seen = self.buffers_seen;
        buffers
            .filter_map(move |item| {
                seen += 1;
                let buffer_index = seen;
                async move {
                    let buffer = match item {
                        Ok(buffer) => buffer,
                        Err(e) => return Some(Err(e)),
                    };
                    let source = Source::Microphone;
                    let timestamp = chrono::Utc::now();
                    if buffer_index % 10 == 0 {
                        Some(Ok(RecognizerResult {
                            text: format!(
                                "[stub: {} samples @ {} Hz]",
                                buffer.samples.len(),
                                buffer.sample_rate
                            ),
                            is_final: true,
                            confidence: Some(1.0),
                            timestamp,
                            source,
                        }))
                    } else {
                        Some(Ok(RecognizerResult {
                            text: "\u{2026}".to_string(),
                            is_final: false,
                            confidence: None,
                            timestamp,
                            source,
                        }))
                    }
                }
            })
            .boxed()
    }

    async fn stop(&mut self) {}
}

pub struct StubRecognizerFactory;

impl SpeechRecognizerFactory for StubRecognizerFactory {
    fn make(
        &self,
        _locale: &str,
        _sample_rate: u32,
    ) -> Result<Box<dyn RecognizerHandle>, CollaboratorError> {
        Ok(Box::new(StubRecognizer { buffers_seen: 0 }))
    }
}

/// Deterministic summarizer stub. A real backend (local or hosted LLM) is
/// out of scope (`spec.md` §1); this produces stable, inspectable output so
/// the Coordinator's trigger/merge/persist logic can be exercised without
/// one, same spirit as `StubModel`.
pub struct StubSummarizer {
    calls: AtomicU64,
}

impl StubSummarizer {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }
}

impl Default for StubSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(
        &self,
        segments: &[StoredSegment],
        _previous_summary: Option<&Summary>,
    ) -> Result<String, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!(
            "[stub summary #{call}: {} segment(s) so far]",
            segments.len()
        ))
    }

    async fn generate_meeting_notes(
        &self,
        segments: &[StoredSegment],
        _previous_notes: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        Ok(format!("[stub notes: {} segment(s)]", segments.len()))
    }

    async fn extract_topics(
        &self,
        uncovered_segments: &[StoredSegment],
        _previous_topics: &[Topic],
        session_id: Uuid,
    ) -> Result<Vec<Topic>, CollaboratorError> {
        let (Some(first), Some(last)) = (uncovered_segments.first(), uncovered_segments.last())
        else {
            return Ok(Vec::new());
        };
        Ok(vec![Topic {
            id: Uuid::new_v4(),
            session_id,
            title: format!("Segments {}-{}", first.sequence_number, last.sequence_number),
            summary: "[stub topic summary]".to_string(),
            segment_range_start: first.sequence_number,
            segment_range_end: last.sequence_number,
            created_at: chrono::Utc::now(),
        }])
    }
}
