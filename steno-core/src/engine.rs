//! Recording Engine (C6) — the single-writer state machine that owns audio
//! sources and recognizers, enforces session lifecycle, and emits engine
//! events to the Broadcaster. The hardest subsystem per `spec.md` §4.3.
//!
//! Generalizes the teacher's `DictumEngine` (`dictum-core/src/engine/mod.rs`):
//! the teacher's `Arc<AtomicBool> running` flag becomes the five-state
//! `EngineStatus` behind a single `tokio::sync::Mutex<EngineState>` (the
//! teacher reads/writes its flag/status from plain methods with no async
//! work in between; this engine's `start`/`stop` do real async setup/teardown,
//! so the lock is async rather than `parking_lot`). The teacher's
//! `seq: Arc<AtomicU64>` grounds the per-session dense sequence counter
//! (`EngineState::sequence` below). The teacher's three
//! `broadcast::Sender<_>` fan-outs are replaced by the single directed
//! `EngineEvent` channel to the Broadcaster required by `spec.md` §5.
//!
//! Unlike the teacher — whose `cpal::Stream` is opened and run entirely
//! inside one `spawn_blocking` closure — this engine's collaborators are
//! plain async traits, so pipeline setup and teardown are ordinary
//! `tokio::spawn`ed tasks; the structural idea (open resource, confirm via a
//! signal before returning from `start`, release all resources on every
//! exit path) carries over directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::broadcaster::EventBroadcaster;
use crate::collaborators::{
    AudioSource, AudioSourceFactory, PcmBuffer, PermissionProbe, RecognizerHandle, Repository,
    SpeechRecognizerFactory,
};
use crate::coordinator::SummaryCoordinator;
use crate::domain::{EngineEvent, EngineStatus, RecognizerResult, Session, Source, StoredSegment};
use crate::error::{CollaboratorError, EngineError};

/// Level-metering tick rate: at most 10 Hz per `spec.md` §4.3's "Level
/// metering" design hook.
const LEVEL_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on how long `stop()` waits for a pipeline's consumer task to
/// notice cancellation and exit before abandoning it, so shutdown completes
/// in bounded time even if a recognizer hangs (`spec.md` §4.3 "Shutdown").
const PIPELINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of engine state, returned by [`RecordingEngine::snapshot`] for
/// the `status` command (`spec.md` §4.6).
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    pub session: Option<Session>,
    pub device: Option<String>,
    pub system_audio_enabled: bool,
    pub segment_count: u64,
}

/// Aggregates the latest per-source peak amplitude since the last timer
/// tick. A single timer reads and resets both fields at 10 Hz; buffer
/// consumption in each pipeline only ever raises its own source's peak, so
/// there is no cross-source contention — just shared-with-the-timer.
#[derive(Default)]
struct LevelMeter {
    peaks: SyncMutex<(f32, f32)>,
}

impl LevelMeter {
    fn observe(&self, source: Source, level: f32) {
        let mut peaks = self.peaks.lock();
        match source {
            Source::Microphone => peaks.0 = peaks.0.max(level),
            Source::SystemAudio => peaks.1 = peaks.1.max(level),
        }
    }

    fn take(&self) -> (f32, f32) {
        std::mem::replace(&mut *self.peaks.lock(), (0.0, 0.0))
    }
}

fn peak_of(buffer: &PcmBuffer) -> f32 {
    buffer.samples.iter().fold(0f32, |acc, s| acc.max(s.abs()))
}

/// A fully set-up pipeline, not yet handed to the scheduler. Holds both
/// collaborator handles (so `stop()` can reach them later) and the
/// recognizer's still-unconsumed result stream.
struct PendingPipeline {
    source: Source,
    audio_source: Arc<AsyncMutex<Box<dyn AudioSource>>>,
    recognizer: Arc<AsyncMutex<Box<dyn RecognizerHandle>>>,
    results: BoxStream<'static, Result<RecognizerResult, CollaboratorError>>,
}

/// A running pipeline: audio source feeding a recognizer, whose results are
/// being drained by `task`.
struct Pipeline {
    source: Source,
    audio_source: Arc<AsyncMutex<Box<dyn AudioSource>>>,
    recognizer: Arc<AsyncMutex<Box<dyn RecognizerHandle>>>,
    task: JoinHandle<()>,
}

/// Releases a pipeline's collaborators that were opened but never armed
/// (recognizer/audio source `stop()`, in reverse of setup order), used to
/// roll back a partially-started `start()` call.
async fn teardown_pending(pending: PendingPipeline) {
    pending.recognizer.lock().await.stop().await;
    pending.audio_source.lock().await.stop().await;
}

/// Tears down a running pipeline: stops the recognizer then the audio
/// source (reverse of setup order, per `spec.md` §5 "Cancellation"), then
/// waits — bounded by [`PIPELINE_STOP_TIMEOUT`] — for its consumer task to
/// finish any in-flight `handleResult` work.
async fn teardown(pipeline: Pipeline) {
    let source = pipeline.source;
    pipeline.recognizer.lock().await.stop().await;
    pipeline.audio_source.lock().await.stop().await;

    let abort_handle = pipeline.task.abort_handle();
    if tokio::time::timeout(PIPELINE_STOP_TIMEOUT, pipeline.task)
        .await
        .is_err()
    {
        abort_handle.abort();
        warn!(?source, "pipeline task exceeded stop timeout; aborted");
    }
}

/// Drains one pipeline's result stream, dispatching each item back to the
/// engine. Runs until the recognizer's stream ends — naturally (buffer
/// input exhausted) or because `stop()` cancelled it.
async fn run_pipeline(
    engine: Arc<RecordingEngine>,
    mut results: BoxStream<'static, Result<RecognizerResult, CollaboratorError>>,
) {
    while let Some(item) = results.next().await {
        match item {
            Ok(result) => engine.handle_result(result).await,
            Err(err) => engine.handle_recognizer_error(err).await,
        }
    }
}

struct EngineState {
    status: EngineStatus,
    session: Option<Session>,
    device: Option<String>,
    system_audio_enabled: bool,
    /// Dense, 1-based, per-session; shared across both sources so that
    /// finalization order (not per-source order) determines sequence
    /// assignment, per `spec.md` §4.3 "Ordering".
    sequence: u64,
    pipelines: Vec<Pipeline>,
    level_timer: Option<JoinHandle<()>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            status: EngineStatus::Idle,
            session: None,
            device: None,
            system_audio_enabled: false,
            sequence: 0,
            pipelines: Vec::new(),
            level_timer: None,
        }
    }
}

/// The Recording Engine. All mutable state lives behind one
/// `tokio::sync::Mutex`; every mutating entry point (`start`, `stop`, and
/// the internal `handle_result`) locks it, so the engine is — as `spec.md`
/// §5 requires — a single-writer actor even though it has no dedicated
/// actor task of its own, consistent with the rest of this codebase's
/// direct `Arc<Mutex<_>>` idiom (see [`crate::broadcaster::EventBroadcaster`],
/// [`crate::coordinator::SummaryCoordinator`]).
pub struct RecordingEngine {
    repository: Arc<dyn Repository>,
    audio_factory: Arc<dyn AudioSourceFactory>,
    recognizer_factory: Arc<dyn SpeechRecognizerFactory>,
    permission_probe: Arc<dyn PermissionProbe>,
    coordinator: Arc<SummaryCoordinator>,
    broadcaster: EventBroadcaster,
    level_meter: Arc<LevelMeter>,
    state: AsyncMutex<EngineState>,
}

impl RecordingEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        audio_factory: Arc<dyn AudioSourceFactory>,
        recognizer_factory: Arc<dyn SpeechRecognizerFactory>,
        permission_probe: Arc<dyn PermissionProbe>,
        coordinator: Arc<SummaryCoordinator>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            repository,
            audio_factory,
            recognizer_factory,
            permission_probe,
            coordinator,
            broadcaster,
            level_meter: Arc::new(LevelMeter::default()),
            state: AsyncMutex::new(EngineState::default()),
        }
    }

    // ── Public operations (spec.md §4.3) ────────────────────────────────

    /// Starts recording. Fails with `AlreadyRecording` unless the engine is
    /// `idle` or `error`; fails with `PermissionDenied` if the permission
    /// probe rejects either requested source; fails with
    /// `AudioSourceFailed`/`RecognizerFailed` if pipeline setup fails. On
    /// success, a new `active` session exists and the engine is
    /// `recording` by the time this returns.
    pub async fn start(
        self: &Arc<Self>,
        locale: &str,
        device: Option<String>,
        system_audio: bool,
    ) -> Result<Session, EngineError> {
        {
            let mut guard = self.state.lock().await;
            if !matches!(guard.status, EngineStatus::Idle | EngineStatus::Error) {
                return Err(EngineError::AlreadyRecording);
            }
            guard.status = EngineStatus::Starting;
        }

        if let Err(message) = self.permission_probe.check(Source::Microphone) {
            self.enter_error(message.clone()).await;
            return Err(EngineError::PermissionDenied(message));
        }
        if system_audio {
            if let Err(message) = self.permission_probe.check(Source::SystemAudio) {
                self.enter_error(message.clone()).await;
                return Err(EngineError::PermissionDenied(message));
            }
        }

        let session = match self.repository.create_session(locale).await {
            Ok(session) => session,
            Err(e) => {
                self.enter_error(e.to_string()).await;
                return Err(EngineError::Repository(e));
            }
        };

        let mic_pending = match self.setup_pipeline(Source::Microphone, device.clone(), locale).await {
            Ok(pending) => pending,
            Err(e) => {
                let _ = self.repository.end_session(session.id).await;
                self.enter_error(e.to_string()).await;
                return Err(e);
            }
        };

        let sys_pending = if system_audio {
            match self.setup_pipeline(Source::SystemAudio, None, locale).await {
                Ok(pending) => Some(pending),
                Err(e) => {
                    teardown_pending(mic_pending).await;
                    let _ = self.repository.end_session(session.id).await;
                    self.enter_error(e.to_string()).await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Commit: flip to `recording` and emit the status event *before*
        // any pipeline task is spawned, so no `handleResult` call can race
        // ahead of the `status` event a client is waiting on — see
        // `spec.md` §8 S1's expected event order.
        {
            let mut guard = self.state.lock().await;
            guard.status = EngineStatus::Recording;
            guard.session = Some(session.clone());
            guard.device = device;
            guard.system_audio_enabled = system_audio;
            guard.sequence = 0;
        }
        self.emit(EngineEvent::StatusChanged(EngineStatus::Recording));

        let mut pipelines = vec![self.arm_pipeline(mic_pending)];
        if let Some(pending) = sys_pending {
            pipelines.push(self.arm_pipeline(pending));
        }

        {
            let mut guard = self.state.lock().await;
            guard.pipelines = pipelines;
            guard.level_timer = Some(self.spawn_level_timer());
        }

        Ok(session)
    }

    /// Stops recording. No-op if already `idle`. Cancels both pipelines,
    /// ends the session, and transitions to `idle` — bounded in time even
    /// if a recognizer hangs (each pipeline teardown is itself bounded, see
    /// [`PIPELINE_STOP_TIMEOUT`]). Safe to call concurrently or repeatedly.
    pub async fn stop(self: &Arc<Self>) {
        let (pipelines, level_timer, session) = {
            let mut guard = self.state.lock().await;
            if guard.status == EngineStatus::Idle {
                return;
            }
            guard.status = EngineStatus::Stopping;
            (
                std::mem::take(&mut guard.pipelines),
                guard.level_timer.take(),
                guard.session.clone(),
            )
        };

        if let Some(handle) = level_timer {
            handle.abort();
        }

        for pipeline in pipelines {
            teardown(pipeline).await;
        }

        if let Some(session) = &session {
            if let Err(e) = self.repository.end_session(session.id).await {
                warn!(error = %e, session_id = %session.id, "failed to end session on stop");
            }
        }

        {
            let mut guard = self.state.lock().await;
            guard.status = EngineStatus::Idle;
            guard.session = None;
            guard.device = None;
            guard.system_audio_enabled = false;
            guard.sequence = 0;
        }
        self.emit(EngineEvent::StatusChanged(EngineStatus::Idle));
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let guard = self.state.lock().await;
        EngineSnapshot {
            status: guard.status,
            session: guard.session.clone(),
            device: guard.device.clone(),
            system_audio_enabled: guard.system_audio_enabled,
            segment_count: guard.sequence,
        }
    }

    pub async fn status(&self) -> EngineStatus {
        self.state.lock().await.status
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    pub async fn current_device(&self) -> Option<String> {
        self.state.lock().await.device.clone()
    }

    pub async fn is_system_audio_enabled(&self) -> bool {
        self.state.lock().await.system_audio_enabled
    }

    pub async fn segment_count(&self) -> u64 {
        self.state.lock().await.sequence
    }

    // ── Internal: pipeline lifecycle ────────────────────────────────────

    /// Opens the audio source, peeks its first buffer to learn the
    /// recognizer's sample rate, then constructs the recognizer — all
    /// without spawning the consumer task, so a failure here leaves no
    /// background work to clean up beyond the two collaborators themselves.
    async fn setup_pipeline(
        &self,
        source: Source,
        device: Option<String>,
        locale: &str,
    ) -> Result<PendingPipeline, EngineError> {
        let mut audio_source = self
            .audio_factory
            .make(device.as_deref(), source)
            .map_err(|e| EngineError::AudioSourceFailed(e.to_string()))?;

        let mut buffers = audio_source
            .start()
            .await
            .map_err(|e| EngineError::AudioSourceFailed(e.to_string()))?;

        let first = buffers.next().await;
        let sample_rate = match &first {
            Some(Ok(buffer)) => buffer.sample_rate,
            Some(Err(e)) => return Err(EngineError::AudioSourceFailed(e.to_string())),
            None => {
                return Err(EngineError::AudioSourceFailed(
                    "audio source ended before producing a buffer".to_string(),
                ))
            }
        };

        let meter = Arc::clone(&self.level_meter);
        let buffers: BoxStream<'static, Result<PcmBuffer, CollaboratorError>> = match first {
            Some(item) => futures::stream::once(async move { item }).chain(buffers).boxed(),
            None => unreachable!("checked above"),
        };
        let buffers = buffers
            .inspect(move |item| {
                if let Ok(buffer) = item {
                    meter.observe(source, peak_of(buffer));
                }
            })
            .boxed();

        let mut recognizer = self
            .recognizer_factory
            .make(locale, sample_rate)
            .map_err(|e| EngineError::RecognizerFailed(e.to_string()))?;
        let results = recognizer.transcribe(buffers);

        Ok(PendingPipeline {
            source,
            audio_source: Arc::new(AsyncMutex::new(audio_source)),
            recognizer: Arc::new(AsyncMutex::new(recognizer)),
            results,
        })
    }

    fn arm_pipeline(self: &Arc<Self>, pending: PendingPipeline) -> Pipeline {
        let PendingPipeline {
            source,
            audio_source,
            recognizer,
            results,
        } = pending;
        let task = tokio::spawn(run_pipeline(Arc::clone(self), results));
        Pipeline {
            source,
            audio_source,
            recognizer,
            task,
        }
    }

    fn spawn_level_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            // `interval_at` instead of `interval`: the latter's first tick
            // fires immediately, which would emit a spurious all-zero
            // `Level` event before any buffer has been observed.
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + LEVEL_TICK_INTERVAL,
                LEVEL_TICK_INTERVAL,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let (mic, sys) = engine.level_meter.take();
                engine.emit(EngineEvent::Level { mic, sys });
            }
        })
    }

    // ── Internal: result handling (spec.md §4.3 "Handling a result") ────

    async fn handle_result(&self, result: RecognizerResult) {
        if !result.is_final {
            self.emit(EngineEvent::PartialText {
                text: result.text,
                source: result.source,
            });
            return;
        }

        let text = result.text.trim().to_string();
        if text.is_empty() {
            return;
        }

        let saved = {
            let mut guard = self.state.lock().await;
            if guard.status != EngineStatus::Recording {
                return;
            }
            let Some(session) = guard.session.clone() else {
                return;
            };
            let sequence_number = guard.sequence + 1;
            let segment = StoredSegment {
                id: Uuid::new_v4(),
                session_id: session.id,
                text,
                started_at: result.timestamp,
                ended_at: Utc::now(),
                confidence: result.confidence,
                sequence_number,
                source: result.source,
                created_at: Utc::now(),
            };
            match self.repository.save_segment(segment.clone()).await {
                Ok(()) => {
                    guard.sequence = sequence_number;
                    Some((session.id, segment))
                }
                Err(e) => {
                    drop(guard);
                    self.emit(EngineEvent::Error {
                        message: e.to_string(),
                        is_transient: true,
                    });
                    None
                }
            }
        };

        let Some((session_id, segment)) = saved else {
            return;
        };
        self.emit(EngineEvent::SegmentFinalized(segment));

        self.emit(EngineEvent::ModelProcessing(true));
        let summary_result = self.coordinator.on_segment_saved(session_id).await;
        self.emit(EngineEvent::ModelProcessing(false));

        if let Some(result) = summary_result {
            if !result.topics.is_empty() {
                self.emit(EngineEvent::TopicsUpdated(result.topics));
            }
        }
    }

    /// Recognizer mid-stream errors are transient unless the error is the
    /// expected cancellation signal (`spec.md` §4.3 "Error semantics"; the
    /// `is_cancellation` flag resolves the open question in §9 in favor of
    /// an explicit sentinel over message string-matching).
    async fn handle_recognizer_error(&self, err: CollaboratorError) {
        match err {
            CollaboratorError::Recognizer {
                message,
                is_cancellation,
            } => {
                if is_cancellation {
                    return;
                }
                self.emit(EngineEvent::Error {
                    message,
                    is_transient: true,
                });
            }
            other => self.emit(EngineEvent::Error {
                message: other.to_string(),
                is_transient: true,
            }),
        }
    }

    async fn enter_error(&self, message: String) {
        self.state.lock().await.status = EngineStatus::Error;
        self.emit(EngineEvent::Error {
            message,
            is_transient: false,
        });
    }

    fn emit(&self, event: EngineEvent) {
        self.broadcaster.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Summarizer;
    use crate::coordinator::CoordinatorConfig;
    use crate::domain::{Session as DomainSession, SessionStatus, Summary, Topic};
    use crate::error::RepositoryError;
    use crate::wire::EventTag;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct InMemoryRepository {
        sessions: TokioMutex<HashMap<Uuid, DomainSession>>,
        segments: TokioMutex<HashMap<Uuid, Vec<StoredSegment>>>,
        summaries: TokioMutex<HashMap<Uuid, Vec<Summary>>>,
        topics: TokioMutex<HashMap<Uuid, Vec<Topic>>>,
    }

    #[async_trait]
    impl Repository for InMemoryRepository {
        async fn create_session(&self, locale: &str) -> Result<DomainSession, RepositoryError> {
            let session = DomainSession {
                id: Uuid::new_v4(),
                locale: locale.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                title: None,
                status: SessionStatus::Active,
                created_at: Utc::now(),
            };
            self.sessions
                .lock()
                .await
                .insert(session.id, session.clone());
            Ok(session)
        }

        async fn end_session(&self, id: Uuid) -> Result<(), RepositoryError> {
            if let Some(s) = self.sessions.lock().await.get_mut(&id) {
                s.status = SessionStatus::Completed;
                s.ended_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn session(&self, id: Uuid) -> Result<Option<DomainSession>, RepositoryError> {
            Ok(self.sessions.lock().await.get(&id).cloned())
        }

        async fn all_sessions(&self) -> Result<Vec<DomainSession>, RepositoryError> {
            Ok(self.sessions.lock().await.values().cloned().collect())
        }

        async fn delete_session(&self, id: Uuid) -> Result<(), RepositoryError> {
            self.sessions.lock().await.remove(&id);
            self.segments.lock().await.remove(&id);
            self.summaries.lock().await.remove(&id);
            self.topics.lock().await.remove(&id);
            Ok(())
        }

        async fn save_segment(&self, segment: StoredSegment) -> Result<(), RepositoryError> {
            let mut segments = self.segments.lock().await;
            let existing = segments.entry(segment.session_id).or_default();
            if existing
                .iter()
                .any(|s| s.sequence_number == segment.sequence_number)
            {
                return Err(RepositoryError::ConstraintViolation(
                    "duplicate sequence number".to_string(),
                ));
            }
            existing.push(segment);
            Ok(())
        }

        async fn segments(&self, session_id: Uuid) -> Result<Vec<StoredSegment>, RepositoryError> {
            Ok(self
                .segments
                .lock()
                .await
                .get(&session_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn segments_between(
            &self,
            _from: chrono::DateTime<Utc>,
            _to: chrono::DateTime<Utc>,
        ) -> Result<Vec<StoredSegment>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn segment_count(&self, session_id: Uuid) -> Result<u64, RepositoryError> {
            Ok(self
                .segments
                .lock()
                .await
                .get(&session_id)
                .map(|v| v.len() as u64)
                .unwrap_or(0))
        }

        async fn save_summary(&self, summary: Summary) -> Result<(), RepositoryError> {
            self.summaries
                .lock()
                .await
                .entry(summary.session_id)
                .or_default()
                .push(summary);
            Ok(())
        }

        async fn summaries(&self, session_id: Uuid) -> Result<Vec<Summary>, RepositoryError> {
            Ok(self
                .summaries
                .lock()
                .await
                .get(&session_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn latest_summary(&self, session_id: Uuid) -> Result<Option<Summary>, RepositoryError> {
            Ok(self
                .summaries
                .lock()
                .await
                .get(&session_id)
                .and_then(|v| v.last().cloned()))
        }

        async fn save_topic(&self, topic: Topic) -> Result<(), RepositoryError> {
            self.topics
                .lock()
                .await
                .entry(topic.session_id)
                .or_default()
                .push(topic);
            Ok(())
        }

        async fn topics(&self, session_id: Uuid) -> Result<Vec<Topic>, RepositoryError> {
            Ok(self
                .topics
                .lock()
                .await
                .get(&session_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct AllowAllPermissions;
    impl PermissionProbe for AllowAllPermissions {
        fn check(&self, _source: Source) -> Result<(), String> {
            Ok(())
        }
    }

    struct DenyMicPermission;
    impl PermissionProbe for DenyMicPermission {
        fn check(&self, source: Source) -> Result<(), String> {
            match source {
                Source::Microphone => Err("microphone access denied".to_string()),
                Source::SystemAudio => Ok(()),
            }
        }
    }

    struct ScriptedAudioSource;
    #[async_trait]
    impl AudioSource for ScriptedAudioSource {
        async fn start(
            &mut self,
        ) -> Result<BoxStream<'static, Result<PcmBuffer, CollaboratorError>>, CollaboratorError> {
            let buffer = PcmBuffer {
                samples: vec![0.01; 160],
                sample_rate: 16_000,
                channels: 1,
            };
            Ok(futures::stream::iter(vec![Ok(buffer)]).boxed())
        }

        async fn stop(&mut self) {}
    }

    struct ScriptedAudioFactory;
    impl AudioSourceFactory for ScriptedAudioFactory {
        fn make(
            &self,
            _device: Option<&str>,
            _source: Source,
        ) -> Result<Box<dyn AudioSource>, CollaboratorError> {
            Ok(Box::new(ScriptedAudioSource))
        }

        fn list_devices(&self) -> Vec<String> {
            vec!["default".to_string()]
        }
    }

    struct ScriptedRecognizer {
        script: Vec<RecognizerResult>,
    }
    #[async_trait]
    impl RecognizerHandle for ScriptedRecognizer {
        fn transcribe(
            &mut self,
            _buffers: BoxStream<'static, Result<PcmBuffer, CollaboratorError>>,
        ) -> BoxStream<'static, Result<RecognizerResult, CollaboratorError>> {
            futures::stream::iter(std::mem::take(&mut self.script).into_iter().map(Ok)).boxed()
        }

        async fn stop(&mut self) {}
    }

    struct ScriptedRecognizerFactory {
        script: Vec<RecognizerResult>,
    }
    impl SpeechRecognizerFactory for ScriptedRecognizerFactory {
        fn make(
            &self,
            _locale: &str,
            _sample_rate: u32,
        ) -> Result<Box<dyn RecognizerHandle>, CollaboratorError> {
            Ok(Box::new(ScriptedRecognizer {
                script: self.script.clone(),
            }))
        }
    }

    struct NoopSummarizer;
    #[async_trait]
    impl Summarizer for NoopSummarizer {
        async fn summarize(
            &self,
            _segments: &[StoredSegment],
            _previous_summary: Option<&Summary>,
        ) -> Result<String, CollaboratorError> {
            Ok("summary".to_string())
        }

        async fn generate_meeting_notes(
            &self,
            _segments: &[StoredSegment],
            _previous_notes: Option<&str>,
        ) -> Result<String, CollaboratorError> {
            Ok("notes".to_string())
        }

        async fn extract_topics(
            &self,
            _uncovered_segments: &[StoredSegment],
            _previous_topics: &[Topic],
            _session_id: Uuid,
        ) -> Result<Vec<Topic>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    fn hello_world_script() -> Vec<RecognizerResult> {
        vec![
            RecognizerResult {
                text: "hello".to_string(),
                is_final: false,
                confidence: None,
                timestamp: Utc::now(),
                source: Source::Microphone,
            },
            RecognizerResult {
                text: "hello world".to_string(),
                is_final: true,
                confidence: Some(0.95),
                timestamp: Utc::now(),
                source: Source::Microphone,
            },
        ]
    }

    fn build_engine(
        repository: Arc<dyn Repository>,
        recognizer_script: Vec<RecognizerResult>,
        permission_probe: Arc<dyn PermissionProbe>,
        broadcaster: EventBroadcaster,
    ) -> Arc<RecordingEngine> {
        let coordinator = Arc::new(SummaryCoordinator::new(
            repository.clone(),
            Arc::new(NoopSummarizer),
            CoordinatorConfig::default(),
        ));
        Arc::new(RecordingEngine::new(
            repository,
            Arc::new(ScriptedAudioFactory),
            Arc::new(ScriptedRecognizerFactory {
                script: recognizer_script,
            }),
            permission_probe,
            coordinator,
            broadcaster,
        ))
    }

    /// S1 — start/segment/stop: status, partial, segment arrive in order;
    /// an empty final (S2) is covered separately below.
    #[tokio::test]
    async fn start_then_segment_then_stop_in_order() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::default());
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe(
            Uuid::new_v4(),
            vec![EventTag::Partial, EventTag::Segment, EventTag::Status],
        );

        let engine = build_engine(
            repository.clone(),
            hello_world_script(),
            Arc::new(AllowAllPermissions),
            broadcaster,
        );

        let session = engine
            .start("en-US", None, false)
            .await
            .expect("start should succeed");

        let status_line = rx.recv().await.expect("expected status event");
        assert!(status_line.contains("\"event\":\"status\""));
        assert!(status_line.contains("\"recording\":true"));

        let partial_line = rx.recv().await.expect("expected partial event");
        assert!(partial_line.contains("\"text\":\"hello\""));

        let segment_line = rx.recv().await.expect("expected segment event");
        assert!(segment_line.contains("\"sequenceNumber\":1"));
        assert!(segment_line.contains("hello world"));

        // Let the coordinator's (stubbed, fast) run complete.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.segment_count().await, 1);

        engine.stop().await;
        assert_eq!(engine.status().await, EngineStatus::Idle);

        let stored = repository.segments(session.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sequence_number, 1);
        assert_eq!(stored[0].text, "hello world");
    }

    /// S2 — an empty-text final is silently dropped: no segment persisted,
    /// no `segment` event.
    #[tokio::test]
    async fn empty_final_is_dropped() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::default());
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe(Uuid::new_v4(), vec![EventTag::Segment]);

        let script = vec![RecognizerResult {
            text: "   ".to_string(),
            is_final: true,
            confidence: None,
            timestamp: Utc::now(),
            source: Source::Microphone,
        }];

        let engine = build_engine(
            repository.clone(),
            script,
            Arc::new(AllowAllPermissions),
            broadcaster,
        );
        let session = engine.start("en-US", None, false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "no segment event for empty final");
        assert_eq!(
            repository.segment_count(session.id).await.unwrap(),
            0,
            "empty final must not be persisted"
        );

        engine.stop().await;
    }

    /// S5 — double start while recording fails with `AlreadyRecording` and
    /// leaves the engine `recording`.
    #[tokio::test]
    async fn double_start_fails_and_stays_recording() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::default());
        let broadcaster = EventBroadcaster::new();
        let engine = build_engine(
            repository,
            hello_world_script(),
            Arc::new(AllowAllPermissions),
            broadcaster,
        );

        engine.start("en-US", None, false).await.unwrap();
        let second = engine.start("en-US", None, false).await;

        assert!(matches!(second, Err(EngineError::AlreadyRecording)));
        assert_eq!(engine.status().await, EngineStatus::Recording);

        engine.stop().await;
    }

    /// Permission denial enters `error` and surfaces a non-transient error
    /// event, without ever creating a dangling active session.
    #[tokio::test]
    async fn permission_denied_enters_error_status() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::default());
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe(Uuid::new_v4(), vec![EventTag::Error]);

        let engine = build_engine(
            repository.clone(),
            hello_world_script(),
            Arc::new(DenyMicPermission),
            broadcaster,
        );

        let result = engine.start("en-US", None, false).await;
        assert!(matches!(result, Err(EngineError::PermissionDenied(_))));
        assert_eq!(engine.status().await, EngineStatus::Error);

        let error_line = rx.recv().await.expect("expected error event");
        assert!(error_line.contains("\"transient\":false"));
        assert!(repository.all_sessions().await.unwrap().is_empty());
    }

    /// Testable property 8: stop on an already-idle engine is a no-op, and
    /// repeated rapid stops complete and leave status idle.
    #[tokio::test]
    async fn stop_is_idempotent() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::default());
        let broadcaster = EventBroadcaster::new();
        let engine = build_engine(
            repository,
            hello_world_script(),
            Arc::new(AllowAllPermissions),
            broadcaster,
        );

        engine.stop().await;
        assert_eq!(engine.status().await, EngineStatus::Idle);

        engine.start("en-US", None, false).await.unwrap();
        let (e1, e2) = (Arc::clone(&engine), Arc::clone(&engine));
        tokio::join!(async move { e1.stop().await }, async move { e2.stop().await });
        assert_eq!(engine.status().await, EngineStatus::Idle);
    }

    /// Testable property 1: sequence numbers are dense starting at 1 with
    /// no gaps, even across both sources (interleaved finalization order).
    #[tokio::test]
    async fn sequence_numbers_are_dense_across_sources() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::default());
        let broadcaster = EventBroadcaster::new();

        let script = vec![
            RecognizerResult {
                text: "one".to_string(),
                is_final: true,
                confidence: None,
                timestamp: Utc::now(),
                source: Source::Microphone,
            },
            RecognizerResult {
                text: "two".to_string(),
                is_final: true,
                confidence: None,
                timestamp: Utc::now(),
                source: Source::Microphone,
            },
            RecognizerResult {
                text: "three".to_string(),
                is_final: true,
                confidence: None,
                timestamp: Utc::now(),
                source: Source::Microphone,
            },
        ];

        let engine = build_engine(
            repository.clone(),
            script,
            Arc::new(AllowAllPermissions),
            broadcaster,
        );
        let session = engine.start("en-US", None, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stored = repository.segments(session.id).await.unwrap();
        let mut seen: Vec<u64> = stored.iter().map(|s| s.sequence_number).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);

        engine.stop().await;
    }
}
