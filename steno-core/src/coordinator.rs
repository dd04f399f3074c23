//! Summary Coordinator (C5): debounced, incremental, best-effort rolling
//! summary + meeting notes + topic extraction.
//!
//! The teacher has no equivalent (no LLM backend in `dictum-core`). Enriched
//! from the `tjameswilliams-meeting-assistant` pack example — its `ai.rs`
//! and `plugins/ollama_provider.rs` establish the idiom of a config struct
//! with `Default`, a trait-object backend, and `tokio::time::timeout`
//! wrapping every model call with a placeholder-on-failure fallback, which
//! this module follows. The per-session serialization uses a plain
//! `Arc<Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>>` lock
//! registry rather than a literal actor task, consistent with this
//! codebase's direct `Arc<Mutex<_>>` idiom elsewhere (repository, engine,
//! broadcaster).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

use crate::collaborators::{Repository, Summarizer};
use crate::domain::{Summary, SummaryType, Topic};
use crate::error::RepositoryError;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub trigger_count: u64,
    pub time_threshold: Duration,
    pub min_segments_for_time_trigger: u64,
    pub llm_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            trigger_count: 10,
            time_threshold: Duration::from_secs(30),
            min_segments_for_time_trigger: 3,
            llm_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of a fired coordinator run, returned to the engine so it can emit
/// `topicsUpdated` when new topics were extracted.
#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub brief_summary: String,
    pub meeting_notes: String,
    pub topics: Vec<Topic>,
}

const PLACEHOLDER_SUMMARY: &str = "(summary unavailable — generation timed out or failed)";
const PLACEHOLDER_NOTES: &str = "(meeting notes unavailable — generation timed out or failed)";

pub struct SummaryCoordinator {
    repository: Arc<dyn Repository>,
    summarizer: Arc<dyn Summarizer>,
    config: CoordinatorConfig,
    last_summary_at: SyncMutex<HashMap<Uuid, chrono::DateTime<chrono::Utc>>>,
    session_locks: SyncMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl SummaryCoordinator {
    pub fn new(
        repository: Arc<dyn Repository>,
        summarizer: Arc<dyn Summarizer>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            repository,
            summarizer,
            config,
            last_summary_at: SyncMutex::new(HashMap::new()),
            session_locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.session_locks
            .lock()
            .entry(session_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Called by the engine once per saved segment. Non-fatal: any internal
    /// failure is logged and swallowed, never propagated to the caller.
    pub async fn on_segment_saved(&self, session_id: Uuid) -> Option<SummaryResult> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        match self.try_fire(session_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, %session_id, "summary coordinator run failed, skipping");
                None
            }
        }
    }

    async fn try_fire(&self, session_id: Uuid) -> Result<Option<SummaryResult>, RepositoryError> {
        let count = self.repository.segment_count(session_id).await?;
        if count == 0 {
            return Ok(None);
        }
        let latest_summary = self.repository.latest_summary(session_id).await?;
        let last_covered = latest_summary
            .as_ref()
            .map(|s| s.segment_range_end)
            .unwrap_or(0);
        let new = count.saturating_sub(last_covered);

        let should_fire = if new >= self.config.trigger_count {
            true
        } else if new >= self.config.min_segments_for_time_trigger {
            let last_at = self.last_summary_at.lock().get(&session_id).copied();
            match last_at {
                None => true,
                Some(at) => {
                    let elapsed = chrono::Utc::now().signed_duration_since(at);
                    elapsed.to_std().unwrap_or(Duration::ZERO) >= self.config.time_threshold
                }
            }
        } else {
            false
        };

        if !should_fire {
            return Ok(None);
        }

        let result = self.run(session_id, last_covered, latest_summary).await?;
        self.last_summary_at
            .lock()
            .insert(session_id, chrono::Utc::now());
        Ok(Some(result))
    }

    async fn run(
        &self,
        session_id: Uuid,
        last_covered: u64,
        previous_summary: Option<Summary>,
    ) -> Result<SummaryResult, RepositoryError> {
        let all_segments = self.repository.segments(session_id).await?;
        let to_segment = all_segments
            .last()
            .map(|s| s.sequence_number)
            .unwrap_or(last_covered);

        let brief_summary = match tokio::time::timeout(
            self.config.llm_timeout,
            self.summarizer
                .summarize(&all_segments, previous_summary.as_ref()),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, %session_id, "summarize failed, using placeholder");
                PLACEHOLDER_SUMMARY.to_string()
            }
            Err(_) => {
                warn!(%session_id, "summarize timed out, using placeholder");
                PLACEHOLDER_SUMMARY.to_string()
            }
        };

        let meeting_notes = match tokio::time::timeout(
            self.config.llm_timeout,
            self.summarizer.generate_meeting_notes(&all_segments, None),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, %session_id, "meeting notes generation failed, using placeholder");
                PLACEHOLDER_NOTES.to_string()
            }
            Err(_) => {
                warn!(%session_id, "meeting notes generation timed out, using placeholder");
                PLACEHOLDER_NOTES.to_string()
            }
        };

        let existing_topics = self.repository.topics(session_id).await?;
        let highest_covered = existing_topics
            .iter()
            .map(|t| t.segment_range_end)
            .max()
            .unwrap_or(0);
        let uncovered: Vec<_> = all_segments
            .iter()
            .filter(|s| s.sequence_number > highest_covered)
            .cloned()
            .collect();

        let mut newly_extracted = Vec::new();
        if !uncovered.is_empty() {
            let extracted = match tokio::time::timeout(
                self.config.llm_timeout,
                self.summarizer
                    .extract_topics(&uncovered, &existing_topics, session_id),
            )
            .await
            {
                Ok(Ok(topics)) => topics,
                Ok(Err(e)) => {
                    warn!(error = %e, %session_id, "topic extraction failed, preserving existing topics");
                    Vec::new()
                }
                Err(_) => {
                    warn!(%session_id, "topic extraction timed out, preserving existing topics");
                    Vec::new()
                }
            };
            for topic in extracted {
                self.repository.save_topic(topic.clone()).await?;
                newly_extracted.push(topic);
            }
        }

        let summary = Summary {
            id: Uuid::new_v4(),
            session_id,
            content: brief_summary.clone(),
            summary_type: SummaryType::Rolling,
            segment_range_start: last_covered + 1,
            segment_range_end: to_segment,
            model_id: "coordinator-default".to_string(),
            created_at: chrono::Utc::now(),
        };
        self.repository.save_summary(summary).await?;

        let mut topics = existing_topics;
        topics.extend(newly_extracted);

        Ok(SummaryResult {
            brief_summary,
            meeting_notes,
            topics,
        })
    }
}
