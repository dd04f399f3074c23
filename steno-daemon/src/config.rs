//! Daemon configuration: socket/PID-file paths plus the Summary
//! Coordinator's tunables.
//!
//! Grounded on the teacher's `dictum-app/src/settings.rs` (`AppSettings`):
//! a `Default` impl with documented fields, a `normalize()`-style pass
//! (here, parsing environment overrides) applied once at startup, mirroring
//! `apply_engine_profile`/`apply_runtime_env_from_settings` in the teacher's
//! `main.rs`.

use std::path::PathBuf;
use std::time::Duration;

use steno_core::CoordinatorConfig;

/// Default socket/PID-file location relative to the directory returned by
/// [`DaemonConfig::runtime_dir`] (`spec.md` §6 "Socket path").
const SOCKET_FILE_NAME: &str = "steno.sock";
const PID_FILE_NAME: &str = "steno.pid";
const DB_FILE_NAME: &str = "steno.db";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub db_path: PathBuf,
    pub coordinator: CoordinatorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let dir = Self::runtime_dir();
        Self {
            socket_path: dir.join(SOCKET_FILE_NAME),
            pid_path: dir.join(PID_FILE_NAME),
            db_path: dir.join(DB_FILE_NAME),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// `<user app-support>/steno/` — falls back to `/tmp/steno` if no home
    /// directory is known (e.g. a stripped-down container environment).
    fn runtime_dir() -> PathBuf {
        std::env::var_os("STENOD_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".steno")))
            .unwrap_or_else(|| PathBuf::from("/tmp/steno"))
    }

    /// Applies process environment overrides on top of the defaults,
    /// mirroring the teacher's pattern of reading a handful of
    /// well-known environment variables at startup rather than a full
    /// config file parser (out of scope per `spec.md`'s CLI/installation
    /// exclusions).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = std::env::var_os("STENOD_SOCKET") {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(path) = std::env::var_os("STENOD_PID_FILE") {
            config.pid_path = PathBuf::from(path);
        }
        if let Some(path) = std::env::var_os("STENOD_DB") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(count) = env_u64("STENOD_TRIGGER_COUNT") {
            config.coordinator.trigger_count = count;
        }
        if let Some(secs) = env_u64("STENOD_TIME_THRESHOLD_SECS") {
            config.coordinator.time_threshold = Duration::from_secs(secs);
        }
        if let Some(count) = env_u64("STENOD_MIN_SEGMENTS_FOR_TIME_TRIGGER") {
            config.coordinator.min_segments_for_time_trigger = count;
        }
        if let Some(secs) = env_u64("STENOD_LLM_TIMEOUT_SECS") {
            config.coordinator.llm_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
