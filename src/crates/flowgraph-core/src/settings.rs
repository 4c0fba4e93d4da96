//! [`Settings`]: the shape of the engine's run-time configuration.
//! Loading settings from a file or environment is out of scope here — only
//! the struct and its defaults are provided; a caller wires it to whatever
//! config source it uses.

use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Log verbosity, mirroring `tracing`'s level names so `log_level` can be
/// parsed directly into an `EnvFilter` or `LevelFilter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_wait_delay() -> f64 {
    0.1
}

/// Run-time configuration for a top-level `Run`: which executor to use, how
/// many workers it gets, and where its log stream goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Use [`crate::exec::ParallelExecutor`] instead of
    /// [`crate::exec::SequentialExecutor`].
    pub use_parallel: bool,
    /// Worker actor count for the parallel executor.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Seconds the parallel executor's `kill` waits for in-flight jobs to
    /// drain before abandoning their handles.
    #[serde(default = "default_wait_delay")]
    pub wait_delay: f64,
    /// Spin up workers, run once, then tear them down again, rather than
    /// keeping the pool alive across runs.
    pub start_then_kill_workers: bool,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            use_parallel: false,
            worker_count: default_worker_count(),
            wait_delay: default_wait_delay(),
            start_then_kill_workers: false,
            log_level: LogLevel::Info,
            log_file: None,
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_use_sequential_execution() {
        let settings = Settings::default();
        assert!(!settings.use_parallel);
        assert_eq!(settings.worker_count, 4);
    }

    #[test]
    fn round_trips_through_json() {
        let settings = Settings {
            use_parallel: true,
            log_format: LogFormat::Json,
            ..Settings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert!(back.use_parallel);
        assert_eq!(back.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(serde_json::from_str::<LogFormat>("\"xml\"").is_err());
    }
}
