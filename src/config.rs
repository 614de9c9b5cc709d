//! Engine settings recognized by the core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Log severity used for analyzer results and the failure-log threshold.
///
/// `None` sorts lowest and means "disabled" wherever a level is used as a
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    None,
    Debug,
    Information,
    Warning,
    #[default]
    Error,
}

impl LogLevel {
    /// Map a `tracing` level onto the engine's scale. `TRACE` folds into
    /// `Debug`.
    pub fn from_tracing(level: &tracing::Level) -> LogLevel {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Information,
            _ => LogLevel::Debug,
        }
    }

    pub fn as_tracing(self) -> Option<tracing::Level> {
        match self {
            LogLevel::None => None,
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Information => Some(tracing::Level::INFO),
            LogLevel::Warning => Some(tracing::Level::WARN),
            LogLevel::Error => Some(tracing::Level::ERROR),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "debug" | "trace" => Ok(LogLevel::Debug),
            "information" | "info" => Ok(LogLevel::Information),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unrecognized log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::None => "none",
            LogLevel::Debug => "debug",
            LogLevel::Information => "information",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// What the engine deletes from the output directory before each
/// execution (and on disposal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanMode {
    /// Leave the output directory untouched.
    None,
    /// Delete the files this engine wrote during its previous execution.
    #[default]
    #[serde(rename = "self")]
    SelfClean,
    /// Wipe the entire output directory.
    Full,
}

impl FromStr for CleanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CleanMode::None),
            "self" => Ok(CleanMode::SelfClean),
            "full" => Ok(CleanMode::Full),
            other => Err(format!("unrecognized clean mode '{other}'")),
        }
    }
}

/// Settings the core reads. Everything else a bootstrapper passes through
/// a configuration file is its own concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Minimum log level that, when emitted during execution, turns the
    /// execution into a failure after completion. `None` disables.
    pub failure_log_level: LogLevel,
    /// Output-directory cleaning policy. The first execution always wipes
    /// the whole directory; the temp directory is wiped on every run.
    pub clean_mode: CleanMode,
    /// Analyzer activations as `"name=level"` entries. `All` addresses
    /// every registered analyzer; an omitted value or `"true"` keeps the
    /// analyzer's default level.
    pub analyzers: Vec<String>,
    /// Back string content with temp files instead of memory.
    pub use_string_content_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            failure_log_level: LogLevel::Error,
            clean_mode: CleanMode::default(),
            analyzers: Vec::new(),
            use_string_content_files: false,
        }
    }
}

impl Settings {
    pub fn with_failure_log_level(mut self, level: LogLevel) -> Self {
        self.failure_log_level = level;
        self
    }

    pub fn with_clean_mode(mut self, mode: CleanMode) -> Self {
        self.clean_mode = mode;
        self
    }

    pub fn with_analyzer(mut self, entry: impl Into<String>) -> Self {
        self.analyzers.push(entry.into());
        self
    }

    pub fn with_string_content_files(mut self, enabled: bool) -> Self {
        self.use_string_content_files = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_order_by_severity() {
        assert!(LogLevel::None < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Information);
        assert!(LogLevel::Information < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn log_level_parses_aliases() {
        assert_eq!("Info".parse::<LogLevel>().unwrap(), LogLevel::Information);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("none".parse::<LogLevel>().unwrap(), LogLevel::None);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn clean_mode_round_trips_through_serde() {
        let json = serde_json::to_string(&CleanMode::SelfClean).unwrap();
        assert_eq!(json, "\"self\"");
        let parsed: CleanMode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CleanMode::SelfClean);
    }

    #[test]
    fn settings_defaults_match_the_documented_ones() {
        let settings = Settings::default();
        assert_eq!(settings.failure_log_level, LogLevel::Error);
        assert_eq!(settings.clean_mode, CleanMode::SelfClean);
        assert!(settings.analyzers.is_empty());
        assert!(!settings.use_string_content_files);
    }

    #[test]
    fn settings_deserialize_with_partial_keys() {
        let settings: Settings =
            serde_json::from_str(r#"{"failure_log_level":"warning","clean_mode":"full"}"#).unwrap();
        assert_eq!(settings.failure_log_level, LogLevel::Warning);
        assert_eq!(settings.clean_mode, CleanMode::Full);
        assert!(!settings.use_string_content_files);
    }
}
