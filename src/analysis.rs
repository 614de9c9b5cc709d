//! Analyzers: optional per-phase diagnostics.
//!
//! Analyzers registered with the engine run after a phase's module chain,
//! on the phase's outputs (or its inputs when the chain failed), and their
//! results are collected even when the phase throws. Activation entries in
//! [`crate::config::Settings::analyzers`] adjust or disable levels per
//! analyzer.

use async_trait::async_trait;

use crate::config::LogLevel;
use crate::documents::Batch;
use crate::errors::ExecuteError;
use crate::graph::PhaseKind;

/// What an analyzer sees: the phase it is keyed to and the documents that
/// flowed through it.
pub struct AnalyzerContext<'a> {
    pub pipeline: &'a str,
    pub phase: PhaseKind,
    pub documents: &'a Batch,
}

/// A registered diagnostic pass.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Registration name; matched case-insensitively by activation
    /// entries.
    fn name(&self) -> &str;

    /// Phase kinds this analyzer inspects. Empty means every phase.
    fn phases(&self) -> Vec<PhaseKind> {
        Vec::new()
    }

    /// Level its findings are reported at unless overridden.
    fn default_level(&self) -> LogLevel {
        LogLevel::Warning
    }

    /// Produce diagnostic messages for one phase.
    async fn analyze(&self, ctx: AnalyzerContext<'_>) -> anyhow::Result<Vec<String>>;
}

/// One diagnostic record, keyed to the phase that produced it.
#[derive(Debug, Clone)]
pub struct AnalyzerResult {
    pub analyzer: String,
    pub level: LogLevel,
    pub pipeline: String,
    pub phase: PhaseKind,
    pub message: String,
}

/// A parsed `"name=level"` activation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnalyzerSpec {
    pub name: String,
    /// `None` keeps the analyzer's default level.
    pub level: Option<LogLevel>,
}

pub(crate) fn parse_analyzer_specs(entries: &[String]) -> Result<Vec<AnalyzerSpec>, ExecuteError> {
    entries
        .iter()
        .map(|entry| {
            let (name, value) = match entry.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (entry.trim(), None),
            };
            if name.is_empty() {
                return Err(ExecuteError::InvalidAnalyzerSpec {
                    entry: entry.clone(),
                    reason: "missing analyzer name".into(),
                });
            }
            let level = match value {
                None | Some("") => None,
                Some(v) if v.eq_ignore_ascii_case("true") => None,
                Some(v) => Some(v.parse::<LogLevel>().map_err(|reason| {
                    ExecuteError::InvalidAnalyzerSpec { entry: entry.clone(), reason }
                })?),
            };
            Ok(AnalyzerSpec { name: name.to_string(), level })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_without_value_keeps_the_default() {
        let specs = parse_analyzer_specs(&["LinkChecker".into()]).unwrap();
        assert_eq!(specs[0].name, "LinkChecker");
        assert_eq!(specs[0].level, None);
    }

    #[test]
    fn true_value_keeps_the_default() {
        let specs = parse_analyzer_specs(&["LinkChecker=true".into()]).unwrap();
        assert_eq!(specs[0].level, None);
    }

    #[test]
    fn explicit_level_overrides() {
        let specs = parse_analyzer_specs(&["All=error".into(), "Html=none".into()]).unwrap();
        assert_eq!(specs[0].level, Some(LogLevel::Error));
        assert_eq!(specs[1].level, Some(LogLevel::None));
    }

    #[test]
    fn bad_level_is_rejected() {
        let err = parse_analyzer_specs(&["Html=shouty".into()]).unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidAnalyzerSpec { .. }));
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = parse_analyzer_specs(&["=warning".into()]).unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidAnalyzerSpec { .. }));
    }
}
