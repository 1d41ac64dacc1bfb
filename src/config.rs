//! Run configuration for `record`, `serve` and `analyze`.
//!
//! Every field has a serde default so a partial JSON file is valid; the
//! command line overrides whatever the file sets.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::aspects::AspectEngine;
use crate::capture::queue::DEFAULT_QUEUE_SIZE;
use crate::capture::SamplerConfig;
use crate::db::{ClientNamespaceMatcher, ADMIN_COMMAND_NS};
use crate::report::{Filter, FilterErrorPolicy, Report};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("aspect definition `{0}` is not of the form name=expression")]
    AspectSyntax(String),
}

// ─── Capture ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecordConfig {
    /// Connection string or bare host[:port].
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// How long `record` runs, in seconds.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default)]
    pub max_samples: Option<u64>,

    /// Namespaces the profiler's own `currentOp` shows up under.
    #[serde(default = "default_own_namespaces")]
    pub own_namespaces: Vec<String>,
}

fn default_target() -> String {
    "localhost:27017".into()
}
fn default_interval_ms() -> u64 {
    100
}
fn default_duration_secs() -> u64 {
    3
}
fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}
fn default_own_namespaces() -> Vec<String> {
    vec![ADMIN_COMMAND_NS.to_string()]
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            interval_ms: default_interval_ms(),
            duration_secs: default_duration_secs(),
            queue_size: default_queue_size(),
            max_samples: None,
            own_namespaces: default_own_namespaces(),
        }
    }
}

impl RecordConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("interval_ms", self.interval_ms, 1, 60_000)?;
        check_range("duration_secs", self.duration_secs, 1, 86_400)?;
        check_range("queue_size", self.queue_size as u64, 1, 100_000)?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: self.interval(),
            max_samples: self.max_samples,
            own_ops: Arc::new(ClientNamespaceMatcher::new(self.own_namespaces.clone())),
        }
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

// ─── Analysis ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AnalyzeConfig {
    #[serde(default)]
    pub focus: Option<String>,

    /// Values shown per aspect; 0 shows all.
    #[serde(default)]
    pub limit: Option<usize>,

    /// Expression-defined aspects, name → expression.
    #[serde(default)]
    pub aspects: BTreeMap<String, String>,

    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default)]
    pub skip_filter_errors: bool,
}

impl AnalyzeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Adds a `name=expression` definition, replacing one of the same name.
    pub fn add_aspect_arg(&mut self, arg: &str) -> Result<(), ConfigError> {
        let (name, expr) = arg
            .split_once('=')
            .map(|(n, e)| (n.trim(), e.trim()))
            .filter(|(n, e)| !n.is_empty() && !e.is_empty())
            .ok_or_else(|| ConfigError::AspectSyntax(arg.to_string()))?;
        self.aspects.insert(name.to_string(), expr.to_string());
        Ok(())
    }

    pub fn filter_policy(&self) -> FilterErrorPolicy {
        if self.skip_filter_errors {
            FilterErrorPolicy::SkipOp
        } else {
            FilterErrorPolicy::Abort
        }
    }

    /// Compiles the expressions and builds an empty report.
    pub fn build_report(&self) -> anyhow::Result<Report> {
        let mut engine = AspectEngine::new();
        for (name, expr) in &self.aspects {
            engine
                .add_expression(name, expr)
                .map_err(|e| anyhow::anyhow!("aspect `{name}`: {e}"))?;
        }
        let filter = self
            .filter
            .as_deref()
            .map(Filter::parse)
            .transpose()
            .map_err(|e| anyhow::anyhow!("filter: {e}"))?;
        Ok(Report::new(engine, filter).with_filter_policy(self.filter_policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults() {
        let cfg: RecordConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RecordConfig::default());
        assert_eq!(cfg.interval(), Duration::from_millis(100));
        assert_eq!(cfg.queue_size, 100);
        assert_eq!(cfg.own_namespaces, ["admin.$cmd"]);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_record_ranges() {
        let cfg = RecordConfig {
            interval_ms: 0,
            ..RecordConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { field: "interval_ms", .. })
        ));

        let cfg = RecordConfig {
            queue_size: 100_001,
            ..RecordConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_analyze_partial_file() {
        let cfg: AnalyzeConfig = serde_json::from_str(
            r#"{ "limit": 5, "aspects": { "secs": "doc.secs_running" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.limit, Some(5));
        assert_eq!(cfg.focus, None);
        assert_eq!(cfg.filter_policy(), FilterErrorPolicy::Abort);
        assert!(cfg.build_report().is_ok());
    }

    #[test]
    fn test_aspect_args() {
        let mut cfg = AnalyzeConfig::default();
        cfg.add_aspect_arg("slow = doc.secs_running > 1").unwrap();
        assert_eq!(cfg.aspects["slow"], "doc.secs_running > 1");
        assert!(cfg.add_aspect_arg("nothing").is_err());
        assert!(cfg.add_aspect_arg("=1").is_err());
    }

    #[test]
    fn test_bad_expressions_fail_to_build() {
        let cfg = AnalyzeConfig {
            filter: Some("db ==".into()),
            ..AnalyzeConfig::default()
        };
        assert!(cfg.build_report().is_err());

        let mut cfg = AnalyzeConfig::default();
        cfg.add_aspect_arg("ns=1").unwrap();
        assert!(cfg.build_report().is_err());
    }
}
