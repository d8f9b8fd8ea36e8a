//! Configuration loading and management.

use crate::error::{Error, Result};
use crate::feedback::FeedbackLabels;
use crate::generate::DEFAULT_BATCH_SIZE;
use crate::model::{ModelRef, Pricing};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runs per combination when neither the caller nor settings say otherwise.
pub const DEFAULT_RUNS: u32 = 10;

/// Model used when neither the caller nor settings name one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for matrix snapshots.
    #[serde(alias = "cacheDir")]
    pub cache_dir: Option<String>,

    // Generation
    #[serde(alias = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(alias = "asyncGenerate")]
    pub async_generate: Option<bool>,
    #[serde(alias = "defaultModels")]
    pub default_models: Option<Vec<ModelRef>>,
    #[serde(alias = "defaultRuns")]
    pub default_runs: Option<u32>,
    /// Project name forwarded to clients for provider-side tracing.
    pub project: Option<String>,

    // Feedback
    pub labels: Option<LabelSettings>,

    /// Per-model prices, per million tokens.
    pub pricing: Option<Pricing>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    pub negative: Option<String>,
    pub positive: Option<String>,
}

impl Config {
    /// Load configuration from global and project settings.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let config_path = std::env::var_os("THUMB_CONFIG_PATH").map(PathBuf::from);
        Self::load_with_roots(config_path.as_deref(), &Self::global_dir(), &cwd)
    }

    /// Get the global configuration directory.
    pub fn global_dir() -> PathBuf {
        global_dir_from_env(env_lookup)
    }

    /// Get the project configuration directory.
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".thumb")
    }

    /// Load settings from a specific path.
    fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    pub fn load_with_roots(
        config_path: Option<&Path>,
        global_dir: &Path,
        cwd: &Path,
    ) -> Result<Self> {
        if let Some(path) = config_path {
            let config = Self::load_from_path(path)?;
            config.emit_diagnostics();
            return Ok(config);
        }

        let global = Self::load_from_path(&global_dir.join("settings.json"))?;
        let project = Self::load_from_path(&cwd.join(Self::project_dir()).join("settings.json"))?;
        let merged = Self::merge(global, project);
        merged.emit_diagnostics();
        Ok(merged)
    }

    /// Merge two configurations, with `other` taking precedence.
    pub fn merge(base: Self, other: Self) -> Self {
        Self {
            cache_dir: other.cache_dir.or(base.cache_dir),

            // Generation
            batch_size: other.batch_size.or(base.batch_size),
            async_generate: other.async_generate.or(base.async_generate),
            default_models: other.default_models.or(base.default_models),
            default_runs: other.default_runs.or(base.default_runs),
            project: other.project.or(base.project),

            // Feedback
            labels: merge_labels(base.labels, other.labels),

            pricing: merge_pricing(base.pricing, other.pricing),
        }
    }

    // === Accessor methods with defaults ===

    /// Snapshot directory: `THUMB_CACHE_DIR`, then settings, then `<cwd>/.thumb/cache`.
    pub fn cache_dir(&self, cwd: &Path) -> PathBuf {
        cache_dir_from_env(env_lookup, self.cache_dir.as_deref(), cwd)
    }

    pub fn store(&self, cwd: &Path) -> Store {
        Store::new(self.cache_dir(cwd))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn async_generate(&self) -> bool {
        self.async_generate.unwrap_or(true)
    }

    pub fn default_models(&self) -> Vec<ModelRef> {
        self.default_models
            .clone()
            .filter(|models| !models.is_empty())
            .unwrap_or_else(|| vec![ModelRef::from(DEFAULT_MODEL)])
    }

    pub fn default_runs(&self) -> u32 {
        self.default_runs
            .filter(|&runs| runs > 0)
            .unwrap_or(DEFAULT_RUNS)
    }

    pub fn feedback_labels(&self) -> FeedbackLabels {
        let defaults = FeedbackLabels::default();
        let Some(labels) = &self.labels else {
            return defaults;
        };
        FeedbackLabels {
            negative: labels.negative.clone().unwrap_or(defaults.negative),
            positive: labels.positive.clone().unwrap_or(defaults.positive),
        }
    }

    fn emit_diagnostics(&self) {
        if self.batch_size == Some(0) {
            tracing::warn!(
                setting = "batch_size",
                fallback = DEFAULT_BATCH_SIZE,
                "Batch size must be positive; using default"
            );
        }
        if self.default_runs == Some(0) {
            tracing::warn!(
                setting = "default_runs",
                fallback = DEFAULT_RUNS,
                "Default runs must be positive; using default"
            );
        }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn global_dir_from_env<F>(get_env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    get_env("THUMB_DIR").map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".thumb")
        },
        PathBuf::from,
    )
}

fn cache_dir_from_env<F>(get_env: F, configured: Option<&str>, cwd: &Path) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    get_env("THUMB_CACHE_DIR")
        .or_else(|| configured.map(str::to_string))
        .map_or_else(
            || cwd.join(Config::project_dir()).join("cache"),
            |dir| cwd.join(dir),
        )
}

fn merge_labels(
    base: Option<LabelSettings>,
    other: Option<LabelSettings>,
) -> Option<LabelSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(LabelSettings {
            negative: other.negative.or(base.negative),
            positive: other.positive.or(base.positive),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

fn merge_pricing(base: Option<Pricing>, other: Option<Pricing>) -> Option<Pricing> {
    match (base, other) {
        (Some(mut base), Some(other)) => {
            base.extend(other);
            Some(base)
        }
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DEFAULT_RUNS, cache_dir_from_env, global_dir_from_env};
    use crate::generate::DEFAULT_BATCH_SIZE;
    use crate::model::ModelRef;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_file(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, contents).expect("write file");
    }

    #[test]
    fn load_returns_defaults_when_missing() {
        let temp = TempDir::new().expect("create tempdir");
        let cwd = temp.path().join("cwd");
        let global_dir = temp.path().join("global");

        let config = Config::load_with_roots(None, &global_dir, &cwd).expect("load config");
        assert!(config.cache_dir.is_none());
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(config.default_runs(), DEFAULT_RUNS);
        assert!(config.async_generate());
        assert_eq!(config.default_models(), vec![ModelRef::from("gpt-3.5-turbo")]);
        assert_eq!(config.feedback_labels().positive, "👍");
    }

    #[test]
    fn load_merges_project_over_global() {
        let temp = TempDir::new().expect("create tempdir");
        let cwd = temp.path().join("cwd");
        let global_dir = temp.path().join("global");
        write_file(
            &global_dir.join("settings.json"),
            r#"{ "batchSize": 10, "defaultRuns": 4, "project": "global",
                 "labels": { "negative": "bad", "positive": "good" },
                 "pricing": { "m1": { "input": 1.0, "output": 2.0 } } }"#,
        );
        write_file(
            &cwd.join(".thumb/settings.json"),
            r#"{ "default_runs": 7, "labels": { "positive": "great" },
                 "pricing": { "m2": { "input": 3.0, "output": 4.0 } } }"#,
        );

        let config = Config::load_with_roots(None, &global_dir, &cwd).expect("load config");
        assert_eq!(config.batch_size(), 10);
        assert_eq!(config.default_runs(), 7);
        assert_eq!(config.project.as_deref(), Some("global"));
        let labels = config.feedback_labels();
        assert_eq!(labels.negative, "bad");
        assert_eq!(labels.positive, "great");
        let pricing = config.pricing.expect("pricing");
        assert!(pricing.contains_key("m1") && pricing.contains_key("m2"));
    }

    #[test]
    fn load_respects_config_path_override() {
        let temp = TempDir::new().expect("create tempdir");
        let cwd = temp.path().join("cwd");
        let global_dir = temp.path().join("global");
        write_file(&global_dir.join("settings.json"), r#"{ "batchSize": 10 }"#);
        let override_path = temp.path().join("override.json");
        write_file(
            &override_path,
            r#"{ "asyncGenerate": false, "defaultModels": ["a", {"name": "b", "params": {"temperature": 0}}] }"#,
        );

        let config = Config::load_with_roots(Some(override_path.as_path()), &global_dir, &cwd)
            .expect("load config");
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(!config.async_generate());
        assert_eq!(config.default_models().len(), 2);
    }

    #[test]
    fn invalid_settings_is_a_config_error() {
        let temp = TempDir::new().expect("create tempdir");
        let path = temp.path().join("settings.json");
        write_file(&path, "{ not json");
        let err =
            Config::load_with_roots(Some(path.as_path()), temp.path(), temp.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings file"));
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config = Config {
            batch_size: Some(0),
            default_runs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(config.default_runs(), DEFAULT_RUNS);
    }

    #[test]
    fn global_dir_prefers_env() {
        let env: HashMap<&str, &str> = [("THUMB_DIR", "/tmp/thumb-home")].into_iter().collect();
        let dir = global_dir_from_env(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(dir, PathBuf::from("/tmp/thumb-home"));
    }

    #[test]
    fn cache_dir_precedence() {
        let cwd = Path::new("/work");
        let none = |_: &str| None;
        assert_eq!(
            cache_dir_from_env(none, None, cwd),
            PathBuf::from("/work/.thumb/cache")
        );
        assert_eq!(
            cache_dir_from_env(none, Some("snapshots"), cwd),
            PathBuf::from("/work/snapshots")
        );
        let env = |key: &str| (key == "THUMB_CACHE_DIR").then(|| "/abs/cache".to_string());
        assert_eq!(
            cache_dir_from_env(env, Some("snapshots"), cwd),
            PathBuf::from("/abs/cache")
        );
    }
}
