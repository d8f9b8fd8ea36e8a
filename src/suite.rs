//! Declarative test suites and the one-shot `run_test` entry point.
//!
//! A suite is a JSON file:
//!
//! ```json
//! {
//!   "prompts": ["tell me a joke", ["be brief", "tell me a joke about {subject}"]],
//!   "cases": [{"subject": "cats"}, {"subject": "dogs"}],
//!   "models": ["gpt-3.5-turbo", {"name": "gpt-4", "params": {"temperature": 0}}],
//!   "runs": 5
//! }
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use crate::generate::{CompletionClient, GenerateOptions, generate};
use crate::matrix::{RunCount, TestMatrix};
use crate::model::ModelRef;
use crate::prompt::{Case, PromptInput, case_from_values};
use crate::store::Store;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One prompt or a list of prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuitePrompts {
    One(String),
    Many(Vec<PromptInput>),
}

impl SuitePrompts {
    pub fn into_inputs(self) -> Vec<PromptInput> {
        match self {
            Self::One(template) => vec![PromptInput::Single(template)],
            Self::Many(prompts) => prompts,
        }
    }
}

impl Default for SuitePrompts {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// Everything needed to set up a test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSuite {
    pub prompts: SuitePrompts,
    #[serde(deserialize_with = "deserialize_cases")]
    pub cases: Vec<Case>,
    pub models: Vec<ModelRef>,
    /// Coerced like [`TestMatrix::add_runs`]: `3`, `3.0` and `"3"` all work.
    pub runs: Option<Value>,
    /// Resume this test instead of starting a new one.
    #[serde(alias = "testId")]
    pub test_id: Option<String>,
}

fn deserialize_cases<'de, D>(deserializer: D) -> std::result::Result<Vec<Case>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<BTreeMap<String, Value>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(case_from_values).collect())
}

impl TestSuite {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Open or create the suite's matrix in `store` and add everything to it.
    ///
    /// Models default to the configured models. The run target is raised to
    /// the suite's `runs` (or the configured default), never lowered, so
    /// preparing the same suite twice leaves the target unchanged.
    pub fn prepare(&self, store: &Store, config: &Config) -> Result<TestMatrix> {
        let mut matrix = match &self.test_id {
            Some(test_id) => TestMatrix::open_or_create(store, test_id)?,
            None => TestMatrix::create(store),
        };

        matrix.add_prompts(self.prompts.clone().into_inputs())?;
        matrix.add_cases(self.cases.iter().cloned())?;
        if self.models.is_empty() {
            matrix.add_models(config.default_models());
        } else {
            matrix.add_models(self.models.iter().cloned());
        }

        let target = match &self.runs {
            Some(runs) => RunCount::try_from(runs)?.get(),
            None => config.default_runs(),
        };
        if target == 0 {
            return Err(Error::invalid_runs("runs must be at least 1"));
        }
        if matrix.runs() < target {
            matrix.add_runs(target - matrix.runs())?;
        }

        tracing::info!(
            test_id = %matrix.test_id(),
            prompts = matrix.prompts().len(),
            cases = matrix.cases().len(),
            models = matrix.models().len(),
            runs = matrix.runs(),
            outstanding = matrix.outstanding_runs(),
            "Prepared test"
        );
        matrix.try_save()?;
        Ok(matrix)
    }
}

/// Set up the suite's matrix in the configured cache and generate every outstanding run.
pub async fn run_test(
    suite: &TestSuite,
    client: &dyn CompletionClient,
    config: &Config,
) -> Result<TestMatrix> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    run_test_in(&config.store(&cwd), suite, client, config).await
}

/// [`run_test`] against an explicit store.
pub async fn run_test_in(
    store: &Store,
    suite: &TestSuite,
    client: &dyn CompletionClient,
    config: &Config,
) -> Result<TestMatrix> {
    let mut matrix = suite.prepare(store, config)?;
    let report = generate(&mut matrix, client, &GenerateOptions::from_config(config)).await?;
    tracing::info!(
        test_id = %matrix.test_id(),
        succeeded = report.succeeded,
        failed = report.failed,
        "Test run finished"
    );
    Ok(matrix)
}
