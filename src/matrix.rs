//! The test matrix: prompts x cases x models x runs.
//!
//! The matrix owns every prompt, case, model, and recorded result for one
//! test. It knows which combinations still need runs, accepts new results,
//! and checkpoints itself to the [`Store`] after each batch of work.
//!
//! In memory, results live in a flat map keyed by [`ComboKey`]. The nested
//! `prompt -> case -> model -> run` shape only exists in the persisted
//! [`MatrixDocument`].

use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::hash::{case_id, generate_run_id, generate_test_id};
use crate::model::ModelRef;
use crate::prompt::{BASE_CASE_ID, Case, Message, Prompt};
use crate::store::{MatrixDocument, NestedData, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Keys and results
// ============================================================================

/// One (prompt, case, model) combination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComboKey {
    pub prompt_id: String,
    pub case_id: String,
    pub model_id: String,
}

impl ComboKey {
    pub fn new(
        prompt_id: impl Into<String>,
        case_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            case_id: case_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl std::fmt::Display for ComboKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.prompt_id, self.case_id, self.model_id)
    }
}

/// Outcome of one model invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunResult {
    pub content: String,
    pub tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    /// Seconds.
    pub latency: f64,
    pub feedback: Option<Feedback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Set when `content` holds a captured client error.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl RunResult {
    /// Result for a failed invocation: the error text with zeroed metrics.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            error: true,
            ..Self::default()
        }
    }
}

/// A result together with its run id.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub run_id: String,
    pub result: RunResult,
}

// ============================================================================
// Run count
// ============================================================================

/// A positive number of runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunCount(u32);

impl RunCount {
    pub fn new(runs: u64) -> Result<Self> {
        if runs == 0 {
            return Err(Error::invalid_runs("runs must be a positive integer, got 0"));
        }
        u32::try_from(runs)
            .map(Self)
            .map_err(|_| Error::invalid_runs(format!("runs out of range: {runs}")))
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Coerce a float that holds a whole positive number.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(runs: f64) -> Result<Self> {
        if runs.is_finite() && runs.fract() == 0.0 && runs >= 1.0 && runs <= f64::from(u32::MAX) {
            return Self::new(runs as u64);
        }
        Err(Error::invalid_runs(format!(
            "runs must be a positive integer, got {runs}"
        )))
    }

    /// Coerce a numeric-looking string such as `"3"` or `"3.0"`.
    pub fn parse(runs: &str) -> Result<Self> {
        let trimmed = runs.trim();
        if let Ok(value) = trimmed.parse::<u64>() {
            return Self::new(value);
        }
        trimmed.parse::<f64>().map_or_else(
            |_| {
                Err(Error::invalid_runs(format!(
                    "runs must be a positive integer, got {runs:?}"
                )))
            },
            Self::from_f64,
        )
    }
}

macro_rules! run_count_from_int {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<$ty> for RunCount {
                type Error = Error;

                fn try_from(runs: $ty) -> Result<Self> {
                    let runs = u64::try_from(runs).map_err(|_| {
                        Error::invalid_runs(format!("runs must be a positive integer, got {runs}"))
                    })?;
                    Self::new(runs)
                }
            }
        )*
    };
}

run_count_from_int!(i32, i64, u32, u64, usize);

impl TryFrom<f64> for RunCount {
    type Error = Error;

    fn try_from(runs: f64) -> Result<Self> {
        Self::from_f64(runs)
    }
}

impl TryFrom<&str> for RunCount {
    type Error = Error;

    fn try_from(runs: &str) -> Result<Self> {
        Self::parse(runs)
    }
}

impl TryFrom<&Value> for RunCount {
    type Error = Error;

    fn try_from(runs: &Value) -> Result<Self> {
        match runs {
            Value::Number(n) => n.as_u64().map_or_else(
                || n.as_f64().map_or_else(|| Self::from_f64(f64::NAN), Self::from_f64),
                Self::new,
            ),
            Value::String(s) => Self::parse(s),
            other => Err(Error::invalid_runs(format!(
                "runs must be a positive integer, got {other}"
            ))),
        }
    }
}

// ============================================================================
// Outstanding work
// ============================================================================

/// A combination that still needs runs, with everything needed to call a model.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub key: ComboKey,
    pub prompt: Prompt,
    /// `None` for the base case.
    pub case: Option<Case>,
    pub model: ModelRef,
    pub runs_needed: u32,
}

impl WorkUnit {
    pub fn messages(&self) -> Vec<Message> {
        self.prompt.format(self.case.as_ref())
    }
}

// ============================================================================
// Test Matrix
// ============================================================================

/// All state for one prompt test.
#[derive(Debug, Clone)]
pub struct TestMatrix {
    test_id: String,
    prompts: BTreeMap<String, Prompt>,
    /// Real cases only; the base case is implied while this is empty.
    cases: BTreeMap<String, Case>,
    models: Vec<ModelRef>,
    runs: u32,
    data: BTreeMap<ComboKey, Vec<RunEntry>>,
    /// Checkpoint target. `None` keeps the matrix in memory only.
    path: Option<PathBuf>,
}

impl Default for TestMatrix {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TestMatrix {
    /// A matrix that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_id(generate_test_id())
    }

    fn with_id(test_id: String) -> Self {
        Self {
            test_id,
            prompts: BTreeMap::new(),
            cases: BTreeMap::new(),
            models: Vec::new(),
            runs: 0,
            data: BTreeMap::new(),
            path: None,
        }
    }

    /// A fresh matrix checkpointed into `store`.
    pub fn create(store: &Store) -> Self {
        let mut matrix = Self::in_memory();
        matrix.path = Some(store.document_path(&matrix.test_id));
        matrix
    }

    /// A fresh matrix with a caller-chosen id, checkpointed into `store`.
    pub fn create_with_id(store: &Store, test_id: impl Into<String>) -> Self {
        let mut matrix = Self::with_id(test_id.into());
        matrix.path = Some(store.document_path(&matrix.test_id));
        matrix
    }

    /// Load a previously saved matrix by test id or file path.
    ///
    /// JSON snapshots keep checkpointing to the file they came from; CSV
    /// exports checkpoint to the JSON document for their test id.
    pub fn load(store: &Store, identifier: &str) -> Result<Self> {
        let snapshot = store.read(identifier)?;
        let mut matrix = Self::from_document(snapshot.test_id, snapshot.document);
        matrix.path = Some(
            snapshot
                .json_path
                .unwrap_or_else(|| store.document_path(&matrix.test_id)),
        );
        tracing::info!(
            test_id = %matrix.test_id,
            prompts = matrix.prompts.len(),
            cases = matrix.cases.len(),
            models = matrix.models.len(),
            runs = matrix.runs,
            results = matrix.total_results(),
            "Loaded test matrix"
        );
        Ok(matrix)
    }

    /// Load `identifier` if it exists, otherwise start a new matrix under that id.
    pub fn open_or_create(store: &Store, test_id: &str) -> Result<Self> {
        match Self::load(store, test_id) {
            Ok(matrix) => Ok(matrix),
            Err(Error::FileNotFound { .. }) => Ok(Self::create_with_id(store, test_id)),
            Err(err) => Err(err),
        }
    }

    // === Accessors ===

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub const fn prompts(&self) -> &BTreeMap<String, Prompt> {
        &self.prompts
    }

    pub fn prompt(&self, prompt_id: &str) -> Option<&Prompt> {
        self.prompts.get(prompt_id)
    }

    pub const fn cases(&self) -> &BTreeMap<String, Case> {
        &self.cases
    }

    /// Resolved case for `case_id`; `Some(None)` for the base case.
    pub fn case(&self, case_id: &str) -> Option<Option<&Case>> {
        if case_id == BASE_CASE_ID {
            return Some(None);
        }
        self.cases.get(case_id).map(Some)
    }

    /// Case ids in the current combination space.
    pub fn case_ids(&self) -> Vec<String> {
        if self.cases.is_empty() {
            vec![BASE_CASE_ID.to_string()]
        } else {
            self.cases.keys().cloned().collect()
        }
    }

    pub fn models(&self) -> &[ModelRef] {
        &self.models
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelRef> {
        self.models.iter().find(|m| m.id() == model_id)
    }

    pub const fn runs(&self) -> u32 {
        self.runs
    }

    pub fn bucket(&self, key: &ComboKey) -> &[RunEntry] {
        self.data.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn bucket_mut(&mut self, key: &ComboKey) -> Option<&mut Vec<RunEntry>> {
        self.data.get_mut(key)
    }

    pub fn completed_runs(&self, key: &ComboKey) -> usize {
        self.bucket(key).len()
    }

    /// Every recorded result with its combination.
    pub fn results(&self) -> impl Iterator<Item = (&ComboKey, &RunEntry)> {
        self.data
            .iter()
            .flat_map(|(key, entries)| entries.iter().map(move |entry| (key, entry)))
    }

    pub fn total_results(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    // === Building the matrix ===

    /// Add prompt templates, skipping ones already present.
    ///
    /// Identity is the newline-joined template text, so a prompt whose joined
    /// text matches an existing one is skipped even if it splits into
    /// different messages: `["a", "b"]` and `["a\nb"]` share an id and only
    /// the first one added is kept.
    ///
    /// Returns the ids of all supplied prompts, new or not.
    pub fn add_prompts<I, P>(&mut self, prompts: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = P>,
        P: Into<Prompt>,
    {
        let prompts: Vec<Prompt> = prompts
            .into_iter()
            .map(Into::into)
            .filter(|p: &Prompt| !p.is_empty())
            .collect();
        if prompts.is_empty() {
            if self.prompts.is_empty() {
                return Err(Error::MissingPrompt);
            }
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let id = prompt.id();
            if !self.prompts.contains_key(&id) {
                tracing::debug!(prompt_id = %id, "Adding prompt");
                self.prompts.insert(id.clone(), prompt);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Add test cases. All cases in a matrix must have the same number of variables.
    ///
    /// On an arity mismatch nothing is added.
    pub fn add_cases<I>(&mut self, cases: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Case>,
    {
        let cases: Vec<Case> = cases.into_iter().collect();
        if cases.is_empty() {
            return Ok(Vec::new());
        }

        let expected = self
            .cases
            .values()
            .next()
            .map_or_else(|| cases[0].len(), BTreeMap::len);
        if let Some(bad) = cases.iter().find(|c| c.len() != expected) {
            return Err(Error::InconsistentCases {
                expected,
                found: bad.len(),
            });
        }

        let mut ids = Vec::with_capacity(cases.len());
        for case in cases {
            let id = case_id(&case);
            if !self.cases.contains_key(&id) {
                tracing::debug!(case_id = %id, "Adding case");
                self.cases.insert(id.clone(), case);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Append models not already in the list, keeping order.
    pub fn add_models<I, M>(&mut self, models: I)
    where
        I: IntoIterator<Item = M>,
        M: Into<ModelRef>,
    {
        for model in models {
            let model = model.into();
            let id = model.id();
            if !self.models.iter().any(|m| m.id() == id) {
                self.models.push(model);
            }
        }
    }

    /// Raise the run target by `runs`. Returns the new target.
    pub fn add_runs<R>(&mut self, runs: R) -> Result<u32>
    where
        R: TryInto<RunCount, Error = Error>,
    {
        let runs = runs.try_into()?;
        self.runs = self
            .runs
            .checked_add(runs.get())
            .ok_or_else(|| Error::invalid_runs("run target overflow"))?;
        Ok(self.runs)
    }

    // === Work tracking ===

    /// Combinations below the run target, recomputed from current state.
    ///
    /// Prompts and cases come in id order, models in insertion order.
    pub fn outstanding_work(&self) -> Vec<WorkUnit> {
        let case_ids = self.case_ids();
        let mut work = Vec::new();
        for (prompt_id, prompt) in &self.prompts {
            for case_id in &case_ids {
                let case = self.cases.get(case_id);
                for model in &self.models {
                    let key = ComboKey::new(prompt_id.clone(), case_id.clone(), model.id());
                    let done = self.completed_runs(&key);
                    let done = u32::try_from(done).unwrap_or(u32::MAX);
                    if done < self.runs {
                        work.push(WorkUnit {
                            key,
                            prompt: prompt.clone(),
                            case: case.cloned(),
                            model: model.clone(),
                            runs_needed: self.runs - done,
                        });
                    }
                }
            }
        }
        work
    }

    /// Total runs still needed across all combinations.
    pub fn outstanding_runs(&self) -> u64 {
        self.outstanding_work()
            .iter()
            .map(|unit| u64::from(unit.runs_needed))
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding_work().is_empty()
    }

    /// Record a result and checkpoint. Returns the new run id.
    pub fn record_result(
        &mut self,
        prompt_id: &str,
        case_id: &str,
        model_id: &str,
        result: RunResult,
    ) -> Result<String> {
        let key = ComboKey::new(prompt_id, case_id, model_id);
        let run_id = self.insert_result(&key, result)?;
        self.save();
        Ok(run_id)
    }

    /// Append a result without checkpointing.
    pub(crate) fn insert_result(&mut self, key: &ComboKey, mut result: RunResult) -> Result<String> {
        if !self.prompts.contains_key(&key.prompt_id) {
            return Err(Error::validation(format!("unknown prompt id: {}", key.prompt_id)));
        }
        if self.case(&key.case_id).is_none() {
            return Err(Error::validation(format!("unknown case id: {}", key.case_id)));
        }
        if self.model(&key.model_id).is_none() {
            return Err(Error::validation(format!("unknown model id: {}", key.model_id)));
        }

        result.feedback = None;
        if result.created_at.is_none() {
            result.created_at = Some(now_timestamp());
        }

        let entries = self.data.entry(key.clone()).or_default();
        let run_id = generate_run_id(entries.iter().map(|e| e.run_id.as_str()));
        entries.push(RunEntry {
            run_id: run_id.clone(),
            result,
        });
        Ok(run_id)
    }

    // === Persistence ===

    /// Checkpoint to disk. Failures are logged, never returned.
    pub fn save(&self) {
        if let Err(err) = self.try_save() {
            tracing::warn!(test_id = %self.test_id, error = %err, "Checkpoint failed");
        }
    }

    /// Checkpoint to disk, reporting failures. Returns the path written, if any.
    pub fn try_save(&self) -> Result<Option<PathBuf>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        Store::write_document(path, &self.to_document())?;
        tracing::debug!(
            test_id = %self.test_id,
            path = %path.display(),
            results = self.total_results(),
            "Checkpoint written"
        );
        Ok(Some(path.clone()))
    }

    /// Snapshot in the persisted nested shape.
    pub fn to_document(&self) -> MatrixDocument {
        let mut data = NestedData::new();
        for (key, entries) in &self.data {
            let runs = data
                .entry(key.prompt_id.clone())
                .or_default()
                .entry(key.case_id.clone())
                .or_default()
                .entry(key.model_id.clone())
                .or_default();
            for entry in entries {
                runs.insert(entry.run_id.clone(), entry.result.clone());
            }
        }

        let mut cases: BTreeMap<String, Option<Case>> = self
            .cases
            .iter()
            .map(|(id, case)| (id.clone(), Some(case.clone())))
            .collect();
        if cases.is_empty() {
            cases.insert(BASE_CASE_ID.to_string(), None);
        }

        MatrixDocument {
            data,
            prompts: self.prompts.clone(),
            cases,
            models: self.models.clone(),
            runs: self.runs,
        }
    }

    /// Rebuild a matrix from its persisted shape. Buckets are ordered by `created_at`.
    pub fn from_document(test_id: String, document: MatrixDocument) -> Self {
        let mut matrix = Self::with_id(test_id);
        matrix.prompts = document.prompts;
        matrix.cases = document
            .cases
            .into_iter()
            .filter(|(id, _)| id != BASE_CASE_ID)
            .filter_map(|(id, case)| case.map(|c| (id, c)))
            .collect();
        matrix.add_models(document.models);
        matrix.runs = document.runs;

        for (prompt_id, by_case) in document.data {
            for (case_id, by_model) in by_case {
                for (model_id, runs) in by_model {
                    let mut entries: Vec<RunEntry> = runs
                        .into_iter()
                        .map(|(run_id, result)| RunEntry { run_id, result })
                        .collect();
                    entries.sort_by(|a, b| a.result.created_at.cmp(&b.result.created_at));
                    if entries.is_empty() {
                        continue;
                    }
                    let key = ComboKey::new(prompt_id.clone(), case_id.clone(), model_id);
                    matrix.data.insert(key, entries);
                }
            }
        }
        matrix
    }
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
