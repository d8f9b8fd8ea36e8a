//! Snapshot persistence for test matrices.
//!
//! A matrix is stored as one JSON document at
//! `<cache-dir>/thumb_test-<test-id>.json`, rewritten whole after every batch
//! of work. Writes go to a temp file in the same directory which is then
//! renamed over the target, so the file on disk is always a complete snapshot.
//!
//! Matrices can also be rebuilt from the flattened CSV export (one row per
//! result).

use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::matrix::{RunResult, TestMatrix};
use crate::model::ModelRef;
use crate::prompt::{BASE_CASE_ID, Case, Prompt, case_from_values};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File name prefix for matrix snapshots.
pub const FILE_PREFIX: &str = "thumb_test-";

/// Results nested as prompt -> case -> model -> run.
pub type NestedData =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, RunResult>>>>;

/// The persisted shape of a test matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixDocument {
    #[serde(default)]
    pub data: NestedData,
    #[serde(default)]
    pub prompts: BTreeMap<String, Prompt>,
    /// `base-case` maps to `null`.
    #[serde(default)]
    pub cases: BTreeMap<String, Option<Case>>,
    #[serde(default)]
    pub models: Vec<ModelRef>,
    #[serde(default)]
    pub runs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Csv,
}

impl SnapshotFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Ok(Self::Json),
            Some("csv") => Ok(Self::Csv),
            _ => Err(Error::bad_file_type(path)),
        }
    }
}

/// A snapshot read back from disk.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub test_id: String,
    pub document: MatrixDocument,
    /// Set when the snapshot came from a JSON document.
    pub json_path: Option<PathBuf>,
}

// ============================================================================
// Store
// ============================================================================

/// The cache directory that holds matrix snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    cache_dir: PathBuf,
}

impl Store {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the JSON document for `test_id` lives.
    pub fn document_path(&self, test_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{FILE_PREFIX}{test_id}.json"))
    }

    /// Turn a test id or a file path into a path.
    ///
    /// Anything with an extension or a path separator is a path; everything
    /// else is a test id in the cache directory.
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        let candidate = Path::new(identifier);
        if candidate.extension().is_some() || identifier.contains(['/', '\\']) {
            candidate.to_path_buf()
        } else {
            self.document_path(identifier)
        }
    }

    /// Read a snapshot by test id or path.
    pub fn read(&self, identifier: &str) -> Result<Snapshot> {
        let path = self.resolve(identifier);
        let format = SnapshotFormat::from_path(&path)?;
        if !path.is_file() {
            return Err(Error::file_not_found(&path));
        }
        let test_id = test_id_from_path(&path);
        tracing::debug!(path = %path.display(), ?format, "Reading snapshot");

        match format {
            SnapshotFormat::Json => {
                let content = std::fs::read_to_string(&path)?;
                let document: MatrixDocument = serde_json::from_str(&content)?;
                Ok(Snapshot {
                    test_id,
                    document,
                    json_path: Some(path),
                })
            }
            SnapshotFormat::Csv => Ok(Snapshot {
                test_id,
                document: read_csv(&path)?,
                json_path: None,
            }),
        }
    }

    /// Ids of every JSON snapshot in the cache directory.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.cache_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&self.cache_dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(FILE_PREFIX))
            })
            .map(|path| test_id_from_path(&path))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Write `document` to `path` atomically, creating parent directories.
    pub fn write_document(path: &Path, document: &MatrixDocument) -> Result<()> {
        let mut contents = serde_json::to_string_pretty(document)?;
        contents.push('\n');
        write_atomic(path, contents.as_bytes())
    }
}

/// Test id encoded in a snapshot file name.
pub fn test_id_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    stem.strip_prefix(FILE_PREFIX)
        .or_else(|| stem.strip_prefix("thumb_test_"))
        .unwrap_or(stem)
        .to_string()
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| Error::Io(Box::new(err.error)))?;
    Ok(())
}

// ============================================================================
// Tabular format
// ============================================================================

/// One row of the flattened export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(rename = "PID")]
    pub pid: String,
    #[serde(rename = "Prompt")]
    pub prompt: String,
    #[serde(rename = "CID")]
    pub cid: String,
    #[serde(rename = "Case")]
    pub case: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "RID")]
    pub rid: String,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "Tokens", default)]
    pub tokens: String,
    #[serde(rename = "Prompt Tokens", default)]
    pub prompt_tokens: String,
    #[serde(rename = "Completion Tokens", default)]
    pub completion_tokens: String,
    #[serde(rename = "Cost", default)]
    pub cost: String,
    #[serde(rename = "Latency", default)]
    pub latency: String,
    #[serde(rename = "Feedback", default)]
    pub feedback: String,
}

impl TestMatrix {
    /// One row per result, in key order.
    pub fn to_rows(&self) -> Vec<TableRow> {
        self.results()
            .map(|(key, entry)| {
                let prompt = self
                    .prompt(&key.prompt_id)
                    .map(Prompt::to_cell)
                    .unwrap_or_default();
                let case = match self.case(&key.case_id) {
                    Some(Some(case)) => serde_json::to_string(case).unwrap_or_default(),
                    _ => "null".to_string(),
                };
                let result = &entry.result;
                TableRow {
                    pid: key.prompt_id.clone(),
                    prompt,
                    cid: key.case_id.clone(),
                    case,
                    model: key.model_id.clone(),
                    rid: entry.run_id.clone(),
                    content: result.content.clone(),
                    tokens: result.tokens.to_string(),
                    prompt_tokens: result.prompt_tokens.to_string(),
                    completion_tokens: result.completion_tokens.to_string(),
                    cost: result.cost.to_string(),
                    latency: result.latency.to_string(),
                    feedback: result
                        .feedback
                        .map(|f| f.value().to_string())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Write the flattened CSV export to `path`.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in self.to_rows() {
            writer.serialize(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| Error::Io(Box::new(err.into_error())))?;
        write_atomic(path, &bytes)?;
        tracing::info!(path = %path.display(), rows = self.total_results(), "Exported CSV");
        Ok(())
    }
}

/// Rebuild a document from a CSV export.
///
/// The run target is the largest number of runs seen for one combination.
/// Rows whose metrics are all zero are read back as failures.
pub fn read_csv(path: &Path) -> Result<MatrixDocument> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<TableRow>() {
        rows.push(row?);
    }
    document_from_rows(rows)
}

pub fn document_from_rows(rows: Vec<TableRow>) -> Result<MatrixDocument> {
    let mut document = MatrixDocument::default();

    for row in rows {
        document
            .prompts
            .entry(row.pid.clone())
            .or_insert_with(|| Prompt::from_cell(&row.prompt));

        if !document.cases.contains_key(&row.cid) {
            let case = parse_case_cell(&row.cid, &row.case)?;
            document.cases.insert(row.cid.clone(), case);
        }

        let model = ModelRef::from_id(&row.model);
        if !document.models.contains(&model) {
            document.models.push(model);
        }

        let mut result = RunResult {
            content: row.content,
            tokens: parse_count(&row.tokens)?,
            prompt_tokens: parse_count(&row.prompt_tokens)?,
            completion_tokens: parse_count(&row.completion_tokens)?,
            cost: parse_amount(&row.cost)?,
            latency: parse_amount(&row.latency)?,
            feedback: Feedback::parse_cell(&row.feedback)?,
            created_at: None,
            error: false,
        };
        // The table has no error column. Failures are written with every
        // metric zeroed, and a real call always takes measurable time.
        result.error = result.tokens == 0 && result.cost <= 0.0 && result.latency <= 0.0;

        document
            .data
            .entry(row.pid)
            .or_default()
            .entry(row.cid)
            .or_default()
            .entry(row.model)
            .or_default()
            .insert(row.rid, result);
    }

    let max_runs = document
        .data
        .values()
        .flat_map(BTreeMap::values)
        .flat_map(BTreeMap::values)
        .map(BTreeMap::len)
        .max()
        .unwrap_or(0);
    document.runs = u32::try_from(max_runs)
        .map_err(|_| Error::validation(format!("too many runs in one combination: {max_runs}")))?;

    // Cases with real values replace the sentinel, matching a live matrix.
    if document.cases.values().any(Option::is_some) {
        document.cases.retain(|id, case| id != BASE_CASE_ID || case.is_some());
    }

    Ok(document)
}

fn parse_case_cell(case_id: &str, cell: &str) -> Result<Option<Case>> {
    let trimmed = cell.trim();
    if case_id == BASE_CASE_ID || trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let raw: BTreeMap<String, Value> = serde_json::from_str(trimmed)?;
    Ok(Some(case_from_values(raw)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_count(cell: &str) -> Result<u64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value as u64),
        _ => Err(Error::validation(format!("invalid token count: {trimmed}"))),
    }
}

fn parse_amount(cell: &str) -> Result<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| Error::validation(format!("invalid number: {trimmed}")))
}
