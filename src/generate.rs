//! Filling the matrix: calling a completion client for every outstanding run.
//!
//! Two strategies share the same work list:
//! - [`Strategy::Sequential`] runs one call at a time and checkpoints after
//!   each combination.
//! - [`Strategy::Batched`] flattens the work into one request per run, splits
//!   it into fixed-size batches, awaits each batch concurrently, and
//!   checkpoints after each batch.
//!
//! A failing call never aborts generation. Its error text is stored as the
//! result content with zeroed metrics.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matrix::{ComboKey, RunResult, TestMatrix, WorkUnit};
use crate::model::{Completion, CompletionRequest, Pricing, completion_cost};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Instant;

/// Default number of concurrent requests per batch.
pub const DEFAULT_BATCH_SIZE: usize = 30;

// ============================================================================
// Client Trait
// ============================================================================

/// Anything that can turn formatted messages into a completion.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    #[default]
    Batched,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Batched => "batched",
        }
    }
}

/// Everything a generation pass needs besides the matrix and the client.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub strategy: Strategy,
    pub batch_size: usize,
    /// Passed through to the client for provider-side tracing.
    pub project: Option<String>,
    pub pricing: Pricing,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            project: None,
            pricing: Pricing::new(),
        }
    }
}

impl GenerateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strategy: if config.async_generate() {
                Strategy::Batched
            } else {
                Strategy::Sequential
            },
            batch_size: config.batch_size(),
            project: config.project.clone(),
            pricing: config.pricing.clone().unwrap_or_default(),
        }
    }

    #[must_use]
    pub const fn sequential(mut self) -> Self {
        self.strategy = Strategy::Sequential;
        self
    }

    #[must_use]
    pub const fn batched(mut self, batch_size: usize) -> Self {
        self.strategy = Strategy::Batched;
        self.batch_size = batch_size;
        self
    }
}

/// Summary of one generation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Checkpoints written: combinations when sequential, batches when batched.
    pub batches: usize,
}

impl GenerationReport {
    fn tally(&mut self, result: &RunResult) {
        if result.error {
            self.failed += 1;
        } else {
            self.succeeded += 1;
        }
    }
}

// ============================================================================
// Generation
// ============================================================================

/// One pending run, carrying its own combination key.
#[derive(Debug, Clone)]
struct RunRequest {
    key: ComboKey,
    request: CompletionRequest,
}

/// Run every outstanding combination until the matrix reaches its run target.
///
/// Calling this again after an interruption only fills the remaining gap.
pub async fn generate(
    matrix: &mut TestMatrix,
    client: &dyn CompletionClient,
    options: &GenerateOptions,
) -> Result<GenerationReport> {
    if matrix.prompts().is_empty() {
        return Err(Error::MissingPrompt);
    }
    if matrix.models().is_empty() {
        tracing::warn!(test_id = %matrix.test_id(), "No models configured; nothing to generate");
        return Ok(GenerationReport::default());
    }

    let work = matrix.outstanding_work();
    let requested: usize = work.iter().map(|unit| unit.runs_needed as usize).sum();
    tracing::info!(
        test_id = %matrix.test_id(),
        combinations = work.len(),
        runs = requested,
        strategy = options.strategy.as_str(),
        "Generating responses"
    );

    let report = match options.strategy {
        Strategy::Sequential => generate_sequential(matrix, client, options, &work).await?,
        Strategy::Batched => generate_batched(matrix, client, options, &work).await?,
    };

    tracing::info!(
        test_id = %matrix.test_id(),
        succeeded = report.succeeded,
        failed = report.failed,
        "Generation finished"
    );
    Ok(report)
}

async fn generate_sequential(
    matrix: &mut TestMatrix,
    client: &dyn CompletionClient,
    options: &GenerateOptions,
    work: &[WorkUnit],
) -> Result<GenerationReport> {
    let mut report = GenerationReport::default();
    for unit in work {
        let request = build_request(unit, options);
        for _ in 0..unit.runs_needed {
            let result = invoke(client, &request, &options.pricing).await;
            report.requested += 1;
            report.tally(&result);
            matrix.insert_result(&unit.key, result)?;
        }
        matrix.save();
        report.batches += 1;
        tracing::debug!(key = %unit.key, runs = unit.runs_needed, "Combination complete");
    }
    Ok(report)
}

async fn generate_batched(
    matrix: &mut TestMatrix,
    client: &dyn CompletionClient,
    options: &GenerateOptions,
    work: &[WorkUnit],
) -> Result<GenerationReport> {
    let requests: Vec<RunRequest> = work
        .iter()
        .flat_map(|unit| {
            let request = build_request(unit, options);
            (0..unit.runs_needed).map(move |_| RunRequest {
                key: unit.key.clone(),
                request: request.clone(),
            })
        })
        .collect();

    let mut report = GenerationReport::default();
    let batch_size = options.batch_size.max(1);
    let total_batches = requests.len().div_ceil(batch_size);

    for (index, batch) in requests.chunks(batch_size).enumerate() {
        let results = join_all(
            batch
                .iter()
                .map(|run| invoke(client, &run.request, &options.pricing)),
        )
        .await;

        // join_all keeps request order, so each result goes to its own request's key.
        for (run, result) in batch.iter().zip(results) {
            report.requested += 1;
            report.tally(&result);
            matrix.insert_result(&run.key, result)?;
        }
        matrix.save();
        report.batches += 1;
        tracing::debug!(
            batch = index + 1,
            of = total_batches,
            size = batch.len(),
            "Batch complete"
        );
    }
    Ok(report)
}

fn build_request(unit: &WorkUnit, options: &GenerateOptions) -> CompletionRequest {
    CompletionRequest {
        messages: unit.messages(),
        model: unit.model.clone(),
        tags: vec![unit.key.prompt_id.clone(), unit.key.case_id.clone()],
        project: options.project.clone(),
    }
}

/// Call the client once. Errors become failure results.
async fn invoke(
    client: &dyn CompletionClient,
    request: &CompletionRequest,
    pricing: &Pricing,
) -> RunResult {
    let started = Instant::now();
    match client.complete(request).await {
        Ok(completion) => RunResult {
            tokens: completion.total_tokens(),
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            cost: completion_cost(pricing, &request.model, &completion),
            latency: started.elapsed().as_secs_f64(),
            content: completion.content,
            ..RunResult::default()
        },
        Err(err) => {
            tracing::warn!(model = %request.model, error = %err, "Completion failed");
            RunResult::failure(err.to_string())
        }
    }
}
