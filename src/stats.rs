//! Aggregate statistics over recorded results.

use crate::matrix::{ComboKey, RunResult, TestMatrix};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Which id results are grouped by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    #[default]
    Prompt,
    Case,
    Model,
}

impl Grouping {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Case => "case",
            Self::Model => "model",
        }
    }

    fn key_of(self, key: &ComboKey) -> &str {
        match self {
            Self::Prompt => &key.prompt_id,
            Self::Case => &key.case_id,
            Self::Model => &key.model_id,
        }
    }
}

impl FromStr for Grouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" | "pid" => Ok(Self::Prompt),
            "case" | "cid" => Ok(Self::Case),
            "model" => Ok(Self::Model),
            other => Err(format!("unknown grouping: {other}")),
        }
    }
}

/// Aggregates for one group of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub key: String,
    /// Labels in result order, `0` or `1`.
    pub feedback: Vec<u8>,
    pub labeled: usize,
    /// Mean feedback over labeled results only.
    pub score: Option<f64>,
    pub mean_tokens: f64,
    pub mean_cost: f64,
    pub mean_latency: f64,
    pub results: usize,
    pub failures: usize,
}

/// Per-prompt row of [`TestMatrix::stats`].
pub type PromptStats = GroupStats;

#[derive(Default)]
struct Accumulator {
    feedback: Vec<u8>,
    tokens: f64,
    cost: f64,
    latency: f64,
    results: usize,
    failures: usize,
}

impl Accumulator {
    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, result: &RunResult) {
        if let Some(feedback) = result.feedback {
            self.feedback.push(feedback.value());
        }
        self.tokens += result.tokens as f64;
        self.cost += result.cost;
        self.latency += result.latency;
        self.results += 1;
        if result.error {
            self.failures += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self, key: String) -> GroupStats {
        let mean = |sum: f64| {
            if self.results == 0 {
                0.0
            } else {
                sum / self.results as f64
            }
        };
        let labeled = self.feedback.len();
        let score = (labeled > 0).then(|| {
            let positives: f64 = self.feedback.iter().map(|&v| f64::from(v)).sum();
            positives / labeled as f64
        });
        GroupStats {
            key,
            labeled,
            score,
            mean_tokens: mean(self.tokens),
            mean_cost: mean(self.cost),
            mean_latency: mean(self.latency),
            results: self.results,
            failures: self.failures,
            feedback: self.feedback,
        }
    }
}

impl TestMatrix {
    /// Per-prompt statistics.
    pub fn stats(&self) -> Vec<PromptStats> {
        self.stats_by(Grouping::Prompt)
    }

    /// Statistics grouped by prompt, case, or model id, sorted by key.
    ///
    /// Every known id gets a row, including ones with no results yet.
    pub fn stats_by(&self, grouping: Grouping) -> Vec<GroupStats> {
        let mut groups: BTreeMap<String, Accumulator> = match grouping {
            Grouping::Prompt => self.prompts().keys().cloned().collect::<Vec<_>>(),
            Grouping::Case => self.case_ids(),
            Grouping::Model => self.models().iter().map(crate::model::ModelRef::id).collect(),
        }
        .into_iter()
        .map(|key| (key, Accumulator::default()))
        .collect();

        for (key, entry) in self.results() {
            groups
                .entry(grouping.key_of(key).to_string())
                .or_default()
                .push(&entry.result);
        }

        groups
            .into_iter()
            .map(|(key, acc)| acc.finish(key))
            .collect()
    }
}
