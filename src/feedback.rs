//! Human feedback: what still needs a label, and applying labels.

use crate::error::{Error, Result};
use crate::matrix::{ComboKey, TestMatrix};
use crate::prompt::Message;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A thumbs up or thumbs down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "u8")]
pub enum Feedback {
    Negative,
    Positive,
}

impl Feedback {
    pub const fn value(self) -> u8 {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }

    /// Parse a stored feedback cell: `1`, `0`, `1.0`, `true`, ...
    pub fn parse_cell(cell: &str) -> Result<Option<Self>> {
        match cell.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "null" | "nan" => Ok(None),
            "1" | "1.0" | "true" => Ok(Some(Self::Positive)),
            "0" | "0.0" | "false" => Ok(Some(Self::Negative)),
            other => Err(Error::validation(format!("unrecognized feedback value: {other}"))),
        }
    }
}

impl From<Feedback> for u8 {
    fn from(feedback: Feedback) -> Self {
        feedback.value()
    }
}

impl TryFrom<f64> for Feedback {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        if (value - 1.0).abs() < f64::EPSILON {
            Ok(Self::Positive)
        } else if value.abs() < f64::EPSILON {
            Ok(Self::Negative)
        } else {
            Err(format!("feedback must be 0 or 1, got {value}"))
        }
    }
}

// ============================================================================
// Labels
// ============================================================================

/// The two labels a reviewer picks from. Defaults to 👎 / 👍.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackLabels {
    pub negative: String,
    pub positive: String,
}

impl Default for FeedbackLabels {
    fn default() -> Self {
        Self {
            negative: "👎".to_string(),
            positive: "👍".to_string(),
        }
    }
}

impl FeedbackLabels {
    /// Map a label to feedback. Besides the configured labels, `up`/`down`,
    /// `1`/`0` and `+`/`-` are always understood.
    pub fn parse(&self, label: &str) -> Result<Feedback> {
        let label = label.trim();
        if label == self.positive {
            return Ok(Feedback::Positive);
        }
        if label == self.negative {
            return Ok(Feedback::Negative);
        }
        match label.to_ascii_lowercase().as_str() {
            "up" | "1" | "+" | "yes" | "good" => Ok(Feedback::Positive),
            "down" | "0" | "-" | "no" | "bad" => Ok(Feedback::Negative),
            _ => Err(Error::validation(format!(
                "unknown feedback label {label:?} (expected {} or {})",
                self.positive, self.negative
            ))),
        }
    }

    pub fn label(&self, feedback: Feedback) -> &str {
        match feedback {
            Feedback::Positive => &self.positive,
            Feedback::Negative => &self.negative,
        }
    }
}

// ============================================================================
// Pending reviews
// ============================================================================

/// An unlabeled result, ready to show to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReview {
    pub key: ComboKey,
    pub run_id: String,
    /// The formatted prompt the model saw.
    pub messages: Vec<Message>,
    pub content: String,
}

/// Permute `items` in place. A seed makes the order reproducible.
pub fn shuffle_pending<T>(items: &mut [T], seed: Option<u64>) {
    match seed {
        Some(seed) => items.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => items.shuffle(&mut rand::thread_rng()),
    }
}

impl TestMatrix {
    /// Every result without feedback, in shuffled order so no prompt, case,
    /// or model is favored by position.
    pub fn pending_for_feedback(&self, seed: Option<u64>) -> Vec<PendingReview> {
        let mut pending: Vec<PendingReview> = self
            .results()
            .filter(|(_, entry)| entry.result.feedback.is_none())
            .map(|(key, entry)| PendingReview {
                key: key.clone(),
                run_id: entry.run_id.clone(),
                messages: self.messages_for(key),
                content: entry.result.content.clone(),
            })
            .collect();
        shuffle_pending(&mut pending, seed);
        pending
    }

    /// Label one result and checkpoint.
    pub fn apply_feedback(
        &mut self,
        prompt_id: &str,
        case_id: &str,
        model_id: &str,
        run_id: &str,
        feedback: Feedback,
    ) -> Result<()> {
        let key = ComboKey::new(prompt_id, case_id, model_id);
        let entry = self
            .bucket_mut(&key)
            .and_then(|entries| entries.iter_mut().find(|e| e.run_id == run_id))
            .ok_or_else(|| Error::RunNotFound {
                prompt_id: prompt_id.to_string(),
                case_id: case_id.to_string(),
                model_id: model_id.to_string(),
                run_id: run_id.to_string(),
            })?;
        entry.result.feedback = Some(feedback);
        tracing::debug!(%key, run_id, feedback = feedback.value(), "Applied feedback");
        self.save();
        Ok(())
    }

    /// Count of results still waiting for a label.
    pub fn pending_count(&self) -> usize {
        self.results()
            .filter(|(_, entry)| entry.result.feedback.is_none())
            .count()
    }

    fn messages_for(&self, key: &ComboKey) -> Vec<Message> {
        match (self.prompt(&key.prompt_id), self.case(&key.case_id)) {
            (Some(prompt), Some(case)) => prompt.format(case),
            (Some(prompt), None) => prompt.format(None),
            _ => Vec::new(),
        }
    }
}
