//! Model references and the request/response types exchanged with a
//! completion client.

use crate::prompt::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Model Reference
// ============================================================================

/// A model, optionally with call parameters such as temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelRef {
    Name(String),
    WithParams {
        name: String,
        #[serde(default)]
        params: BTreeMap<String, Value>,
    },
}

impl ModelRef {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::WithParams { name, .. } => name,
        }
    }

    pub fn params(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Name(_) => None,
            Self::WithParams { params, .. } => Some(params),
        }
    }

    /// Key used for this model in the matrix.
    ///
    /// Plain names are their own id. Parameterized models append their
    /// parameters as compact JSON, e.g. `gpt-4 {"temperature":0.2}`.
    pub fn id(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::WithParams { name, params } if params.is_empty() => name.clone(),
            Self::WithParams { name, params } => {
                let params = serde_json::to_string(params).unwrap_or_default();
                format!("{name} {params}")
            }
        }
    }

    /// Rebuild a reference from a matrix model id.
    pub fn from_id(id: &str) -> Self {
        if let Some((name, params)) = id.split_once(" {") {
            if let Ok(params) = serde_json::from_str::<BTreeMap<String, Value>>(&format!("{{{params}"))
            {
                return Self::WithParams {
                    name: name.to_string(),
                    params,
                };
            }
        }
        Self::Name(id.to_string())
    }

    /// Sampling temperature, when one was given.
    pub fn temperature(&self) -> Option<f64> {
        self.params()
            .and_then(|params| params.get("temperature"))
            .and_then(Value::as_f64)
    }
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id())
    }
}

// ============================================================================
// Completion request / response
// ============================================================================

/// One call to a completion client.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: ModelRef,
    /// `[prompt-id, case-id]`, for tracing on the provider side.
    pub tags: Vec<String>,
    pub project: Option<String>,
}

/// What a client returns for a successful call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Model name reported by the provider, if any.
    pub model: Option<String>,
    /// Cost in dollars reported by the provider, if any.
    pub cost: Option<f64>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub const fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ============================================================================
// Pricing
// ============================================================================

/// Model pricing per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
}

impl ModelCost {
    /// Calculate cost for usage.
    #[allow(clippy::cast_precision_loss)] // Token counts within practical range won't lose precision
    pub fn calculate(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let input_cost = (self.input / 1_000_000.0) * prompt_tokens as f64;
        let output_cost = (self.output / 1_000_000.0) * completion_tokens as f64;
        input_cost + output_cost
    }
}

/// Pricing table keyed by model name.
pub type Pricing = BTreeMap<String, ModelCost>;

/// Cost of `completion` on `model`; provider-reported cost wins, unknown models are free.
pub fn completion_cost(pricing: &Pricing, model: &ModelRef, completion: &Completion) -> f64 {
    if let Some(cost) = completion.cost {
        return cost;
    }
    pricing.get(model.name()).map_or(0.0, |price| {
        price.calculate(completion.prompt_tokens, completion.completion_tokens)
    })
}
