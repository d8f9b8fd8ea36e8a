//! Automatic prompt engineering.
//!
//! [`build_candidate_prompt`] describes a task, its test cases, and the
//! success criteria in plain text. [`build_ape_prompt`] wraps that text in a
//! two-message [`Prompt`] asking a model to write the prompt template. The
//! result goes through any [`CompletionClient`](crate::generate::CompletionClient)
//! like every other prompt.

use crate::error::{Error, Result};
use crate::prompt::{Case, Prompt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Case key that carries the expected output in flat case maps.
pub const REFERENCE_KEY: &str = "__ref__";

pub const DEFAULT_CRITERION: &str = "Is the submission helpful, insightful, and appropriate?";

const SYSTEM_PROMPT: &str = "You're a world-leading expert in AI prompt engineering.
Respond with your optimized prompt, and nothing else. Be creative.
NEVER CHEAT BY INCLUDING SPECIFICS ABOUT THE TEST CASES IN YOUR PROMPT.
ANY PROMPTS WITH THOSE SPECIFIC EXAMPLES WILL BE DISQUALIFIED.
IF YOU USE EXAMPLES, ALWAYS USE ONES THAT ARE VERY DIFFERENT FROM THE TEST CASES.";

/// Input variables plus the output a good prompt should produce for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCase {
    pub inputs: Case,
    pub reference: String,
}

impl TryFrom<Case> for ReferenceCase {
    type Error = Error;

    /// Split a flat case whose expected output sits under [`REFERENCE_KEY`].
    fn try_from(mut case: Case) -> Result<Self> {
        let reference = case.remove(REFERENCE_KEY).ok_or_else(|| {
            Error::validation(format!("test case is missing its {REFERENCE_KEY} value"))
        })?;
        Ok(Self {
            inputs: case,
            reference,
        })
    }
}

/// Describe the prompt we want: the task, worked test cases, and criteria.
///
/// With no criteria the [`DEFAULT_CRITERION`] is used. Every input variable
/// adds a criterion requiring its `{{ name }}` placeholder.
pub fn build_candidate_prompt(
    task: &str,
    cases: &[ReferenceCase],
    criteria: &[String],
) -> String {
    let mut out = format!("Here is the task for which we need to build a prompt template:\n{task}");
    let mut variables = BTreeSet::new();

    if !cases.is_empty() {
        out.push_str("\n\nHere are some test case scenarios and their example outputs:");
        for (idx, case) in cases.iter().enumerate() {
            let _ = write!(out, "\n## Test case {}\nInput variables:", idx + 1);
            for (name, value) in &case.inputs {
                let _ = write!(out, "\n- {name}: \"{value}\"");
                variables.insert(name.as_str());
            }
            let _ = write!(out, "\nExpected output:\n{}\n", case.reference.trim_end());
        }
        out.truncate(out.trim_end().len());
    }

    out.push_str(
        "\n\nThe prompt will be deemed successful if it generates responses that meet the following criteria:",
    );
    if criteria.is_empty() {
        let _ = write!(out, "\n- {DEFAULT_CRITERION}");
    }
    for criterion in criteria {
        let _ = write!(out, "\n- {criterion}");
    }
    for name in variables {
        let _ = write!(out, "\n- {{{{ {name} }}}} is included in the prompt");
    }
    out
}

/// System instructions plus the candidate description, ready to send.
pub fn build_ape_prompt(candidate: &str) -> Prompt {
    Prompt::new(vec![SYSTEM_PROMPT.to_string(), candidate.to_string()])
}
