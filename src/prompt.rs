//! Prompt templates, test cases, and the chat messages built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of the sentinel case used while a matrix has no real cases.
pub const BASE_CASE_ID: &str = "base-case";

/// A test case: variable name to substitution value.
pub type Case = BTreeMap<String, String>;

/// Build a case from arbitrary JSON values. Non-string values keep their JSON text.
pub fn case_from_values(values: BTreeMap<String, serde_json::Value>) -> Case {
    values
        .into_iter()
        .map(|(name, value)| match value {
            serde_json::Value::String(s) => (name, s),
            other => (name, other.to_string()),
        })
        .collect()
}

// ============================================================================
// Prompt
// ============================================================================

/// An ordered sequence of message templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prompt {
    templates: Vec<String>,
}

impl Prompt {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }

    pub fn single(template: impl Into<String>) -> Self {
        Self {
            templates: vec![template.into()],
        }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Content-addressed id of this prompt.
    pub fn id(&self) -> String {
        crate::hash::prompt_id(&self.templates)
    }

    /// Role for the template at `index`.
    ///
    /// Multi-message prompts open with a system message, then alternate
    /// human/assistant. A single template is a human message.
    pub fn role_at(&self, index: usize) -> Role {
        if self.templates.len() > 1 {
            if index == 0 {
                Role::System
            } else if index % 2 == 1 {
                Role::Human
            } else {
                Role::Assistant
            }
        } else {
            Role::Human
        }
    }

    /// Fill every template with `case` and attach roles.
    pub fn format(&self, case: Option<&Case>) -> Vec<Message> {
        self.templates
            .iter()
            .enumerate()
            .map(|(index, template)| Message {
                role: self.role_at(index),
                content: case.map_or_else(|| template.clone(), |c| fill_template(template, c)),
            })
            .collect()
    }

    /// Printed form used in tabular exports.
    pub fn to_cell(&self) -> String {
        serde_json::to_string(&self.templates).unwrap_or_default()
    }

    /// Parse a tabular Prompt cell.
    ///
    /// Accepts a JSON list or a printed list of quoted strings such as
    /// `['be brief', 'tell me a joke']`. Anything else is a single template.
    pub fn from_cell(cell: &str) -> Self {
        if let Ok(templates) = serde_json::from_str::<Vec<String>>(cell) {
            return Self::new(templates);
        }
        parse_quoted_list(cell).map_or_else(|| Self::single(cell), Self::new)
    }
}

/// Prompt as written by a caller: one template or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    Single(String),
    Messages(Vec<String>),
}

impl From<PromptInput> for Prompt {
    fn from(input: PromptInput) -> Self {
        match input {
            PromptInput::Single(template) => Self::single(template),
            PromptInput::Messages(templates) => Self::new(templates),
        }
    }
}

impl From<&str> for Prompt {
    fn from(template: &str) -> Self {
        Self::single(template)
    }
}

impl From<String> for Prompt {
    fn from(template: String) -> Self {
        Self::single(template)
    }
}

impl From<Vec<String>> for Prompt {
    fn from(templates: Vec<String>) -> Self {
        Self::new(templates)
    }
}

impl From<Vec<&str>> for Prompt {
    fn from(templates: Vec<&str>) -> Self {
        Self::new(templates.into_iter().map(str::to_string).collect())
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A formatted chat message ready for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Parse `['a', "b"]`: single- or double-quoted strings with backslash escapes.
fn parse_quoted_list(cell: &str) -> Option<Vec<String>> {
    let inner = cell.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut chars = inner.chars().peekable();
    let mut items = Vec::new();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(quote) = chars.next() else {
            return Some(items);
        };
        if quote != '\'' && quote != '"' {
            return None;
        }

        let mut item = String::new();
        loop {
            match chars.next()? {
                '\\' => match chars.next()? {
                    'n' => item.push('\n'),
                    't' => item.push('\t'),
                    'r' => item.push('\r'),
                    other => item.push(other),
                },
                c if c == quote => break,
                c => item.push(c),
            }
        }
        items.push(item);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => return Some(items),
            Some(',') => {}
            Some(_) => return None,
        }
    }
}

// ============================================================================
// Template filling
// ============================================================================

/// Replace `{name}` placeholders with values from `case`.
///
/// `{{` and `}}` produce literal braces. Placeholders without a value in the
/// case are left untouched.
pub fn fill_template(template: &str, case: &Case) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find('}') {
            Some(end) => {
                let name = &tail[1..=end];
                match case.get(name.trim()) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &tail[end + 2..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
