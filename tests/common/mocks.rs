//! Scripted completion clients and command fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thumb::error::{Error, Result};
use thumb::generate::CompletionClient;
use thumb::model::{Completion, CompletionRequest};

/// Answers `"<model>: <last message>"` and records every request.
///
/// Calls whose zero-based index is in `fail_on` return a provider error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedClient {
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    fail_on: HashSet<usize>,
    usage: (u64, u64),
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_on(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_on.extend(calls);
        self
    }

    #[must_use]
    pub const fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = (prompt_tokens, completion_tokens);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        if self.fail_on.contains(&index) {
            return Err(Error::provider("scripted", format!("call {index} failed")));
        }
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(Completion {
            content: format!("{}: {last}", request.model.name()),
            prompt_tokens: self.usage.0,
            completion_tokens: self.usage.1,
            model: Some(request.model.name().to_string()),
            cost: None,
        })
    }
}

/// Write an executable shell script for command-client tests.
pub fn exec_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
    }
    path
}
