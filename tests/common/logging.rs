//! In-memory test log, dumped when a test fails.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub elapsed_ms: u128,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub context: Vec<(String, String)>,
}

impl LogEntry {
    pub fn format(&self) -> String {
        let mut output = format!(
            "[{:>6}ms] {} [{}] {}\n",
            self.elapsed_ms,
            self.level.as_str(),
            self.category,
            self.message
        );
        for (key, value) in &self.context {
            let _ = writeln!(output, "           {key} = {value}");
        }
        output
    }
}

/// Captures entries so a failing test can print what led up to it.
pub struct TestLogger {
    entries: Mutex<Vec<LogEntry>>,
    start: Instant,
}

impl Default for TestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLogger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            start: Instant::now(),
        }
    }

    pub fn with_context<F>(&self, level: LogLevel, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        let mut context = Vec::new();
        f(&mut context);
        let entry = LogEntry {
            elapsed_ms: self.start.elapsed().as_millis(),
            level,
            category: category.to_string(),
            message: message.into(),
            context,
        };
        self.entries.lock().unwrap().push(entry);
    }

    pub fn debug(&self, category: &str, message: impl Into<String>) {
        self.with_context(LogLevel::Debug, category, message, |_| {});
    }

    pub fn info(&self, category: &str, message: impl Into<String>) {
        self.with_context(LogLevel::Info, category, message, |_| {});
    }

    pub fn warn(&self, category: &str, message: impl Into<String>) {
        self.with_context(LogLevel::Warn, category, message, |_| {});
    }

    pub fn info_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.with_context(LogLevel::Info, category, message, f);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn dump(&self) -> String {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(LogEntry::format)
            .collect()
    }
}
