//! Test harness: a temp directory with a snapshot store, plus a log that is
//! printed if the test panics.

#![allow(dead_code)]

use super::logging::TestLogger;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thumb::Store;
use thumb::config::Config;

pub struct TestHarness {
    name: String,
    temp_dir: TempDir,
    logger: TestLogger,
}

impl TestHarness {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let logger = TestLogger::new();
        logger.info_ctx("harness", format!("Test '{name}' started"), |ctx| {
            ctx.push(("temp_dir".into(), temp_dir.path().display().to_string()));
        });
        Self {
            name,
            temp_dir,
            logger,
        }
    }

    pub const fn log(&self) -> &TestLogger {
        &self.logger
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn temp_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(path)
    }

    /// Snapshot store rooted at `<temp>/cache`.
    pub fn store(&self) -> Store {
        Store::new(self.temp_path("cache"))
    }

    /// Settings pointing the cache at [`Self::store`].
    pub fn config(&self) -> Config {
        Config {
            cache_dir: Some(self.temp_path("cache").display().to_string()),
            ..Config::default()
        }
    }

    pub fn create_file(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.temp_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content.as_ref()).expect("Failed to create test file");
        self.logger.info_ctx("harness", "Created test file", |ctx| {
            ctx.push(("path".into(), path.display().to_string()));
        });
        path
    }

    pub fn section(&self, name: &str) {
        self.logger.info("section", format!("=== {name} ==="));
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if std::thread::panicking() {
            eprint!("\n=== TEST FAILED: {} ===\n", self.name);
            eprint!("{}", self.logger.dump());
            eprintln!("=== END LOGS ===\n");
        }
    }
}
