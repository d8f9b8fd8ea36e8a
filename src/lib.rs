//! thumb - prompt testing and evaluation
//!
//! A test is a matrix of prompts x cases x models x runs. The library plans
//! the matrix, fills it through any [`CompletionClient`], checkpoints after
//! every unit of work so an interrupted run picks up where it stopped, and
//! aggregates thumbs up/down feedback into per-prompt scores.
//!
//! ```no_run
//! use thumb::{Store, TestMatrix};
//!
//! let store = Store::new(".thumb/cache");
//! let mut matrix = TestMatrix::create(&store);
//! matrix.add_prompts(["tell me a joke", "tell me a family friendly joke"])?;
//! matrix.add_models(["gpt-3.5-turbo"]);
//! matrix.add_runs(10)?;
//! assert_eq!(matrix.outstanding_runs(), 20);
//! # Ok::<(), thumb::Error>(())
//! ```

#![forbid(unsafe_code)]

pub mod ape;
pub mod cli;
pub mod command_client;
pub mod config;
pub mod error;
pub mod error_hints;
pub mod feedback;
pub mod generate;
pub mod hash;
pub mod matrix;
pub mod model;
pub mod prompt;
pub mod stats;
pub mod store;
pub mod suite;

pub use error::{Error, Result};
pub use feedback::{Feedback, FeedbackLabels, PendingReview};
pub use generate::{CompletionClient, GenerateOptions, GenerationReport, Strategy, generate};
pub use matrix::{ComboKey, RunResult, TestMatrix};
pub use model::{Completion, CompletionRequest, ModelRef};
pub use prompt::{Case, Message, Prompt, Role};
pub use stats::{GroupStats, Grouping, PromptStats};
pub use store::Store;
pub use suite::{TestSuite, run_test};
