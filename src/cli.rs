//! CLI argument parsing using Clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// thumb - test prompts across cases and models, then rate the answers
#[derive(Parser, Debug)]
#[command(name = "thumb")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  thumb plan suite.json                     Create the test and show outstanding runs
  thumb run suite.json --command 'llm -m gpt-4o'
                                            Generate every run through a command
  thumb pending 1a2b3c4d --limit 5          Results waiting for a thumbs up/down
  thumb feedback 1a2b3c4d <pid> <cid> <model> <rid> up
  thumb stats 1a2b3c4d --by model           Compare models
")]
pub struct Cli {
    /// Directory for test snapshots (overrides settings)
    #[arg(long, global = true, env = "THUMB_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Settings file to use instead of the global and project settings
    #[arg(long, global = true, env = "THUMB_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How generation reaches a model.
#[derive(clap::Args, Debug, Clone)]
pub struct ClientArgs {
    /// Shell command run once per completion; reads the request JSON on stdin
    #[arg(long, env = "THUMB_COMMAND")]
    pub command: String,

    /// Seconds before a single completion is abandoned
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Generate one request at a time
    #[arg(long)]
    pub sequential: bool,

    /// Concurrent requests per batch
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or resume a test from a suite file and show outstanding work
    Plan {
        /// Suite JSON: prompts, cases, models, runs, test_id
        suite: PathBuf,
    },

    /// Plan a suite and generate every outstanding run
    Run {
        suite: PathBuf,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Generate the remaining runs of a saved test
    Generate {
        /// Test id or snapshot path
        test: String,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Outstanding work and result counts
    Status { test: String },

    /// Aggregate statistics
    Stats {
        test: String,
        /// Group by prompt, case, or model
        #[arg(long, default_value = "prompt", value_parser = ["prompt", "case", "model"])]
        by: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Results waiting for feedback, in shuffled order
    Pending {
        test: String,
        /// Seed for a reproducible order
        #[arg(long)]
        seed: Option<u64>,
        /// Show at most this many
        #[arg(long)]
        limit: Option<usize>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Label one result
    Feedback {
        test: String,
        prompt_id: String,
        case_id: String,
        model: String,
        run_id: String,
        /// A configured label, or up/down, 1/0, +/-
        label: String,
    },

    /// Write the results table as CSV
    Export { test: String, output: PathBuf },

    /// Test ids in the cache directory
    List,

    /// Build an automatic prompt engineering request
    Ape {
        /// What the prompt should accomplish
        task: String,
        /// Test case as a JSON object; the expected output goes under "__ref__"
        #[arg(long = "case")]
        cases: Vec<String>,
        /// Success criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
        /// Model to ask
        #[arg(long, default_value = crate::config::DEFAULT_MODEL)]
        model: String,
        /// Send the request through this command and print the result
        #[arg(long, env = "THUMB_COMMAND")]
        command: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["thumb", "status", "abc", "--cache-dir", "/tmp/cache"]);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert!(matches!(cli.command, Commands::Status { ref test } if test == "abc"));
    }

    #[test]
    fn parse_stats_grouping() {
        let cli = Cli::parse_from(["thumb", "stats", "abc", "--by", "model", "--json"]);
        match cli.command {
            Commands::Stats { by, json, .. } => {
                assert_eq!(by, "model");
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["thumb", "stats", "abc", "--by", "run"]).is_err());
    }

    #[test]
    fn parse_feedback_positionals() {
        let cli = Cli::parse_from(["thumb", "feedback", "t", "p", "c", "m", "r", "up"]);
        match cli.command {
            Commands::Feedback {
                prompt_id,
                run_id,
                label,
                ..
            } => {
                assert_eq!(prompt_id, "p");
                assert_eq!(run_id, "r");
                assert_eq!(label, "up");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_run_client_args() {
        let cli = Cli::parse_from([
            "thumb",
            "run",
            "suite.json",
            "--command",
            "cat",
            "--batch-size",
            "4",
            "--sequential",
        ]);
        match cli.command {
            Commands::Run { suite, client } => {
                assert_eq!(suite, PathBuf::from("suite.json"));
                assert_eq!(client.command, "cat");
                assert_eq!(client.batch_size, Some(4));
                assert!(client.sequential);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_ape_repeatable_flags() {
        let cli = Cli::parse_from([
            "thumb",
            "ape",
            "write a haiku",
            "--case",
            r#"{"topic": "rain", "__ref__": "..."}"#,
            "--criterion",
            "Is it 17 syllables?",
            "--criterion",
            "Is it calm?",
        ]);
        match cli.command {
            Commands::Ape {
                cases, criteria, ..
            } => {
                assert_eq!(cases.len(), 1);
                assert_eq!(criteria.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
