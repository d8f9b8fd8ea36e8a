//! thumb - prompt testing from the command line
//!
//! Plans a prompt x case x model test from a suite file, fills it through a
//! command-backed completion client, and collects thumbs up/down feedback.

#![forbid(unsafe_code)]

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use asupersync::runtime::RuntimeBuilder;
use asupersync::runtime::reactor::create_reactor;
use clap::Parser;
use serde_json::Value;
use thumb::ape::{ReferenceCase, build_ape_prompt, build_candidate_prompt};
use thumb::cli::{self, ClientArgs, Commands};
use thumb::command_client::CommandClient;
use thumb::config::Config;
use thumb::generate::{CompletionClient, GenerateOptions, GenerationReport, generate};
use thumb::matrix::TestMatrix;
use thumb::model::{CompletionRequest, ModelRef};
use thumb::prompt::case_from_values;
use thumb::stats::{GroupStats, Grouping};
use thumb::store::Store;
use thumb::suite::TestSuite;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        print_error_with_hints(&err);
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = Config::load_with_roots(cli.config.as_deref(), &Config::global_dir(), &cwd)?;
    let store = cli
        .cache_dir
        .as_ref()
        .map_or_else(|| config.store(&cwd), |dir| Store::new(cwd.join(dir)));

    match cli.command {
        Commands::Plan { suite } => handle_plan(&store, &config, &suite),
        Commands::Run { suite, client } => handle_run(&store, &config, &suite, &client),
        Commands::Generate { test, client } => handle_generate(&store, &config, &test, &client),
        Commands::Status { test } => handle_status(&store, &test),
        Commands::Stats { test, by, json } => handle_stats(&store, &test, &by, json),
        Commands::Pending {
            test,
            seed,
            limit,
            json,
        } => handle_pending(&store, &test, seed, limit, json),
        Commands::Feedback {
            test,
            prompt_id,
            case_id,
            model,
            run_id,
            label,
        } => {
            let mut matrix = TestMatrix::load(&store, &test)?;
            let labels = config.feedback_labels();
            let feedback = labels.parse(&label)?;
            matrix.apply_feedback(&prompt_id, &case_id, &model, &run_id, feedback)?;
            println!(
                "Recorded {} for {prompt_id}/{case_id}/{model}/{run_id}",
                labels.label(feedback)
            );
            Ok(())
        }
        Commands::Export { test, output } => {
            let matrix = TestMatrix::load(&store, &test)?;
            matrix.export_csv(&output)?;
            println!(
                "Exported {} results to {}",
                matrix.total_results(),
                output.display()
            );
            Ok(())
        }
        Commands::List => {
            for test_id in store.list()? {
                println!("{test_id}");
            }
            Ok(())
        }
        Commands::Ape {
            task,
            cases,
            criteria,
            model,
            command,
        } => handle_ape(&config, &task, &cases, &criteria, &model, command),
    }
}

fn print_error_with_hints(err: &anyhow::Error) {
    for cause in err.chain() {
        if let Some(thumb_error) = cause.downcast_ref::<thumb::error::Error>() {
            eprint!("{}", thumb::error_hints::format_error_with_hints(thumb_error));
            return;
        }
    }

    eprintln!("{err}");
}

/// Drive a future to completion on an asupersync runtime.
fn block_on<T, Fut>(future: Fut) -> Result<T>
where
    Fut: Future<Output = thumb::error::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let reactor = create_reactor()?;
    let runtime = RuntimeBuilder::multi_thread()
        .blocking_threads(1, 8)
        .with_reactor(reactor)
        .build()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let join = runtime.handle().spawn(future);
    Ok(runtime.block_on(join)?)
}

fn command_client(args: &ClientArgs) -> CommandClient {
    CommandClient::new(args.command.clone()).with_timeout(args.timeout.map(Duration::from_secs))
}

fn generate_options(config: &Config, args: &ClientArgs) -> GenerateOptions {
    let options = GenerateOptions::from_config(config);
    if args.sequential {
        options.sequential()
    } else if let Some(batch_size) = args.batch_size {
        options.batched(batch_size)
    } else {
        options
    }
}

fn handle_plan(store: &Store, config: &Config, suite: &Path) -> Result<()> {
    let suite = TestSuite::from_path(suite)?;
    let matrix = suite.prepare(store, config)?;
    print_status(&matrix);
    Ok(())
}

fn handle_run(store: &Store, config: &Config, suite: &Path, args: &ClientArgs) -> Result<()> {
    let suite = TestSuite::from_path(suite)?;
    let matrix = suite.prepare(store, config)?;
    run_generation(matrix, config, args)
}

fn handle_generate(store: &Store, config: &Config, test: &str, args: &ClientArgs) -> Result<()> {
    let matrix = TestMatrix::load(store, test)?;
    run_generation(matrix, config, args)
}

fn run_generation(matrix: TestMatrix, config: &Config, args: &ClientArgs) -> Result<()> {
    let client = command_client(args);
    let options = generate_options(config, args);
    let (matrix, report) = block_on(async move {
        let mut matrix = matrix;
        let report = generate(&mut matrix, &client, &options).await?;
        Ok((matrix, report))
    })?;
    print_report(&report);
    print_status(&matrix);
    Ok(())
}

fn handle_status(store: &Store, test: &str) -> Result<()> {
    let matrix = TestMatrix::load(store, test)?;
    print_status(&matrix);
    Ok(())
}

fn handle_stats(store: &Store, test: &str, by: &str, json: bool) -> Result<()> {
    let grouping: Grouping = by.parse().map_err(anyhow::Error::msg)?;
    let matrix = TestMatrix::load(store, test)?;
    let stats = matrix.stats_by(grouping);
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats_table(grouping, &stats);
    }
    Ok(())
}

fn handle_pending(
    store: &Store,
    test: &str,
    seed: Option<u64>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let matrix = TestMatrix::load(store, test)?;
    let mut pending = matrix.pending_for_feedback(seed);
    let total = pending.len();
    if let Some(limit) = limit {
        pending.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    for review in &pending {
        let key = &review.key;
        println!(
            "== {} {} {} {}",
            key.prompt_id, key.case_id, key.model_id, review.run_id
        );
        for message in &review.messages {
            println!("[{}] {}", message.role, message.content);
        }
        println!("-> {}", review.content);
        println!();
    }
    println!("{} of {total} results awaiting feedback", pending.len());
    Ok(())
}

fn handle_ape(
    config: &Config,
    task: &str,
    cases: &[String],
    criteria: &[String],
    model: &str,
    command: Option<String>,
) -> Result<()> {
    let cases = cases
        .iter()
        .map(|raw| {
            let values: std::collections::BTreeMap<String, Value> = serde_json::from_str(raw)?;
            Ok(ReferenceCase::try_from(case_from_values(values))?)
        })
        .collect::<Result<Vec<_>>>()?;
    let candidate = build_candidate_prompt(task, &cases, criteria);
    let prompt = build_ape_prompt(&candidate);

    let Some(command) = command else {
        for message in prompt.format(None) {
            println!("[{}]\n{}\n", message.role, message.content);
        }
        return Ok(());
    };

    let request = CompletionRequest {
        messages: prompt.format(None),
        model: ModelRef::from(model),
        tags: Vec::new(),
        project: config.project.clone(),
    };
    let client = CommandClient::new(command);
    let completion = block_on(async move { client.complete(&request).await })?;
    if completion.content.is_empty() {
        bail!("The command returned an empty prompt");
    }
    println!("{}", completion.content);
    Ok(())
}

fn print_report(report: &GenerationReport) {
    println!(
        "Generated {} runs ({} ok, {} failed) in {} checkpoints",
        report.requested, report.succeeded, report.failed, report.batches
    );
}

fn print_status(matrix: &TestMatrix) {
    let path = matrix
        .path()
        .map_or_else(|| "in memory".to_string(), |p| p.display().to_string());
    println!("Test {} ({path})", matrix.test_id());
    println!(
        "  prompts: {}  cases: {}  models: {}  runs per combination: {}",
        matrix.prompts().len(),
        matrix.cases().len().max(1),
        matrix.models().len(),
        matrix.runs()
    );
    println!(
        "  results: {}  awaiting feedback: {}",
        matrix.total_results(),
        matrix.pending_count()
    );
    let work = matrix.outstanding_work();
    if work.is_empty() {
        println!("  complete");
    } else {
        println!(
            "  outstanding: {} runs across {} combinations",
            matrix.outstanding_runs(),
            work.len()
        );
    }
}

fn print_stats_table(grouping: Grouping, stats: &[GroupStats]) {
    let key_width = stats
        .iter()
        .map(|s| s.key.len())
        .max()
        .unwrap_or(0)
        .max(grouping.as_str().len());
    println!(
        "{:<key_width$}  {:>7}  {:>6}  {:>7}  {:>6}  {:>8}  {:>10}  {:>8}",
        grouping.as_str(),
        "results",
        "failed",
        "labeled",
        "score",
        "tokens",
        "cost",
        "latency"
    );
    for row in stats {
        let score = row
            .score
            .map_or_else(|| "-".to_string(), |score| format!("{score:.3}"));
        println!(
            "{:<key_width$}  {:>7}  {:>6}  {:>7}  {:>6}  {:>8.1}  {:>10.6}  {:>7.2}s",
            row.key,
            row.results,
            row.failures,
            row.labeled,
            score,
            row.mean_tokens,
            row.mean_cost,
            row.mean_latency
        );
    }
}
