mod data;
mod device;
mod evaluator;
mod model;
mod optim;

use std::{fmt::Write, fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sievenn_core::{
    append_jsonl, ensure_report_file, load_or_init, update_sections, RandomSearch, ReportSection,
    RunMode, RunModeArgs, SearchDriver, SearchOutcome, TrialEvaluator, DEFAULT_REPORT_TEMPLATE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::device::{init_device, DevicePolicy};
use crate::evaluator::{MnistEvaluator, SamplePrediction, TrialRun};
use crate::model::TrialConfig;

/// Budget handed to the ad-hoc trial action.
const TRIAL_BUDGET: f64 = 10.0;
const SAMPLE_COUNT: usize = 3;

#[derive(Serialize, Deserialize)]
struct ExperimentConfig {
    /// Seeds the configuration sampler and the per-fit shuffle streams.
    seed: u64,
    /// How many configurations the baseline driver evaluates.
    trials: usize,
    /// Maximum iteration budget handed to the search driver.
    max_iter: f64,
    /// Downsampling factor for elimination-style drivers. The baseline
    /// random driver records it but does not consume it.
    eta: u32,
    /// "cpu" or "cuda:<ordinal>".
    device: String,
}

fn default_config() -> ExperimentConfig {
    ExperimentConfig {
        seed: 1337,
        trials: 16,
        max_iter: 81.0,
        eta: 3,
        device: "cpu".to_string(),
    }
}

struct ExperimentPaths {
    config: PathBuf,
    report: PathBuf,
    trials: PathBuf,
}

fn main() -> Result<()> {
    let args = RunModeArgs::parse_from_env()?;
    if args.help_requested() {
        print_usage();
        return Ok(());
    }

    init_tracing();

    let paths = initialize_paths()?;
    let config: ExperimentConfig = load_or_init(&paths.config, default_config)?;
    ensure_report_file(&paths.report, DEFAULT_REPORT_TEMPLATE)?;

    println!(
        "running MNIST hyperparameter study in {} mode",
        args.mode().label()
    );

    let policy = DevicePolicy {
        selection: config.device.parse()?,
        allow_growth: true,
    };
    let device = init_device(&policy);
    let mut evaluator = MnistEvaluator::mnist(device, config.seed)?;

    let (train, val, test) = evaluator.split_sizes();
    info!(
        train,
        val,
        test,
        classes = evaluator.n_classes(),
        shape = ?evaluator.input_shape(),
        "dataset ready"
    );

    match args.mode() {
        RunMode::Search => run_search(&paths, &config, &mut evaluator),
        RunMode::Trial => run_trial(&paths, &config, &mut evaluator),
    }
}

fn print_usage() {
    println!("Usage: cargo run -p sievenn-experiment-mnist-search -- [--mode search|trial]");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn initialize_paths() -> Result<ExperimentPaths> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("runs/mnist_search");
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create run directory {}", dir.display()))?;

    Ok(ExperimentPaths {
        config: dir.join("config.json"),
        report: dir.join("report.md"),
        trials: dir.join("trials.jsonl"),
    })
}

fn run_search(
    paths: &ExperimentPaths,
    config: &ExperimentConfig,
    evaluator: &mut MnistEvaluator,
) -> Result<()> {
    let mut driver = RandomSearch::new(config.trials, config.max_iter);
    let outcome = driver.run(evaluator)?;

    for trial in &outcome.trials {
        append_jsonl(&paths.trials, trial)?;
    }

    let best = outcome.best_trial();
    println!(
        "best of {} trials: objective {:.4} (val {:.4}, test {:.4})",
        outcome.trials.len(),
        best.objective,
        best.meta.acc_val,
        best.meta.acc_test
    );

    update_sections(
        &paths.report,
        &[
            ReportSection::new("configuration", render_configuration_section(config)),
            ReportSection::new("search-metrics", render_search_section(&outcome)),
        ],
    )
}

fn run_trial(
    paths: &ExperimentPaths,
    config: &ExperimentConfig,
    evaluator: &mut MnistEvaluator,
) -> Result<()> {
    let trial_config = evaluator.sample_configuration();
    let run = evaluator.evaluate_detailed(trial_config, TRIAL_BUDGET, true)?;

    append_jsonl(&paths.trials, &run.outcome)?;

    println!(
        "trial finished: objective {:.4} after {} epochs (converged: {})",
        run.outcome.objective,
        run.history.len(),
        run.outcome.converged
    );

    let samples = evaluator.sample_predictions(&run.model, SAMPLE_COUNT)?;

    update_sections(
        &paths.report,
        &[
            ReportSection::new("configuration", render_configuration_section(config)),
            ReportSection::new("trial-metrics", render_trial_section(&run)),
            ReportSection::new("samples-primary", render_samples_section(&samples)),
        ],
    )
}

fn render_configuration_section(config: &ExperimentConfig) -> String {
    format!(
        "- Seed: {}\n- Trials: {}\n- Max iteration budget: {}\n- Downsampling factor: {}\n- Device: {}\n",
        config.seed, config.trials, config.max_iter, config.eta, config.device
    )
}

fn render_search_section(outcome: &SearchOutcome<TrialConfig>) -> String {
    let best = outcome.best_trial();
    let mut output = String::new();

    let _ = writeln!(
        &mut output,
        "- Best objective: {:.4}\n- Best validation accuracy: {:.4}\n- Best test accuracy: {:.4}\n- Best trial converged early: {}\n",
        best.objective, best.meta.acc_val, best.meta.acc_test, best.converged
    );

    let _ = writeln!(
        &mut output,
        "| Trial | Optimizer | Batch | Iters | Objective | Val Acc | Converged |"
    );
    let _ = writeln!(&mut output, "| --- | --- | --- | --- | --- | --- | --- |");
    for (index, trial) in outcome.trials.iter().enumerate() {
        let marker = if index == outcome.best { " *" } else { "" };
        let _ = writeln!(
            &mut output,
            "| {}{} | {} | {} | {} | {:.4} | {:.4} | {} |",
            index + 1,
            marker,
            trial.config.optimizer.name(),
            trial.config.batch_size,
            trial.iters,
            trial.objective,
            trial.meta.acc_val,
            trial.converged
        );
    }

    output
}

fn render_trial_section(run: &TrialRun) -> String {
    let config = &run.outcome.config;
    let mut output = String::new();

    let _ = writeln!(
        &mut output,
        "- Optimizer: {}\n- Batch size: {}\n- Filters: {} / {}\n- Kernels: {} / {}\n- Pool size: {}\n- Dropout: {} / {}\n- Dense width: {}\n- Sampled but unused: n_layers = {}, init = {}\n",
        config.optimizer.name(),
        config.batch_size,
        config.n_filters_0,
        config.n_filters_1,
        config.kernel_size_0,
        config.kernel_size_1,
        config.pool_size,
        config.dropout_0,
        config.dropout_1,
        config.dense_0,
        config.n_layers,
        config.init.name()
    );

    let _ = writeln!(
        &mut output,
        "- Objective: {:.4}\n- Validation accuracy: {:.4}\n- Test accuracy: {:.4}\n- Converged early: {}\n",
        run.outcome.objective,
        run.outcome.meta.acc_val,
        run.outcome.meta.acc_test,
        run.outcome.converged
    );

    if !run.history.is_empty() {
        let _ = writeln!(
            &mut output,
            "| Epoch | Train Loss | Train Acc | Val Acc |"
        );
        let _ = writeln!(&mut output, "| --- | --- | --- | --- |");
        for metrics in &run.history {
            let _ = writeln!(
                &mut output,
                "| {} | {:.4} | {:.4} | {:.4} |",
                metrics.epoch, metrics.train_loss, metrics.train_accuracy, metrics.val_accuracy
            );
        }
    }

    output
}

fn render_samples_section(samples: &[SamplePrediction]) -> String {
    if samples.is_empty() {
        return "No validation samples available.".to_string();
    }

    let mut output = String::new();
    for (i, sample) in samples.iter().enumerate() {
        let _ = writeln!(
            &mut output,
            "#### Sample {} (index {})\n- True label: {}\n- Predicted: {}\n\n![Sample image]({})\n",
            i + 1,
            sample.index,
            sample.label,
            sample.prediction,
            sample.image_data_url
        );
    }

    output
}
