//! The seam between an experiment's model evaluator and a hyperparameter
//! search driver.
//!
//! A driver only ever needs two operations from the thing it is tuning:
//! draw a fresh configuration, and score a configuration under an iteration
//! budget. `TrialEvaluator` captures exactly that, so drivers stay generic
//! over whatever is being tuned.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metrics::TrialMetrics;

/// The evaluator surface a search driver runs against.
pub trait TrialEvaluator {
    type Config: Clone;

    /// Draw one configuration uniformly at random from the tunable space.
    fn sample_configuration(&mut self) -> Self::Config;

    /// Train and score a configuration under `budget` iterations.
    fn evaluate(
        &mut self,
        config: Self::Config,
        budget: f64,
        verbose: bool,
    ) -> Result<TrialOutcome<Self::Config>>;
}

/// The record produced by one evaluation call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrialOutcome<C> {
    /// 1 − validation accuracy; drivers minimize this.
    pub objective: f64,
    /// The configuration that was evaluated, echoed unchanged.
    pub config: C,
    /// The iteration budget after rounding to whole epochs.
    pub iters: u32,
    /// Whether early stopping halted training before the budget ran out.
    pub converged: bool,
    pub meta: TrialMetrics,
}

/// A completed search: every trial plus the index of the winner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchOutcome<C> {
    pub best: usize,
    pub trials: Vec<TrialOutcome<C>>,
}

impl<C> SearchOutcome<C> {
    pub fn best_trial(&self) -> &TrialOutcome<C> {
        &self.trials[self.best]
    }
}

/// A strategy that decides which configurations to evaluate and at what
/// budget. Elimination-style drivers plug in here; the crate ships only the
/// random baseline.
pub trait SearchDriver {
    fn run<E: TrialEvaluator>(&mut self, evaluator: &mut E) -> Result<SearchOutcome<E::Config>>;
}

/// Baseline driver: independent random configurations, each evaluated at the
/// full budget, best-by-lowest-objective wins.
#[derive(Clone, Copy, Debug)]
pub struct RandomSearch {
    trials: usize,
    budget: f64,
}

impl RandomSearch {
    pub fn new(trials: usize, budget: f64) -> Self {
        Self { trials, budget }
    }
}

impl SearchDriver for RandomSearch {
    fn run<E: TrialEvaluator>(&mut self, evaluator: &mut E) -> Result<SearchOutcome<E::Config>> {
        ensure!(self.trials > 0, "search needs at least one trial");

        let mut trials = Vec::with_capacity(self.trials);
        for trial in 1..=self.trials {
            let config = evaluator.sample_configuration();
            info!(trial, total = self.trials, budget = self.budget, "starting trial");

            let outcome = evaluator.evaluate(config, self.budget, false)?;
            info!(
                trial,
                objective = outcome.objective,
                acc_val = outcome.meta.acc_val,
                acc_test = outcome.meta.acc_test,
                converged = outcome.converged,
                "trial finished"
            );
            trials.push(outcome);
        }

        let best = trials
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.objective.total_cmp(&b.objective))
            .map(|(index, _)| index)
            .unwrap_or(0);

        Ok(SearchOutcome { best, trials })
    }
}
