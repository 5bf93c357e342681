//! The model evaluator: owns the data splits, samples configurations, and
//! turns (configuration, iteration budget) into an objective.

use anyhow::{anyhow, bail, ensure, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdaGradConfig, AdamConfig, GradientsParams, Optimizer, RmsPropConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};
use burn_autodiff::Autodiff;
use burn_candle::{Candle, CandleDevice};
use rand::{rngs::StdRng, Rng};
use sievenn_core::{
    seeded_rng, shuffled_indices, EpochMetrics, TrialEvaluator, TrialMetrics, TrialOutcome,
};
use tracing::info;

use crate::data::{self, ImageSet, ImageShape};
use crate::model::{ConvNet, OptimizerKind, TrialConfig};
use crate::optim::AdaDeltaConfig;

pub type TrainingBackend = Autodiff<Candle<f32, i64>>;
pub type InferenceBackend = Candle<f32, i64>;

/// Seed for the one-time train/validation partition. Fixed so every
/// evaluator instance sees the same split.
const SPLIT_SEED: u64 = 123;
const TRAIN_FRACTION: f64 = 0.8;
/// Epochs of non-improving validation accuracy tolerated before training halts.
const EARLY_STOPPING_PATIENCE: usize = 5;
const PREDICT_BATCH: usize = 512;

pub struct MnistEvaluator {
    train: ImageSet,
    val: ImageSet,
    test: ImageSet,
    input_shape: ImageShape,
    n_classes: usize,
    device: CandleDevice,
    rng: StdRng,
}

/// Everything one evaluation produced. The search seam only sees the
/// outcome; the trial entry action also wants the history and the trained
/// model for its notebook.
pub struct TrialRun {
    pub outcome: TrialOutcome<TrialConfig>,
    pub history: Vec<EpochMetrics>,
    pub model: ConvNet<InferenceBackend>,
}

/// One rendered validation sample for the notebook.
#[derive(Clone)]
pub struct SamplePrediction {
    pub index: usize,
    pub label: usize,
    pub prediction: usize,
    pub image_data_url: String,
}

struct FitOutcome {
    model: ConvNet<TrainingBackend>,
    converged: bool,
    history: Vec<EpochMetrics>,
}

impl MnistEvaluator {
    /// Build the evaluator over MNIST: normalize, split train 80/20 with the
    /// fixed seed, keep the provided test partition.
    pub fn mnist(device: CandleDevice, sampler_seed: u64) -> Result<Self> {
        let (train_source, test) = data::mnist_source()?;
        Self::from_source(train_source, test, device, sampler_seed)
    }

    /// Build the evaluator over any in-memory image source. Class count is
    /// `max label + 1` over the train source; the split happens here, once.
    pub fn from_source(
        train_source: ImageSet,
        test: ImageSet,
        device: CandleDevice,
        sampler_seed: u64,
    ) -> Result<Self> {
        ensure!(!train_source.is_empty(), "train source must not be empty");
        ensure!(!test.is_empty(), "test partition must not be empty");
        ensure!(
            train_source.shape() == test.shape(),
            "train and test partitions disagree on image shape"
        );

        let input_shape = train_source.shape();
        let n_classes = train_source
            .max_label()
            .map(|label| label as usize + 1)
            .ok_or_else(|| anyhow!("train source has no labels"))?;

        let (train, val) = train_source.split(TRAIN_FRACTION, SPLIT_SEED);
        ensure!(
            !train.is_empty() && !val.is_empty(),
            "train source too small to split {}% / {}%",
            (TRAIN_FRACTION * 100.0) as u32,
            100 - (TRAIN_FRACTION * 100.0) as u32
        );

        Ok(Self {
            train,
            val,
            test,
            input_shape,
            n_classes,
            device,
            rng: seeded_rng(sampler_seed),
        })
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn split_sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.val.len(), self.test.len())
    }

    /// Full evaluation protocol, keeping the trained model and the epoch
    /// history alongside the outcome record.
    pub fn evaluate_detailed(
        &mut self,
        config: TrialConfig,
        budget: f64,
        verbose: bool,
    ) -> Result<TrialRun> {
        let epochs = budget.round().max(0.0) as usize;

        let model = ConvNet::<TrainingBackend>::build(
            &config,
            self.input_shape,
            self.n_classes,
            &self.device,
        )?;

        let learning_rate = config.optimizer.default_learning_rate();
        let fit = match config.optimizer {
            OptimizerKind::RmsProp => self.fit(
                model,
                RmsPropConfig::new().init(),
                learning_rate,
                &config,
                epochs,
                verbose,
            )?,
            OptimizerKind::AdaGrad => self.fit(
                model,
                AdaGradConfig::new().init(),
                learning_rate,
                &config,
                epochs,
                verbose,
            )?,
            OptimizerKind::AdaDelta => self.fit(
                model,
                AdaDeltaConfig::new().init(),
                learning_rate,
                &config,
                epochs,
                verbose,
            )?,
            OptimizerKind::Adam => self.fit(
                model,
                AdamConfig::new().init(),
                learning_rate,
                &config,
                epochs,
                verbose,
            )?,
        };

        let model = fit.model.valid();
        let acc_val = self.accuracy(&model, &self.val)?;
        let acc_test = self.accuracy(&model, &self.test)?;

        Ok(TrialRun {
            outcome: TrialOutcome {
                objective: 1.0 - acc_val,
                config,
                iters: epochs as u32,
                converged: fit.converged,
                meta: TrialMetrics { acc_val, acc_test },
            },
            history: fit.history,
            model,
        })
    }

    fn fit<O>(
        &mut self,
        mut model: ConvNet<TrainingBackend>,
        mut optimizer: O,
        learning_rate: f64,
        config: &TrialConfig,
        epochs: usize,
        verbose: bool,
    ) -> Result<FitOutcome>
    where
        O: Optimizer<ConvNet<TrainingBackend>, TrainingBackend>,
    {
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut stopper = EarlyStopping::new(EARLY_STOPPING_PATIENCE);
        let mut shuffle_rng = seeded_rng(self.rng.gen());
        let mut history = Vec::with_capacity(epochs);
        let mut converged = false;

        for epoch in 1..=epochs {
            let order = shuffled_indices(&mut shuffle_rng, self.train.len());

            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;

            for chunk in order.chunks(config.batch_size) {
                let batch = self.train.batch::<TrainingBackend>(chunk, &self.device);
                let logits = model.forward(batch.images);
                let loss = loss_fn.forward(logits.clone(), batch.labels.clone());

                let (batch_correct, _) = accuracy_counts(logits, batch.labels);
                correct += batch_correct;
                loss_sum += loss.clone().into_scalar().elem::<f32>() as f64 * chunk.len() as f64;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(learning_rate, model, grads);
            }

            let train_loss = loss_sum / self.train.len() as f64;
            let train_accuracy = correct as f64 / self.train.len() as f64;
            let val_accuracy = self.accuracy(&model.valid(), &self.val)?;

            if verbose {
                info!(
                    epoch,
                    train_loss, train_accuracy, val_accuracy, "epoch finished"
                );
            }
            history.push(EpochMetrics {
                epoch,
                train_loss,
                train_accuracy,
                val_accuracy,
            });

            if stopper.observe(val_accuracy) {
                converged = true;
                break;
            }
        }

        Ok(FitOutcome {
            model,
            converged,
            history,
        })
    }

    /// Arg-max prediction accuracy over a split, in fixed-size batches with
    /// dropout disabled.
    fn accuracy(&self, model: &ConvNet<InferenceBackend>, set: &ImageSet) -> Result<f64> {
        if set.is_empty() {
            bail!("cannot score an empty split");
        }

        let indices: Vec<usize> = (0..set.len()).collect();
        let mut correct = 0usize;

        for chunk in indices.chunks(PREDICT_BATCH) {
            let batch = set.batch::<InferenceBackend>(chunk, &self.device);
            let predictions = model
                .forward(batch.images)
                .argmax(1)
                .into_data()
                .convert::<i64>()
                .to_vec::<i64>()
                .map_err(|err| anyhow!("failed to decode predictions: {err:?}"))?;

            for (&index, &prediction) in chunk.iter().zip(predictions.iter()) {
                if prediction == set.label(index) {
                    correct += 1;
                }
            }
        }

        Ok(correct as f64 / set.len() as f64)
    }

    /// Render the first `count` validation images with the model's guesses.
    pub fn sample_predictions(
        &self,
        model: &ConvNet<InferenceBackend>,
        count: usize,
    ) -> Result<Vec<SamplePrediction>> {
        let available = count.min(self.val.len());
        if available == 0 {
            return Ok(Vec::new());
        }

        let indices: Vec<usize> = (0..available).collect();
        let batch = self.val.batch::<InferenceBackend>(&indices, &self.device);
        let predictions = model
            .forward(batch.images)
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|err| anyhow!("failed to decode predictions: {err:?}"))?;

        let mut samples = Vec::with_capacity(available);
        for (&index, &prediction) in indices.iter().zip(predictions.iter()) {
            let image_data_url = sievenn_core::encode_luma_png_data_url(
                self.input_shape.width as u32,
                self.input_shape.height as u32,
                self.val.image(index),
            )?;
            samples.push(SamplePrediction {
                index,
                label: self.val.label(index) as usize,
                prediction: prediction as usize,
                image_data_url,
            });
        }

        Ok(samples)
    }
}

impl TrialEvaluator for MnistEvaluator {
    type Config = TrialConfig;

    fn sample_configuration(&mut self) -> TrialConfig {
        TrialConfig::sample(&mut self.rng)
    }

    fn evaluate(
        &mut self,
        config: TrialConfig,
        budget: f64,
        verbose: bool,
    ) -> Result<TrialOutcome<TrialConfig>> {
        self.evaluate_detailed(config, budget, verbose)
            .map(|run| run.outcome)
    }
}

fn accuracy_counts<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> (usize, usize) {
    let predictions = logits.argmax(1).squeeze(1);
    let correct = predictions
        .equal(targets.clone())
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize;
    let total = targets.dims()[0];

    (correct, total)
}

/// Halts training once the monitored value has gone `patience` consecutive
/// observations without improving on its best.
struct EarlyStopping {
    patience: usize,
    best: f64,
    stale: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::NEG_INFINITY,
            stale: 0,
        }
    }

    fn observe(&mut self, value: f64) -> bool {
        if value > self.best {
            self.best = value;
            self.stale = 0;
        } else {
            self.stale += 1;
        }
        self.stale >= self.patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::WeightInit;

    /// Four classes of 10x10 images, one bright quadrant per class, with a
    /// per-sample brightness wobble so the problem is learnable but not
    /// degenerate.
    fn synthetic_set(per_class: usize, offset: usize) -> ImageSet {
        let (height, width) = (10, 10);
        let classes = 4;
        let mut images = Vec::with_capacity(per_class * classes * height * width);
        let mut labels = Vec::with_capacity(per_class * classes);

        for sample in 0..per_class {
            for class in 0..classes {
                let wobble = 0.7 + 0.3 * ((sample + offset) as f32 / (per_class + offset) as f32);
                for y in 0..height {
                    for x in 0..width {
                        let quadrant = (y / 5) * 2 + x / 5;
                        let value = if quadrant == class { wobble } else { 0.05 };
                        images.push(value);
                    }
                }
                labels.push(class as i64);
            }
        }

        ImageSet::new(images, labels, height, width).unwrap()
    }

    fn evaluator(sampler_seed: u64) -> MnistEvaluator {
        MnistEvaluator::from_source(
            synthetic_set(10, 0),
            synthetic_set(2, 100),
            CandleDevice::Cpu,
            sampler_seed,
        )
        .unwrap()
    }

    fn tiny_config() -> TrialConfig {
        TrialConfig {
            n_layers: 2,
            init: WeightInit::GlorotUniform,
            batch_size: 16,
            optimizer: OptimizerKind::Adam,
            n_filters_0: 8,
            kernel_size_0: 2,
            n_filters_1: 8,
            kernel_size_1: 2,
            pool_size: 2,
            dropout_0: 0.125,
            dense_0: 64,
            dropout_1: 0.125,
        }
    }

    #[test]
    fn construction_records_shape_classes_and_split() {
        let evaluator = evaluator(1);
        assert_eq!(
            evaluator.input_shape(),
            ImageShape {
                height: 10,
                width: 10,
                channels: 1
            }
        );
        assert_eq!(evaluator.n_classes(), 4);
        // 40 source images split 80/20.
        assert_eq!(evaluator.split_sizes(), (32, 8, 8));
    }

    #[test]
    fn evaluate_returns_a_complete_outcome() {
        let mut evaluator = evaluator(2);
        let config = tiny_config();
        let outcome = evaluator.evaluate(config.clone(), 1.0, false).unwrap();

        assert_eq!(outcome.config, config);
        assert_eq!(outcome.iters, 1);
        assert!(!outcome.converged);
        assert!((0.0..=1.0).contains(&outcome.meta.acc_val));
        assert!((0.0..=1.0).contains(&outcome.meta.acc_test));
        assert!((outcome.objective - (1.0 - outcome.meta.acc_val)).abs() < 1e-12);
    }

    #[test]
    fn budget_rounds_to_whole_epochs() {
        let mut evaluator = evaluator(3);

        let run = evaluator
            .evaluate_detailed(tiny_config(), 2.4, false)
            .unwrap();
        assert_eq!(run.outcome.iters, 2);
        assert_eq!(run.history.len(), 2);

        let run = evaluator
            .evaluate_detailed(tiny_config(), 0.4, false)
            .unwrap();
        assert_eq!(run.outcome.iters, 0);
        assert!(run.history.is_empty());
        assert!(!run.outcome.converged);
    }

    #[test]
    fn every_optimizer_variant_trains() {
        let mut evaluator = evaluator(4);
        for optimizer in crate::model::OPTIMIZER_CHOICES {
            let config = TrialConfig {
                optimizer,
                ..tiny_config()
            };
            let outcome = evaluator.evaluate(config, 1.0, false).unwrap();
            assert_eq!(outcome.iters, 1);
        }
    }

    #[test]
    fn sampling_uses_the_seeded_rng() {
        let mut a = evaluator(7);
        let mut b = evaluator(7);
        assert_eq!(a.sample_configuration(), b.sample_configuration());
        assert_eq!(a.sample_configuration(), b.sample_configuration());

        // Without reseeding, consecutive draws differ.
        let mut c = evaluator(7);
        let first = c.sample_configuration();
        let second = c.sample_configuration();
        assert_ne!(first, second);
    }

    #[test]
    fn sample_predictions_render_data_urls() {
        let mut evaluator = evaluator(5);
        let run = evaluator
            .evaluate_detailed(tiny_config(), 1.0, false)
            .unwrap();

        let samples = evaluator.sample_predictions(&run.model, 3).unwrap();
        assert_eq!(samples.len(), 3);
        for sample in &samples {
            assert!(sample.label < 4);
            assert!(sample.prediction < 4);
            assert!(sample.image_data_url.starts_with("data:image/png;base64,"));
        }
    }

    #[test]
    fn early_stopping_cuts_long_budgets() {
        let mut evaluator = evaluator(6);
        let run = evaluator
            .evaluate_detailed(tiny_config(), 60.0, false)
            .unwrap();

        // Validation accuracy over 8 samples has nine possible levels, so
        // the best can only improve eight times after the first epoch and
        // the patience rule must fire well inside the budget.
        assert!(run.outcome.converged);
        assert!(run.history.len() < 60);
        assert!(run.history.len() >= 6);
        assert_eq!(run.outcome.iters, 60);
    }

    #[test]
    fn early_stopping_waits_for_patience() {
        let mut stopper = EarlyStopping::new(5);
        // Improvement resets the counter.
        assert!(!stopper.observe(0.1));
        assert!(!stopper.observe(0.2));
        for _ in 0..4 {
            assert!(!stopper.observe(0.2));
        }
        // Fifth consecutive non-improving observation halts.
        assert!(stopper.observe(0.2));
    }

    #[test]
    fn early_stopping_resets_on_new_best() {
        let mut stopper = EarlyStopping::new(5);
        assert!(!stopper.observe(0.5));
        for _ in 0..4 {
            assert!(!stopper.observe(0.4));
        }
        assert!(!stopper.observe(0.6));
        for _ in 0..4 {
            assert!(!stopper.observe(0.6));
        }
        assert!(stopper.observe(0.6));
    }

    #[test]
    fn rejects_mismatched_partitions() {
        let train = synthetic_set(10, 0);
        let other = ImageSet::new(vec![0.0; 2 * 9], vec![0, 1], 3, 3).unwrap();
        assert!(MnistEvaluator::from_source(train, other, CandleDevice::Cpu, 1).is_err());
    }
}
