//! Cross-validation driver.
//!
//! For every fold the validator creates a fresh [`ModelHandle`], fits it on
//! the training partition, predicts the validation partition, and computes
//! metrics. The handle and both partitions are owned by that fold's scope and
//! released when it ends, including on the error path. The first failing fold
//! aborts the run and its error is returned unchanged.

use std::marker::PhantomData;

use rayon::prelude::*;
use serde::Serialize;
use tessera_core::Configuration;

use crate::error::MlError;
use crate::metrics::{ClassificationMetrics, ValidationMetrics};
use crate::model::{ModelHandle, Predictor, TrainingParameters};
use crate::splitter::Fold;

/// Per-fold metrics plus their aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport<M> {
    pub folds: Vec<M>,
    pub aggregate: M,
}

impl<M: ValidationMetrics> ValidationReport<M> {
    /// Population standard deviation of each named score across folds.
    pub fn spread(&self) -> Vec<(&'static str, f64)> {
        let per_fold: Vec<Vec<(&'static str, f64)>> =
            self.folds.iter().map(ValidationMetrics::scores).collect();
        self.aggregate
            .scores()
            .into_iter()
            .enumerate()
            .map(|(i, (name, mean))| {
                let n = per_fold.len().max(1) as f64;
                let variance = per_fold
                    .iter()
                    .map(|scores| (scores[i].1 - mean).powi(2))
                    .sum::<f64>()
                    / n;
                (name, variance.sqrt())
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Validator<M = ClassificationMetrics> {
    config: Configuration,
    parallelism: usize,
    _metrics: PhantomData<fn() -> M>,
}

impl<M: ValidationMetrics> Validator<M> {
    /// Create a validator whose parallelism comes from `config`.
    pub fn new(config: &Configuration) -> Self {
        Self {
            config: config.clone(),
            parallelism: config.settings().validation.parallelism.max(1),
            _metrics: PhantomData,
        }
    }

    /// Run up to `parallelism` folds concurrently (1 = sequential).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Validate `parameters` on every fold and return the aggregate metrics.
    pub fn validate<P, I>(&self, folds: I, parameters: &P) -> Result<M, MlError>
    where
        P: TrainingParameters,
        P::Model: Predictor,
        I: IntoIterator<Item = Fold>,
    {
        self.report(folds, parameters).map(|report| report.aggregate)
    }

    /// Validate and keep each fold's metrics alongside the aggregate.
    pub fn report<P, I>(&self, folds: I, parameters: &P) -> Result<ValidationReport<M>, MlError>
    where
        P: TrainingParameters,
        P::Model: Predictor,
        I: IntoIterator<Item = Fold>,
    {
        let outcome: Result<Vec<M>, MlError> = if self.parallelism > 1 {
            self.run_parallel(folds.into_iter().collect(), parameters)
        } else {
            folds
                .into_iter()
                .map(|fold| run_fold::<P, M>(fold, parameters, &self.config))
                .collect()
        };
        let per_fold = outcome.inspect_err(|e| {
            tracing::warn!(kind = P::KIND, error = %e, "Cross-validation aborted");
        })?;

        let aggregate = M::aggregate(&per_fold)?;
        tracing::info!(
            kind = P::KIND,
            folds = per_fold.len(),
            parallelism = self.parallelism,
            scores = ?aggregate.scores(),
            "Cross-validation complete"
        );
        Ok(ValidationReport {
            folds: per_fold,
            aggregate,
        })
    }

    fn run_parallel<P>(&self, folds: Vec<Fold>, parameters: &P) -> Result<Vec<M>, MlError>
    where
        P: TrainingParameters,
        P::Model: Predictor,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .thread_name(|i| format!("tessera-fold-{i}"))
            .build()?;
        // Indexed collect keeps fold order, so results match a sequential run.
        pool.install(|| {
            folds
                .into_par_iter()
                .map(|fold| run_fold::<P, M>(fold, parameters, &self.config))
                .collect()
        })
    }
}

fn run_fold<P, M>(fold: Fold, parameters: &P, config: &Configuration) -> Result<M, MlError>
where
    P: TrainingParameters,
    P::Model: Predictor,
    M: ValidationMetrics,
{
    let Fold {
        index,
        train,
        mut validation,
    } = fold;
    let span = tracing::debug_span!("fold", index, kind = P::KIND);
    let _guard = span.enter();

    let mut handle = ModelHandle::create(parameters.clone(), config);
    handle.fit(&train)?;
    drop(train);

    handle.predict(&mut validation)?;
    let metrics = M::from_predictions(&validation)?;
    tracing::debug!(records = validation.len(), scores = ?metrics.scores(), "Fold complete");

    handle.close();
    validation.close();
    Ok(metrics)
}
