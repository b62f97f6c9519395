//! Few-shot test-time evaluation.
//!
//! Every test batch takes one turn as the support set: the model is
//! fine-tuned on it with the long test-time schedule, then scored on the
//! pooled examples of all *other* batches. Reporting mean and sample
//! standard deviation across rounds captures how sensitive the method is
//! to which handful of labeled examples it was given.

use std::time::{Duration, Instant};

use serde::Serialize;
use veritas_core::{EvalBatch, F1Scores, SubgraphBatch};

use crate::error::{Error, Result};
use crate::maml::{Mode, ProtoMaml};

/// Mean and sample standard deviation over evaluation rounds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
}

/// Cross-round F1 statistics for a binary fake/real classifier.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub f1_fake: Summary,
    pub f1_real: Summary,
    pub f1_macro: Summary,
    /// Number of support rounds, one per test batch.
    pub rounds: usize,
    /// Wall time of the whole evaluation.
    pub elapsed: Duration,
}

/// Evaluate a trained model over every few-shot round of the test set.
///
/// Each batch serves once as the support set; the query pool of a round
/// is the support *and* query examples of every other batch, so the
/// round's own labeled examples are never scored. Needs at least two
/// batches, otherwise there is no query pool and no variance to report.
pub fn test_protomaml(model: &ProtoMaml, batches: &[EvalBatch]) -> Result<EvalReport> {
    if model.n_classes() != 2 {
        return Err(Error::InvalidConfig(format!(
            "fake/real evaluation needs 2 classes, model has {}",
            model.n_classes()
        )));
    }
    if batches.len() < 2 {
        return Err(Error::InsufficientRounds { got: batches.len() });
    }

    let start = Instant::now();
    let mut f1_fake = Vec::with_capacity(batches.len());
    let mut f1_real = Vec::with_capacity(batches.len());
    let mut f1_macro = Vec::with_capacity(batches.len());

    for (round, support_round) in batches.iter().enumerate() {
        let adapted = model.adapt_few_shot(
            &support_round.support,
            &support_round.support_labels,
            Mode::Test,
        )?;

        let mut scores = F1Scores::new(model.n_classes());
        for (other, batch) in batches.iter().enumerate() {
            if other == round {
                continue;
            }
            let pooled = SubgraphBatch::collate(batch.support.iter().chain(batch.query.iter()))?;
            let predictions = adapted.predict(&pooled)?;
            let mut targets = batch.support_labels.clone();
            targets.extend_from_slice(&batch.query_labels);
            scores.update(&predictions, &targets)?;
        }

        let report = scores
            .compute()
            .ok_or_else(|| Error::InvalidConfig("evaluation round saw no queries".into()))?;
        tracing::debug!(round, macro_f1 = report.macro_f1, "few-shot round");
        f1_fake.push(report.per_class[0]);
        f1_real.push(report.per_class[1]);
        f1_macro.push(report.macro_f1);
    }

    let report = EvalReport {
        f1_fake: summarize(&f1_fake),
        f1_real: summarize(&f1_real),
        f1_macro: summarize(&f1_macro),
        rounds: batches.len(),
        elapsed: start.elapsed(),
    };
    tracing::info!(
        rounds = report.rounds,
        f1_macro_mean = report.f1_macro.mean,
        f1_macro_std = report.f1_macro.std,
        elapsed_s = report.elapsed.as_secs_f64(),
        "few-shot evaluation"
    );
    Ok(report)
}

/// Mean and sample standard deviation (n - 1 denominator).
fn summarize(values: &[f64]) -> Summary {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Summary {
        mean,
        std: variance.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_matches_hand_computation() {
        let s = summarize(&[1.0, 2.0, 3.0]);
        assert!((s.mean - 2.0).abs() < 1e-12);
        assert!((s.std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn summary_of_constant_rounds_has_zero_std() {
        let s = summarize(&[0.5, 0.5, 0.5, 0.5]);
        assert!((s.mean - 0.5).abs() < 1e-12);
        assert!(s.std.abs() < 1e-12);
    }
}
