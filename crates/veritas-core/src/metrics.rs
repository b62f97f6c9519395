//! Running F1 accumulators for episodic training.
//!
//! Confusion counts accumulate across updates within one epoch;
//! [`F1Scores::compute`] reads them out and [`MetricBank::compute_and_reset`]
//! clears the slate for the next epoch. An accumulator that saw no updates
//! reports `None` rather than stale values.
//!
//! Which splits exist is decided once, at construction, by [`SplitLayout`]
//! — trainers declare their layout explicitly instead of being probed for
//! their type at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Data split a metric accumulator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Split {
    Train,
    Val,
    ValSupport,
    ValQuery,
    Test,
}

/// Which splits a trainer tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitLayout {
    /// Episodic trainers: train / val / test.
    Episodic,
    /// Supervised baselines (a plain GAT classifier trained without
    /// episodes) score validation support and query examples separately:
    /// train / val-support / val-query / test. The baseline trainer
    /// lives in the downstream training harness; only the metric
    /// contract is shared here.
    SupportQuery,
}

impl SplitLayout {
    /// Splits tracked under this layout.
    pub fn splits(self) -> &'static [Split] {
        match self {
            SplitLayout::Episodic => &[Split::Train, Split::Val, Split::Test],
            SplitLayout::SupportQuery => &[
                Split::Train,
                Split::ValSupport,
                Split::ValQuery,
                Split::Test,
            ],
        }
    }
}

/// Computed F1 values for one split and epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct F1Report {
    /// F1 per class, indexed by class id.
    pub per_class: Vec<f64>,
    /// Unweighted mean of the per-class F1 values.
    pub macro_f1: f64,
}

/// Per-class confusion counts with F1 readout.
#[derive(Debug, Clone)]
pub struct F1Scores {
    tp: Vec<u64>,
    fp: Vec<u64>,
    fn_: Vec<u64>,
    updates: u64,
}

impl F1Scores {
    /// New accumulator over `num_classes` classes.
    pub fn new(num_classes: usize) -> Self {
        Self {
            tp: vec![0; num_classes],
            fp: vec![0; num_classes],
            fn_: vec![0; num_classes],
            updates: 0,
        }
    }

    /// Number of classes tracked.
    pub fn num_classes(&self) -> usize {
        self.tp.len()
    }

    /// Fold a batch of predictions into the confusion counts.
    pub fn update(&mut self, predictions: &[i64], targets: &[i64]) -> Result<()> {
        if predictions.len() != targets.len() {
            return Err(Error::DimensionMismatch {
                expected: targets.len(),
                got: predictions.len(),
            });
        }
        let num_classes = self.tp.len();
        for (&pred, &target) in predictions.iter().zip(targets) {
            let p = class_index(pred, num_classes)?;
            let t = class_index(target, num_classes)?;
            if p == t {
                self.tp[p] += 1;
            } else {
                self.fp[p] += 1;
                self.fn_[t] += 1;
            }
        }
        self.updates += 1;
        Ok(())
    }

    /// Read out per-class and macro F1, or `None` if nothing was recorded.
    pub fn compute(&self) -> Option<F1Report> {
        if self.updates == 0 {
            return None;
        }
        let per_class: Vec<f64> = (0..self.tp.len())
            .map(|c| {
                let denom = 2 * self.tp[c] + self.fp[c] + self.fn_[c];
                if denom == 0 {
                    0.0
                } else {
                    2.0 * self.tp[c] as f64 / denom as f64
                }
            })
            .collect();
        let macro_f1 = per_class.iter().sum::<f64>() / per_class.len() as f64;
        Some(F1Report { per_class, macro_f1 })
    }

    /// Clear all counts.
    pub fn reset(&mut self) {
        self.tp.fill(0);
        self.fp.fill(0);
        self.fn_.fill(0);
        self.updates = 0;
    }
}

fn class_index(class: i64, num_classes: usize) -> Result<usize> {
    if class < 0 || class as usize >= num_classes {
        return Err(Error::ClassOutOfRange { class, num_classes });
    }
    Ok(class as usize)
}

/// Per-split accumulators, reset at epoch boundaries.
#[derive(Debug)]
pub struct MetricBank {
    splits: BTreeMap<Split, F1Scores>,
}

impl MetricBank {
    /// Build accumulators for every split in the layout.
    pub fn new(layout: SplitLayout, num_classes: usize) -> Self {
        let splits = layout
            .splits()
            .iter()
            .map(|&s| (s, F1Scores::new(num_classes)))
            .collect();
        Self { splits }
    }

    /// Fold predictions into one split's accumulator.
    pub fn update(&mut self, split: Split, predictions: &[i64], targets: &[i64]) -> Result<()> {
        let scores = self
            .splits
            .get_mut(&split)
            .ok_or_else(|| Error::InvalidConfig(format!("split {split:?} not in layout")))?;
        scores.update(predictions, targets)
    }

    /// Epoch-end readout: returns the report and resets the accumulator,
    /// so a following epoch with zero updates reports `None`.
    pub fn compute_and_reset(&mut self, split: Split) -> Result<Option<F1Report>> {
        let scores = self
            .splits
            .get_mut(&split)
            .ok_or_else(|| Error::InvalidConfig(format!("split {split:?} not in layout")))?;
        let report = scores.compute();
        scores.reset();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f1_matches_hand_computation() {
        let mut scores = F1Scores::new(2);
        // class 0: tp=2 fp=1 fn=1 -> f1 = 4/6
        // class 1: tp=1 fp=1 fn=1 -> f1 = 2/4
        scores
            .update(&[0, 0, 0, 1, 1, 0], &[0, 0, 1, 1, 0, 1])
            .unwrap();
        let report = scores.compute().unwrap();
        assert!((report.per_class[0] - 4.0 / 6.0).abs() < 1e-12);
        assert!((report.per_class[1] - 0.5).abs() < 1e-12);
        assert!((report.macro_f1 - (4.0 / 6.0 + 0.5) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn compute_and_reset_clears_state() {
        let mut bank = MetricBank::new(SplitLayout::Episodic, 2);
        bank.update(Split::Train, &[0, 1], &[0, 1]).unwrap();

        let report = bank.compute_and_reset(Split::Train).unwrap();
        assert!(report.is_some());

        // No updates since the reset: the next epoch must not see stale values.
        let report = bank.compute_and_reset(Split::Train).unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn support_query_layout_tracks_validation_halves_separately() {
        let mut bank = MetricBank::new(SplitLayout::SupportQuery, 2);
        bank.update(Split::ValSupport, &[0, 1], &[0, 1]).unwrap();
        bank.update(Split::ValQuery, &[0, 1], &[1, 0]).unwrap();

        let support = bank.compute_and_reset(Split::ValSupport).unwrap().unwrap();
        let query = bank.compute_and_reset(Split::ValQuery).unwrap().unwrap();
        assert!((support.macro_f1 - 1.0).abs() < 1e-12);
        assert!(query.macro_f1.abs() < 1e-12);

        // The plain val split belongs to the episodic layout only.
        let err = bank.update(Split::Val, &[0], &[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn unknown_split_is_rejected() {
        let mut bank = MetricBank::new(SplitLayout::Episodic, 2);
        let err = bank.update(Split::ValSupport, &[0], &[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn out_of_range_class_is_rejected() {
        let mut scores = F1Scores::new(2);
        let err = scores.update(&[3], &[0]).unwrap_err();
        assert!(matches!(err, Error::ClassOutOfRange { class: 3, .. }));
    }
}
