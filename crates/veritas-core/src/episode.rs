//! Few-shot episodes and held-out evaluation batches.
//!
//! An [`Episode`] is one meta-learning task: a sequence of labeled
//! subgraphs that the trainer splits into a support half (used to adapt)
//! and a query half (used to score the adaptation). The split is
//! positional and deterministic — first half support, second half query —
//! so feature and label ordering stay aligned.

use crate::batch::Subgraph;
use crate::error::{Error, Result};

/// One few-shot task: labeled subgraphs splittable into support/query.
#[derive(Debug, Clone)]
pub struct Episode {
    graphs: Vec<Subgraph>,
    labels: Vec<i64>,
}

impl Episode {
    /// Create an episode; graphs and labels must be parallel and the
    /// episode must have at least one example per half.
    pub fn new(graphs: Vec<Subgraph>, labels: Vec<i64>) -> Result<Self> {
        if graphs.len() != labels.len() {
            return Err(Error::DimensionMismatch {
                expected: graphs.len(),
                got: labels.len(),
            });
        }
        if graphs.len() < 2 {
            return Err(Error::InvalidConfig(
                "an episode needs at least one support and one query example".into(),
            ));
        }
        Ok(Self { graphs, labels })
    }

    /// Support half: the first `len / 2` examples.
    pub fn support(&self) -> (&[Subgraph], &[i64]) {
        let mid = self.graphs.len() / 2;
        (&self.graphs[..mid], &self.labels[..mid])
    }

    /// Query half: everything after the support half.
    pub fn query(&self) -> (&[Subgraph], &[i64]) {
        let mid = self.graphs.len() / 2;
        (&self.graphs[mid..], &self.labels[mid..])
    }

    /// Total number of examples.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Whether the episode is empty (never true for a constructed episode).
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

/// One test-loader batch: pre-split support and query examples.
///
/// During leave-one-batch-out evaluation a batch serves once as the
/// adaptation support set and otherwise contributes all of its examples
/// (support and query alike) to the query pool of other rounds.
#[derive(Debug, Clone)]
pub struct EvalBatch {
    /// Support-side subgraphs.
    pub support: Vec<Subgraph>,
    /// Query-side subgraphs.
    pub query: Vec<Subgraph>,
    /// Labels parallel to `support`.
    pub support_labels: Vec<i64>,
    /// Labels parallel to `query`.
    pub query_labels: Vec<i64>,
}

impl EvalBatch {
    /// Create an evaluation batch, validating that labels are parallel.
    pub fn new(
        support: Vec<Subgraph>,
        query: Vec<Subgraph>,
        support_labels: Vec<i64>,
        query_labels: Vec<i64>,
    ) -> Result<Self> {
        if support.len() != support_labels.len() {
            return Err(Error::DimensionMismatch {
                expected: support.len(),
                got: support_labels.len(),
            });
        }
        if query.len() != query_labels.len() {
            return Err(Error::DimensionMismatch {
                expected: query.len(),
                got: query_labels.len(),
            });
        }
        Ok(Self { support, query, support_labels, query_labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    fn dummy_graph() -> Subgraph {
        let device = Device::Cpu;
        let features = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
        let edges = Tensor::from_vec(vec![0u32, 1, 0, 1], (2, 2), &device).unwrap();
        Subgraph::new(features, edges, None, vec![0]).unwrap()
    }

    #[test]
    fn split_is_disjoint_and_deterministic() {
        let graphs = (0..6).map(|_| dummy_graph()).collect();
        let episode = Episode::new(graphs, vec![0, 1, 0, 1, 0, 1]).unwrap();

        let (support, support_labels) = episode.support();
        let (query, query_labels) = episode.query();
        assert_eq!(support.len(), 3);
        assert_eq!(query.len(), 3);
        assert_eq!(support_labels, &[0, 1, 0]);
        assert_eq!(query_labels, &[1, 0, 1]);
    }

    #[test]
    fn odd_episode_gives_query_the_extra_example() {
        let graphs = (0..5).map(|_| dummy_graph()).collect();
        let episode = Episode::new(graphs, vec![0, 1, 0, 1, 0]).unwrap();
        assert_eq!(episode.support().0.len(), 2);
        assert_eq!(episode.query().0.len(), 3);
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let graphs = (0..4).map(|_| dummy_graph()).collect();
        let err = Episode::new(graphs, vec![0, 1]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
