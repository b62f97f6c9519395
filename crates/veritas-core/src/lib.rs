//! Episodic data contracts for few-shot learning on social subgraphs.
//!
//! `veritas-core` owns the data model shared between the graph sampling
//! pipeline (an external collaborator) and the meta-learning core in
//! `veritas-nn`:
//!
//! - [`batch`]: sampled subgraphs and their collation into one
//!   disjoint-union graph per episode side
//! - [`episode`]: support/query tasks and held-out evaluation batches
//! - [`metrics`]: running per-class / macro F1 accumulators
//!
//! The crate deliberately knows nothing about datasets, file formats or
//! model architectures — it only carries tensors, labels and split
//! bookkeeping between the two sides.

pub mod batch;
pub mod episode;
pub mod error;
pub mod metrics;

pub use batch::{Subgraph, SubgraphBatch};
pub use episode::{Episode, EvalBatch};
pub use error::{Error, Result};
pub use metrics::{F1Report, F1Scores, MetricBank, Split, SplitLayout};
