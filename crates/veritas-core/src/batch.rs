//! Sampled subgraphs and episode-side collation.
//!
//! The sampling pipeline hands the learning core one [`Subgraph`] per
//! document: the document's node neighborhood, its edges, and the indices
//! of the nodes that carry a classification target (the "center" nodes).
//! [`SubgraphBatch::collate`] merges a sequence of subgraphs into a single
//! disjoint-union graph so one encoder forward pass covers a whole
//! support or query set.
//!
//! Edge convention: `edges` is a `(2, E)` u32 tensor where row 0 holds the
//! aggregation-target node of each edge and row 1 the message source.

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// One sampled subgraph around a classification target.
#[derive(Debug, Clone)]
pub struct Subgraph {
    /// Node features, `(N, F)` f32.
    pub features: Tensor,
    /// Edge index, `(2, E)` u32; row 0 = target, row 1 = source.
    pub edges: Tensor,
    /// Optional per-edge weights, `(E,)` f32. Consumed as precomputed
    /// attention logits by layers running with attention disabled.
    pub edge_values: Option<Tensor>,
    /// Indices of the classification-target nodes.
    pub centers: Vec<usize>,
}

impl Subgraph {
    /// Create a subgraph, validating shapes against each other.
    pub fn new(
        features: Tensor,
        edges: Tensor,
        edge_values: Option<Tensor>,
        centers: Vec<usize>,
    ) -> Result<Self> {
        let (num_nodes, _) = features.dims2()?;
        let (two, num_edges) = edges.dims2()?;
        if two != 2 {
            return Err(Error::DimensionMismatch { expected: 2, got: two });
        }
        if let Some(values) = &edge_values {
            let len = values.dims1()?;
            if len != num_edges {
                return Err(Error::DimensionMismatch { expected: num_edges, got: len });
            }
        }
        for row in &edges.to_vec2::<u32>()? {
            for &i in row {
                if i as usize >= num_nodes {
                    return Err(Error::InvalidConfig(format!(
                        "edge index {i} out of range for {num_nodes} nodes"
                    )));
                }
            }
        }
        if centers.is_empty() {
            return Err(Error::InvalidConfig("subgraph has no center node".into()));
        }
        for &c in &centers {
            if c >= num_nodes {
                return Err(Error::InvalidConfig(format!(
                    "center index {c} out of range for {num_nodes} nodes"
                )));
            }
        }
        Ok(Self { features, edges, edge_values, centers })
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> Result<usize> {
        Ok(self.features.dims2()?.0)
    }

    /// Feature dimension.
    pub fn feature_dim(&self) -> Result<usize> {
        Ok(self.features.dims2()?.1)
    }
}

/// A disjoint union of subgraphs, ready for one encoder forward pass.
#[derive(Debug, Clone)]
pub struct SubgraphBatch {
    /// Stacked node features, `(N, F)`.
    pub x: Tensor,
    /// Offset edge index, `(2, E)` u32.
    pub edges: Tensor,
    /// Offset per-edge weights, `(E,)`, present iff every member had them.
    pub edge_values: Option<Tensor>,
    /// Offset center-node indices, `(M,)` u32, in subgraph order.
    pub centers: Tensor,
}

impl SubgraphBatch {
    /// Collate subgraphs into one batch graph.
    ///
    /// Node features are stacked; edge and center indices are shifted by
    /// the running node count so members stay disconnected from each
    /// other. Fails on an empty sequence or mismatched feature dims.
    pub fn collate<'a, I>(graphs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Subgraph>,
    {
        let graphs: Vec<&Subgraph> = graphs.into_iter().collect();
        let first = graphs
            .first()
            .ok_or_else(|| Error::EmptyBatch("collate called with no subgraphs".into()))?;
        let device: Device = first.features.device().clone();
        let feature_dim = first.feature_dim()?;

        let mut features: Vec<&Tensor> = Vec::with_capacity(graphs.len());
        let mut targets: Vec<u32> = Vec::new();
        let mut sources: Vec<u32> = Vec::new();
        let mut values: Vec<Tensor> = Vec::new();
        let mut centers: Vec<u32> = Vec::new();
        let mut offset = 0u32;

        for graph in &graphs {
            let dim = graph.feature_dim()?;
            if dim != feature_dim {
                return Err(Error::DimensionMismatch { expected: feature_dim, got: dim });
            }
            features.push(&graph.features);

            let edges = graph.edges.to_vec2::<u32>()?;
            targets.extend(edges[0].iter().map(|&t| t + offset));
            sources.extend(edges[1].iter().map(|&s| s + offset));
            if let Some(v) = &graph.edge_values {
                values.push(v.clone());
            }
            centers.extend(graph.centers.iter().map(|&c| c as u32 + offset));

            offset += graph.num_nodes()? as u32;
        }

        // Per-edge weights are all-or-nothing across the batch.
        let edge_values = if values.is_empty() {
            None
        } else if values.len() == graphs.len() {
            let refs: Vec<&Tensor> = values.iter().collect();
            Some(Tensor::cat(&refs, 0)?)
        } else {
            return Err(Error::InvalidConfig(
                "some subgraphs carry edge values and some do not".into(),
            ));
        };

        let num_edges = targets.len();
        let mut edge_data = targets;
        edge_data.extend_from_slice(&sources);
        let edges = Tensor::from_vec(edge_data, (2, num_edges), &device)?;
        let num_centers = centers.len();
        let centers = Tensor::from_vec(centers, num_centers, &device)?;

        Ok(Self { x: Tensor::cat(&features, 0)?, edges, edge_values, centers })
    }

    /// Total node count.
    pub fn num_nodes(&self) -> Result<usize> {
        Ok(self.x.dims2()?.0)
    }

    /// Number of classification targets in the batch.
    pub fn num_centers(&self) -> Result<usize> {
        Ok(self.centers.dims1()?)
    }
}
