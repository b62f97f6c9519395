//! GAT encoder: a two-layer attention stack over collated subgraph batches.
//!
//! The encoder maps every node of a [`SubgraphBatch`] to a `D`-dimensional
//! embedding; [`GatEncoder::encode_centers`] restricts the result to the
//! classification-target nodes, which is the representation the few-shot
//! head operates on.

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use veritas_core::SubgraphBatch;

use crate::conv::{GatLayerConfig, SparseGatLayer};
use crate::error::Result;

/// Encoder hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Input node-feature dimension.
    pub in_dim: usize,
    /// Hidden layer width.
    pub hidden_dim: usize,
    /// Embedding dimension.
    pub out_dim: usize,
    /// Feature dropout probability.
    pub dropout: f32,
    /// Attention-coefficient dropout probability.
    pub attn_dropout: f32,
    /// LeakyReLU negative slope in attention logits.
    pub negative_slope: f64,
    /// Seed for the constant input projections.
    pub seed: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            in_dim: 300,
            hidden_dim: 512,
            out_dim: 64,
            dropout: 0.6,
            attn_dropout: 0.6,
            negative_slope: 0.2,
            seed: 42,
        }
    }
}

/// Two sparse attention layers; the hidden layer applies an ELU.
pub struct GatEncoder {
    hidden: SparseGatLayer,
    output: SparseGatLayer,
}

impl GatEncoder {
    /// Build an encoder, registering learned parameters through `vb`.
    ///
    /// Model copies built from the same config share the constant
    /// projections (they are derived from `cfg.seed`), so only the
    /// registered parameters distinguish two instances.
    pub fn new(cfg: &EncoderConfig, vb: VarBuilder, device: &Device) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let hidden = SparseGatLayer::new(
            GatLayerConfig {
                in_features: cfg.in_dim,
                out_features: cfg.hidden_dim,
                dropout: cfg.dropout,
                attn_dropout: cfg.attn_dropout,
                negative_slope: cfg.negative_slope,
                attn: true,
                concat: true,
            },
            vb.pp("gat1"),
            &mut rng,
            device,
        )?;
        let output = SparseGatLayer::new(
            GatLayerConfig {
                in_features: cfg.hidden_dim,
                out_features: cfg.out_dim,
                dropout: cfg.dropout,
                attn_dropout: cfg.attn_dropout,
                negative_slope: cfg.negative_slope,
                attn: true,
                concat: false,
            },
            vb.pp("gat2"),
            &mut rng,
            device,
        )?;
        Ok(Self { hidden, output })
    }

    /// Per-node embeddings, `(N, out_dim)`.
    pub fn forward(&self, batch: &SubgraphBatch, train: bool) -> Result<Tensor> {
        let h = self
            .hidden
            .forward(&batch.x, &batch.edges, batch.edge_values.as_ref(), train)?;
        self.output
            .forward(&h, &batch.edges, batch.edge_values.as_ref(), train)
    }

    /// Embeddings of the classification-target nodes, `(M, out_dim)`,
    /// in subgraph order.
    pub fn encode_centers(&self, batch: &SubgraphBatch, train: bool) -> Result<Tensor> {
        let all = self.forward(batch, train)?;
        Ok(all.index_select(&batch.centers, 0)?)
    }

    /// Embedding dimension.
    pub fn out_dim(&self) -> usize {
        self.output.out_features()
    }
}
