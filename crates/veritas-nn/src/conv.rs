//! Sparse graph-attention layer.
//!
//! Single GAT transformation over an edge list ([Velickovic et al. 2018](https://arxiv.org/abs/1710.10903)),
//! in the edge-softmax formulation used for large sparse social graphs:
//!
//! ```text
//! e_uv   = LeakyReLU(f_t(W h_u) + f_s(W h_v))        per edge (u <- v)
//! α_uv   = exp(e_uv) / Σ_{w in N(u)} exp(e_uw)
//! h_u'   = Σ_v α_uv · W h_v + b
//! ```
//!
//! The input is first passed through a fixed, non-learned square
//! projection; `W` plays the role of a learned 1x1 convolution. Scatter
//! sums per target node are realized as a constant 0/1 incidence-matrix
//! matmul, which keeps the whole layer on plain dense ops.
//!
//! Attention logits are clamped to a fixed bound before `exp` — the edge
//! softmax here is not max-shifted, so an unbounded logit would overflow
//! f32.

use candle_core::{Device, Tensor};
use candle_nn::{linear, linear_no_bias, Init, Linear, Module, VarBuilder};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{Error, Result};

/// Bound on raw attention logits before exponentiation.
const MAX_ATTENTION_LOGIT: f64 = 30.0;

/// Configuration for one attention layer.
#[derive(Debug, Clone)]
pub struct GatLayerConfig {
    /// Input feature dimension.
    pub in_features: usize,
    /// Output feature dimension.
    pub out_features: usize,
    /// Dropout probability on projected features.
    pub dropout: f32,
    /// Dropout probability on attention coefficients.
    pub attn_dropout: f32,
    /// LeakyReLU negative slope for attention logits.
    pub negative_slope: f64,
    /// When false, per-edge values from the batch are used as precomputed
    /// attention logits and no logits are learned.
    pub attn: bool,
    /// Apply an ELU to the aggregated output (hidden layers).
    pub concat: bool,
}

impl Default for GatLayerConfig {
    fn default() -> Self {
        Self {
            in_features: 0,
            out_features: 0,
            dropout: 0.6,
            attn_dropout: 0.6,
            negative_slope: 0.2,
            attn: true,
            concat: false,
        }
    }
}

/// Sparse GAT layer over `(2, E)` edge lists.
pub struct SparseGatLayer {
    /// Fixed square input projection; never trained, identical across
    /// model copies built from the same seed.
    projection: Tensor,
    transform: Linear,
    attn_target: Option<Linear>,
    attn_source: Option<Linear>,
    bias: Tensor,
    cfg: GatLayerConfig,
}

impl SparseGatLayer {
    /// Create a layer.
    ///
    /// Learned parameters are registered through `vb`; the constant
    /// projection is drawn from `rng` so every copy of a model seeded the
    /// same way shares it.
    pub fn new(
        cfg: GatLayerConfig,
        vb: VarBuilder,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        if cfg.in_features == 0 || cfg.out_features == 0 {
            return Err(Error::InvalidConfig(
                "attention layer dimensions must be non-zero".into(),
            ));
        }

        let bound = 1.0 / (cfg.in_features as f32).sqrt();
        let data: Vec<f32> = (0..cfg.in_features * cfg.in_features)
            .map(|_| rng.random_range(-bound..bound))
            .collect();
        let projection = Tensor::from_vec(data, (cfg.in_features, cfg.in_features), device)?;

        let transform = linear_no_bias(cfg.in_features, cfg.out_features, vb.pp("transform"))?;
        let (attn_target, attn_source) = if cfg.attn {
            (
                Some(linear(cfg.out_features, 1, vb.pp("attn_target"))?),
                Some(linear(cfg.out_features, 1, vb.pp("attn_source"))?),
            )
        } else {
            (None, None)
        };
        let bias = vb.get_with_hints(cfg.out_features, "bias", Init::Const(0.0))?;

        Ok(Self { projection, transform, attn_target, attn_source, bias, cfg })
    }

    /// Forward pass.
    ///
    /// - `x`: node features `(N, in_features)`
    /// - `edges`: `(2, E)` u32, row 0 = aggregation target, row 1 = source
    /// - `edge_values`: `(E,)` precomputed logits, required iff `attn = false`
    /// - `train`: enables feature and attention dropout
    pub fn forward(
        &self,
        x: &Tensor,
        edges: &Tensor,
        edge_values: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let num_nodes = x.dims2()?.0;
        let targets = edges.get(0)?;
        let sources = edges.get(1)?;

        let h = x.matmul(&self.projection.t()?)?;
        let fts = self.transform.forward(&h)?; // (N, out)

        let logits = match (&self.attn_target, &self.attn_source) {
            (Some(f_t), Some(f_s)) => {
                let per_target = f_t.forward(&fts)?.squeeze(1)?; // (N,)
                let per_source = f_s.forward(&fts)?.squeeze(1)?;
                let raw = (per_target.index_select(&targets, 0)?
                    + per_source.index_select(&sources, 0)?)?;
                candle_nn::ops::leaky_relu(&raw, self.cfg.negative_slope)?
            }
            _ => edge_values
                .ok_or_else(|| {
                    Error::InvalidConfig(
                        "attention disabled but the batch carries no edge values".into(),
                    )
                })?
                .clone(),
        };

        let coefs = logits
            .clamp(-MAX_ATTENTION_LOGIT, MAX_ATTENTION_LOGIT)?
            .exp()?; // (E,)

        // Degree-wise normalizer per target node, before coefficient dropout.
        let scatter = incidence(&targets, num_nodes)?; // (N, E), constant
        let coef_sum = scatter.matmul(&coefs.unsqueeze(1)?)?; // (N, 1)

        let coefs = maybe_dropout(&coefs, self.cfg.attn_dropout, train)?;
        let fts = maybe_dropout(&fts, self.cfg.dropout, train)?;

        let messages = fts
            .index_select(&sources, 0)?
            .broadcast_mul(&coefs.unsqueeze(1)?)?; // (E, out)
        let aggregated = scatter.matmul(&messages)?; // (N, out)

        let out = aggregated
            .broadcast_div(&(coef_sum + 1e-6)?)?
            .broadcast_add(&self.bias)?;
        if self.cfg.concat {
            Ok(out.elu(1.0)?)
        } else {
            Ok(out)
        }
    }

    /// Output feature dimension.
    pub fn out_features(&self) -> usize {
        self.cfg.out_features
    }
}

fn maybe_dropout(x: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        Ok(candle_nn::ops::dropout(x, p)?)
    } else {
        Ok(x.clone())
    }
}

/// Constant 0/1 incidence matrix `S` with `S[targets[e], e] = 1`, so that
/// `S @ v` scatter-sums per-edge values into their target nodes.
fn incidence(targets: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let device = targets.device().clone();
    let targets = targets.to_vec1::<u32>()?;
    let num_edges = targets.len();
    let mut data = vec![0f32; num_nodes * num_edges];
    for (e, &t) in targets.iter().enumerate() {
        let t = t as usize;
        if t >= num_nodes {
            return Err(Error::InvalidConfig(format!(
                "edge {e} targets node {t}, graph has {num_nodes} nodes"
            )));
        }
        data[t * num_edges + e] = 1.0;
    }
    Ok(Tensor::from_vec(data, (num_nodes, num_edges), &device)?)
}
