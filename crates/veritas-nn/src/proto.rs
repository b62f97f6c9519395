//! Class prototypes and the prototype-initialized linear head.
//!
//! Prototypical networks ([Snell et al. 2017](https://arxiv.org/abs/1703.05175))
//! represent each class by the mean embedding of its support examples.
//! A linear layer with
//!
//! ```text
//! W = 2 · P        b_c = -||p_c||²
//! ```
//!
//! produces logits `2·p_c·x - ||p_c||² = ||x||² - ||x - p_c||²` up to a
//! shared `||x||²` term, so its initial decision boundary is exactly
//! nearest-prototype classification. ProtoMAML fine-tunes from there.
//!
//! The per-class mean is a constant (1/count) assignment-matrix matmul,
//! so gradients flow from the prototypes back into the embeddings.

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Mean support embedding per class.
///
/// Returns `(prototypes, classes)` where `prototypes` is `(C, D)` and
/// `classes` lists the distinct labels present, ascending; row `i` of the
/// prototypes belongs to `classes[i]`. Every class in `classes` has at
/// least one support example by construction, so no prototype is NaN.
pub fn compute_prototypes(embeddings: &Tensor, labels: &[i64]) -> Result<(Tensor, Vec<i64>)> {
    let (num_examples, _dim) = embeddings.dims2()?;
    if labels.len() != num_examples {
        return Err(Error::DimensionMismatch {
            expected: num_examples,
            got: labels.len(),
        });
    }
    if labels.is_empty() {
        return Err(Error::InvalidConfig("cannot build prototypes from an empty support set".into()));
    }

    let mut classes: Vec<i64> = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();

    // Assignment matrix (C, M): row c holds 1/|class c| at its members.
    let mut assign = vec![0f32; classes.len() * num_examples];
    for (row, &class) in classes.iter().enumerate() {
        let count = labels.iter().filter(|&&l| l == class).count();
        for (col, &label) in labels.iter().enumerate() {
            if label == class {
                assign[row * num_examples + col] = 1.0 / count as f32;
            }
        }
    }
    let assign = Tensor::from_vec(assign, (classes.len(), num_examples), embeddings.device())?;

    Ok((assign.matmul(embeddings)?, classes))
}

/// Closed-form head initialization from prototypes:
/// `weight = 2 · prototypes`, `bias = -||prototype||²` per class.
pub fn prototype_head(prototypes: &Tensor) -> Result<(Tensor, Tensor)> {
    let weight = (prototypes * 2.0)?;
    let bias = prototypes.sqr()?.sum(1)?.neg()?;
    Ok((weight, bias))
}

/// Map raw labels to their row in the prototype/class ordering.
pub(crate) fn class_positions(classes: &[i64], labels: &[i64]) -> Result<Vec<usize>> {
    labels
        .iter()
        .map(|label| {
            classes
                .iter()
                .position(|c| c == label)
                .ok_or(Error::MissingClass { class: *label })
        })
        .collect()
}
