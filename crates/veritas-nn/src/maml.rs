//! ProtoMAML episodic trainer.
//!
//! Combines prototype-based output-layer initialization with first-order
//! MAML fine-tuning ([Triantafillou et al. 2020](https://arxiv.org/abs/1903.03096)):
//! each task adapts a throwaway copy of the shared encoder on its support
//! set, and the query loss of the adapted copy drives the shared
//! parameters. The output layer is initialized in closed form from class
//! prototypes, which keeps a gradient path from the query loss back to
//! the shared encoder even though the fine-tuned copy is detached.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use veritas_core::{Episode, MetricBank, Split, SplitLayout, Subgraph, SubgraphBatch};

use crate::encoder::{EncoderConfig, GatEncoder};
use crate::error::{Error, Result};
use crate::optim::{sgd_step, AdamW, AdamWConfig, MultiStepLr};
use crate::proto::{class_positions, compute_prototypes, prototype_head};

/// Which phase the trainer is running in.
///
/// Dropout is active only in [`Mode::Train`]; test-time adaptation runs
/// the longer `n_inner_updates_test` schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Val,
    Test,
}

impl Mode {
    /// Dropout and shared-parameter updates are train-only.
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }

    fn split(self) -> Split {
        match self {
            Mode::Train => Split::Train,
            Mode::Val => Split::Val,
            Mode::Test => Split::Test,
        }
    }
}

/// Hyperparameters of the episodic trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Outer-loop AdamW learning rate.
    pub lr: f64,
    /// Inner-loop SGD rate for the copied encoder.
    pub lr_inner: f64,
    /// Inner-loop SGD rate for the prototype-initialized output layer.
    pub lr_output: f64,
    /// Inner updates during training and validation.
    pub n_inner_updates: usize,
    /// Inner updates during test-time adaptation.
    pub n_inner_updates_test: usize,
    /// Outer-loop weight decay.
    pub weight_decay: f64,
    /// Per-class positive weights for the loss, length `n_classes`.
    pub class_weights: Option<Vec<f32>>,
    /// Display names per class id, for metric logging.
    pub label_names: Vec<String>,
    /// Epochs at which the outer learning rate decays.
    pub lr_milestones: Vec<usize>,
    /// Decay factor applied at each milestone.
    pub lr_gamma: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            lr_inner: 0.1,
            lr_output: 0.1,
            n_inner_updates: 5,
            n_inner_updates_test: 200,
            weight_decay: 0.01,
            class_weights: None,
            label_names: vec!["fake".to_string(), "real".to_string()],
            lr_milestones: vec![140, 180],
            lr_gamma: 0.1,
        }
    }
}

/// A task-adapted model: an independent encoder copy plus the reattached
/// output layer.
///
/// `weight` and `bias` are the fine-tuned head values re-expressed as
/// `(tuned - init).detach() + init`, so their forward values equal the
/// fine-tuned ones while the computation graph reaches the *shared*
/// encoder through the prototype initialization.
pub struct Adapted {
    varmap: VarMap,
    encoder: GatEncoder,
    weight: Tensor,
    bias: Tensor,
    /// Class ids in prototype order (ascending).
    pub classes: Vec<i64>,
}

impl Adapted {
    /// Logits `(M, C)` over the batch's center nodes, in `classes` order.
    pub fn logits(&self, batch: &SubgraphBatch, train: bool) -> Result<Tensor> {
        let embeddings = self.encoder.encode_centers(batch, train)?;
        Ok(embeddings
            .matmul(&self.weight.t()?)?
            .broadcast_add(&self.bias)?)
    }

    /// Predicted class ids for the batch's center nodes.
    pub fn predict(&self, batch: &SubgraphBatch) -> Result<Vec<i64>> {
        let logits = self.logits(batch, false)?;
        argmax_classes(&logits, &self.classes)
    }
}

/// The shared model, its optimizer state, and the per-split metric
/// accumulators.
pub struct ProtoMaml {
    cfg: TrainConfig,
    encoder_cfg: EncoderConfig,
    varmap: VarMap,
    encoder: GatEncoder,
    optimizer: AdamW,
    scheduler: MultiStepLr,
    metrics: MetricBank,
    layout: SplitLayout,
    class_weights: Option<Tensor>,
    n_classes: usize,
    device: Device,
}

impl ProtoMaml {
    /// Build the shared encoder and optimizer state on `device`.
    pub fn new(
        encoder_cfg: EncoderConfig,
        cfg: TrainConfig,
        n_classes: usize,
        layout: SplitLayout,
        device: &Device,
    ) -> Result<Self> {
        if n_classes < 2 {
            return Err(Error::InvalidConfig(format!(
                "need at least 2 classes, got {n_classes}"
            )));
        }
        if cfg.label_names.len() != n_classes {
            return Err(Error::InvalidConfig(format!(
                "{} label names for {n_classes} classes",
                cfg.label_names.len()
            )));
        }
        let class_weights = match &cfg.class_weights {
            Some(w) => {
                if w.len() != n_classes {
                    return Err(Error::InvalidConfig(format!(
                        "{} class weights for {n_classes} classes",
                        w.len()
                    )));
                }
                Some(Tensor::from_vec(w.clone(), w.len(), device)?)
            }
            None => None,
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = GatEncoder::new(&encoder_cfg, vb, device)?;
        let optimizer = AdamW::new(AdamWConfig {
            lr: cfg.lr,
            weight_decay: cfg.weight_decay,
            ..Default::default()
        });
        let scheduler = MultiStepLr::new(cfg.lr, cfg.lr_milestones.clone(), cfg.lr_gamma);
        let metrics = MetricBank::new(layout, n_classes);

        Ok(Self {
            cfg,
            encoder_cfg,
            varmap,
            encoder,
            optimizer,
            scheduler,
            metrics,
            layout,
            class_weights,
            n_classes,
            device: device.clone(),
        })
    }

    /// The shared encoder.
    pub fn encoder(&self) -> &GatEncoder {
        &self.encoder
    }

    /// Shared parameters, sorted by name.
    pub fn parameters(&self) -> Vec<(String, Var)> {
        named_vars(&self.varmap)
    }

    /// Overwrite the shared parameters with `other`'s, aligned by name.
    pub fn copy_parameters_from(&mut self, other: &ProtoMaml) -> Result<()> {
        copy_named_vars(&other.varmap, &self.varmap)
    }

    /// Fine-tune a copy of the shared model on one support set.
    ///
    /// Fails with [`Error::MissingClass`] when some class id below
    /// `n_classes` has no support example, which would otherwise produce
    /// a NaN prototype.
    pub fn adapt_few_shot(
        &self,
        support: &[Subgraph],
        support_labels: &[i64],
        mode: Mode,
    ) -> Result<Adapted> {
        for class in 0..self.n_classes as i64 {
            if !support_labels.contains(&class) {
                return Err(Error::MissingClass { class });
            }
        }

        let batch = SubgraphBatch::collate(support)?;
        let support_feats = self.encoder.encode_centers(&batch, mode.is_train())?;
        let (prototypes, classes) = compute_prototypes(&support_feats, support_labels)?;
        let (init_weight, init_bias) = prototype_head(&prototypes)?;

        // Independent copy of the shared model. Fresh variables are
        // registered under the same names, then overwritten value-wise.
        let local_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&local_map, DType::F32, &self.device);
        let local_encoder = GatEncoder::new(&self.encoder_cfg, vb, &self.device)?;
        copy_named_vars(&self.varmap, &local_map)?;

        let output_weight = Var::from_tensor(&init_weight.detach())?;
        let output_bias = Var::from_tensor(&init_bias.detach())?;

        let local_vars = named_vars(&local_map);
        let targets = one_hot(&classes, support_labels, &self.device)?;
        let n_updates = match mode {
            Mode::Test => self.cfg.n_inner_updates_test,
            _ => self.cfg.n_inner_updates,
        };
        for _ in 0..n_updates {
            let feats = local_encoder.encode_centers(&batch, mode.is_train())?;
            let logits = feats
                .matmul(&output_weight.as_tensor().t()?)?
                .broadcast_add(output_bias.as_tensor())?;
            let loss = bce_with_logits(&logits, &targets, self.class_weights.as_ref())?;
            // Each backward yields a fresh gradient store, so there is
            // nothing to zero between steps.
            let grads = loss.backward()?;
            sgd_step(local_vars.iter().map(|(_, v)| v), &grads, self.cfg.lr_inner)?;
            sgd_step([&output_weight, &output_bias], &grads, self.cfg.lr_output)?;
        }

        // Keep the fine-tuned values but route gradients through the
        // prototype initialization back to the shared encoder.
        let weight = ((output_weight.as_tensor() - &init_weight)?.detach() + &init_weight)?;
        let bias = ((output_bias.as_tensor() - &init_bias)?.detach() + &init_bias)?;

        Ok(Adapted {
            varmap: local_map,
            encoder: local_encoder,
            weight,
            bias,
            classes,
        })
    }

    /// One meta-iteration over a batch of tasks.
    ///
    /// Task gradients are summed, not averaged, so the effective outer
    /// step grows with the task-batch size. In train mode exactly one
    /// optimizer step is applied after the last task; in val/test mode
    /// the shared parameters are left untouched. Returns the mean query
    /// loss.
    pub fn outer_loop(&mut self, tasks: &[Episode], mode: Mode) -> Result<f32> {
        if tasks.is_empty() {
            return Err(Error::InvalidConfig("outer loop over zero tasks".into()));
        }

        let shared = named_vars(&self.varmap);
        let mut accum: HashMap<String, Tensor> = HashMap::new();
        let mut total_loss = 0f32;

        for (task, episode) in tasks.iter().enumerate() {
            let (support_graphs, support_labels) = episode.support();
            let (query_graphs, query_labels) = episode.query();

            let adapted = self.adapt_few_shot(support_graphs, support_labels, mode)?;

            let query_batch = SubgraphBatch::collate(query_graphs)?;
            let logits = adapted.logits(&query_batch, mode.is_train())?;
            let targets = one_hot(&adapted.classes, query_labels, &self.device)?;
            let loss = bce_with_logits(&logits, &targets, self.class_weights.as_ref())?;

            let loss_value = loss.to_scalar::<f32>()?;
            if !loss_value.is_finite() {
                return Err(Error::NonFiniteLoss { task });
            }
            total_loss += loss_value;

            let predictions = argmax_classes(&logits, &adapted.classes)?;
            self.metrics.update(mode.split(), &predictions, query_labels)?;

            if mode.is_train() {
                let grads = loss.backward()?;
                let local = named_vars(&adapted.varmap);
                // First-order accumulation: the prototype path hits the
                // shared variables directly, the fine-tuning path hits the
                // local copies; aligned by name, added when both exist.
                for ((name, shared_var), (_, local_var)) in shared.iter().zip(local.iter()) {
                    let Some(proto_grad) = grads.get(shared_var.as_tensor()) else {
                        continue;
                    };
                    let grad = match grads.get(local_var.as_tensor()) {
                        Some(local_grad) => (proto_grad + local_grad)?,
                        None => proto_grad.clone(),
                    };
                    let grad = match accum.remove(name) {
                        Some(prev) => (prev + grad)?,
                        None => grad,
                    };
                    accum.insert(name.clone(), grad);
                }
            }
        }

        let mean_loss = total_loss / tasks.len() as f32;
        if mode.is_train() {
            self.optimizer.step(&shared, &accum)?;
        }
        tracing::debug!(
            split = ?mode.split(),
            tasks = tasks.len(),
            loss = mean_loss,
            "outer loop"
        );
        Ok(mean_loss)
    }

    /// Epoch boundary: log and reset every tracked metric, then move the
    /// learning-rate schedule forward.
    ///
    /// Returns the per-split reports; splits that saw no update this
    /// epoch are omitted.
    pub fn end_epoch(&mut self, epoch: usize) -> Result<Vec<(Split, veritas_core::F1Report)>> {
        let mut reports = Vec::new();
        for &split in self.layout.splits() {
            if let Some(report) = self.metrics.compute_and_reset(split)? {
                for (class, f1) in report.per_class.iter().enumerate() {
                    tracing::info!(
                        epoch,
                        ?split,
                        label = self.cfg.label_names[class].as_str(),
                        f1,
                        "epoch f1"
                    );
                }
                tracing::info!(epoch, ?split, macro_f1 = report.macro_f1, "epoch macro f1");
                reports.push((split, report));
            }
        }
        self.optimizer.set_lr(self.scheduler.lr_at(epoch + 1));
        Ok(reports)
    }

    /// Number of classes the trainer was built for.
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Device the model lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Snapshot of a `VarMap`, sorted by name for stable alignment.
fn named_vars(map: &VarMap) -> Vec<(String, Var)> {
    let data = map.data().lock().unwrap();
    let mut vars: Vec<_> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

/// Value-copy every variable in `src` onto its namesake in `dst`.
fn copy_named_vars(src: &VarMap, dst: &VarMap) -> Result<()> {
    let src_vars = named_vars(src);
    let dst_vars = named_vars(dst);
    if src_vars.len() != dst_vars.len() {
        return Err(Error::DimensionMismatch {
            expected: src_vars.len(),
            got: dst_vars.len(),
        });
    }
    for ((src_name, src_var), (dst_name, dst_var)) in src_vars.iter().zip(dst_vars.iter()) {
        if src_name != dst_name {
            return Err(Error::InvalidConfig(format!(
                "parameter name mismatch: {src_name} vs {dst_name}"
            )));
        }
        dst_var.set(src_var.as_tensor())?;
    }
    Ok(())
}

/// One-hot targets `(M, C)` in prototype class order.
fn one_hot(classes: &[i64], labels: &[i64], device: &Device) -> Result<Tensor> {
    let positions = class_positions(classes, labels)?;
    let num_classes = classes.len();
    let mut data = vec![0f32; labels.len() * num_classes];
    for (row, &col) in positions.iter().enumerate() {
        data[row * num_classes + col] = 1.0;
    }
    Ok(Tensor::from_vec(data, (labels.len(), num_classes), device)?)
}

/// Row-wise argmax mapped back to class ids.
fn argmax_classes(logits: &Tensor, classes: &[i64]) -> Result<Vec<i64>> {
    let indices = logits.argmax(1)?.to_vec1::<u32>()?;
    Ok(indices.iter().map(|&i| classes[i as usize]).collect())
}

/// Numerically stable binary cross-entropy with logits over one-hot
/// targets, with optional per-class positive weights.
///
/// Uses `log sigmoid(x) = min(x, 0) - ln(1 + e^(-|x|))`, which never
/// exponentiates a positive value.
pub(crate) fn bce_with_logits(
    logits: &Tensor,
    targets: &Tensor,
    pos_weight: Option<&Tensor>,
) -> Result<Tensor> {
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let log_sig = (logits.minimum(0f64)? - &softplus)?;
    let log_one_minus_sig = (logits.neg()?.minimum(0f64)? - &softplus)?;

    let positive = (targets * &log_sig)?;
    let positive = match pos_weight {
        Some(w) => positive.broadcast_mul(w)?,
        None => positive,
    };
    let negative = (targets.affine(-1.0, 1.0)? * &log_one_minus_sig)?;

    Ok((positive + negative)?.neg()?.mean_all()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn bce_matches_hand_computation() {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(vec![0f32, 0.0], (1, 2), &device).unwrap();
        let targets = Tensor::from_vec(vec![1f32, 0.0], (1, 2), &device).unwrap();
        // sigmoid(0) = 0.5 on both entries: every term is ln 2.
        let loss = bce_with_logits(&logits, &targets, None).unwrap();
        assert!(close(loss.to_scalar::<f32>().unwrap(), 2f32.ln()));
    }

    #[test]
    fn bce_is_finite_for_extreme_logits() {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(vec![80f32, -80.0], (1, 2), &device).unwrap();
        let targets = Tensor::from_vec(vec![0f32, 1.0], (1, 2), &device).unwrap();
        let loss = bce_with_logits(&logits, &targets, None)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite());
        // Both entries are maximally wrong: loss is about 80.
        assert!(loss > 70.0);
    }

    #[test]
    fn bce_pos_weight_scales_positive_term() {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(vec![0f32, 0.0], (1, 2), &device).unwrap();
        let targets = Tensor::from_vec(vec![1f32, 1.0], (1, 2), &device).unwrap();
        let weights = Tensor::from_vec(vec![3f32, 1.0], 2, &device).unwrap();
        let loss = bce_with_logits(&logits, &targets, Some(&weights)).unwrap();
        // Positive terms ln 2 weighted 3 and 1, averaged over 2 entries.
        assert!(close(loss.to_scalar::<f32>().unwrap(), 2.0 * 2f32.ln()));
    }

    #[test]
    fn one_hot_follows_prototype_order() {
        let device = Device::Cpu;
        let onehot = one_hot(&[0, 1], &[1, 0, 1], &device).unwrap();
        let rows = onehot.to_vec2::<f32>().unwrap();
        assert_eq!(rows, vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn one_hot_rejects_unknown_label() {
        let device = Device::Cpu;
        assert!(matches!(
            one_hot(&[0, 1], &[2], &device),
            Err(Error::MissingClass { class: 2 })
        ));
    }
}
