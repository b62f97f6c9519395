//! Optimizers with explicit, name-keyed state.
//!
//! Meta-learning juggles gradients from many short-lived model copies, so
//! the optimizers here work on `(name, Var)` sequences and name-keyed
//! gradient maps instead of owning the parameters: the trainer decides
//! which gradients reach which variables.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use crate::error::Result;

/// One plain SGD step on every variable that received a gradient.
///
/// Variables absent from `grads` are left alone, which matches how a
/// partially-connected graph behaves: a parameter the loss never touched
/// simply keeps its value.
pub fn sgd_step<'a, I>(vars: I, grads: &GradStore, lr: f64) -> Result<()>
where
    I: IntoIterator<Item = &'a Var>,
{
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            var.set(&(var.as_tensor() - (grad * lr)?)?)?;
        }
    }
    Ok(())
}

/// AdamW hyperparameters ([Loshchilov & Hutter 2019](https://arxiv.org/abs/1711.05101)).
#[derive(Debug, Clone)]
pub struct AdamWConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

/// AdamW over named variables; first and second moments are kept in an
/// arena keyed by parameter name, so the variables themselves stay plain
/// value buffers that can be snapshot-copied per task.
pub struct AdamW {
    cfg: AdamWConfig,
    steps: i32,
    moments: HashMap<String, (Tensor, Tensor)>,
}

impl AdamW {
    /// New optimizer with empty state.
    pub fn new(cfg: AdamWConfig) -> Self {
        Self { cfg, steps: 0, moments: HashMap::new() }
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        self.cfg.lr
    }

    /// Override the learning rate (used by the schedule).
    pub fn set_lr(&mut self, lr: f64) {
        self.cfg.lr = lr;
    }

    /// One decoupled-weight-decay Adam step.
    ///
    /// Parameters without an entry in `grads` are left untouched, state
    /// included.
    pub fn step(&mut self, vars: &[(String, Var)], grads: &HashMap<String, Tensor>) -> Result<()> {
        self.steps += 1;
        let c = &self.cfg;
        let bias1 = 1.0 - c.beta1.powi(self.steps);
        let bias2 = 1.0 - c.beta2.powi(self.steps);

        for (name, var) in vars {
            let Some(grad) = grads.get(name) else { continue };

            let (m, v) = match self.moments.remove(name) {
                Some(state) => state,
                None => (grad.zeros_like()?, grad.zeros_like()?),
            };
            let m = ((m * c.beta1)? + (grad * (1.0 - c.beta1))?)?;
            let v = ((v * c.beta2)? + (grad.sqr()? * (1.0 - c.beta2))?)?;

            let m_hat = (&m / bias1)?;
            let v_hat = (&v / bias2)?;
            let update = (&m_hat / &(v_hat.sqrt()? + c.eps)?)?;

            let decayed = (var.as_tensor() * (1.0 - c.lr * c.weight_decay))?;
            var.set(&(decayed - (update * c.lr)?)?)?;

            self.moments.insert(name.clone(), (m, v));
        }
        Ok(())
    }
}

/// Multi-step learning-rate decay: the base rate is multiplied by `gamma`
/// at every milestone epoch.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self { base_lr, milestones, gamma }
    }

    /// Learning rate in effect at `epoch`.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base_lr * self.gamma.powi(passed as i32)
    }
}
