//! Sparse graph attention and episodic meta-learning.
//!
//! `veritas-nn` holds the model side of the few-shot fake-news detector:
//! a two-layer sparse GAT encoder over document subgraphs, and a ProtoMAML
//! trainer that fine-tunes a per-task copy of the encoder from a handful
//! of labeled examples. It sits on top of the data layer
//! (`veritas-core`).
//!
//! # Modules
//!
//! - [`conv`]: Sparse graph attention layer (edge-list message passing)
//! - [`encoder`]: Two-layer GAT encoder over collated subgraph batches
//! - [`proto`]: Class prototypes and closed-form output-layer init
//! - [`maml`]: ProtoMAML inner/outer loops
//! - [`optim`]: AdamW, inner-loop SGD, multi-step LR schedule
//! - [`eval`]: Few-shot test rounds with mean/std F1 reporting
//!
//! # Example: one meta-training iteration
//!
//! ```rust,ignore
//! use candle_core::Device;
//! use veritas_core::SplitLayout;
//! use veritas_nn::{EncoderConfig, Mode, ProtoMaml, TrainConfig};
//!
//! let device = Device::Cpu;
//! let mut model = ProtoMaml::new(
//!     EncoderConfig::default(),
//!     TrainConfig::default(),
//!     2,
//!     SplitLayout::Episodic,
//!     &device,
//! )?;
//! let loss = model.outer_loop(&tasks, Mode::Train)?;
//! ```

pub mod conv;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod maml;
pub mod optim;
pub mod proto;

pub use conv::{GatLayerConfig, SparseGatLayer};
pub use encoder::{EncoderConfig, GatEncoder};
pub use error::{Error, Result};
pub use eval::{test_protomaml, EvalReport, Summary};
pub use maml::{Adapted, Mode, ProtoMaml, TrainConfig};
pub use proto::{compute_prototypes, prototype_head};
