// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Metric-learning building blocks for SpiralTorch.
//!
//! The crate mines anchor/positive/negative triplets out of a batch that is
//! grouped by identity, evaluates a squared-Euclidean margin loss over them
//! and routes the per-triplet gradients back onto the original batch rows.
//!
//! The stages run in a fixed order per training step:
//!
//! ```text
//! EmbeddingBatch -> TripletSampler -> TripletMarginLoss::forward
//!                -> TripletMarginLoss::backward -> GradientScatter
//! ```
//!
//! [`TripletHead`] wires the stages together for hosts that only want a
//! setup / forward / backward surface.

pub mod batch;
pub mod config;
pub mod error;
pub mod head;
pub mod loss;
pub mod sampler;
pub mod scatter;

pub use batch::EmbeddingBatch;
pub use config::TripletConfig;
pub use error::{MetricError, MetricResult, Role};
pub use head::TripletHead;
pub use loss::{RoleGradients, RoleMask, TripletMarginLoss};
pub use sampler::{Triple, TripleSet, TripletSampler, TripletSelection};
pub use scatter::GradientScatter;

pub use st_tensor::{PureResult, Tensor, TensorError};
