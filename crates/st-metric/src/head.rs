// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::batch::EmbeddingBatch;
use crate::config::TripletConfig;
use crate::error::{MetricError, MetricResult};
use crate::loss::{RoleMask, TripletMarginLoss};
use crate::sampler::{TripletSampler, TripletSelection};
use crate::scatter::GradientScatter;
use st_tensor::Tensor;
use tracing::{debug, info};

/// Sampler, margin loss and gradient scatter composed behind the
/// setup / forward / backward surface a graph engine drives.
///
/// ```text
/// head.setup(N, D)
/// loop {
///     let loss = head.forward(&embeddings)?;   // N x D -> scalar
///     let grad = head.backward(loss_weight)?;  // -> N x D
/// }
/// ```
#[derive(Debug)]
pub struct TripletHead {
    config: TripletConfig,
    sampler: TripletSampler,
    loss: TripletMarginLoss,
    shape: Option<(usize, usize)>,
}

impl TripletHead {
    pub fn new(config: TripletConfig) -> MetricResult<Self> {
        config.validate()?;
        let sampler = TripletSampler::with_seed(config.group_size, config.seed)?;
        let loss = TripletMarginLoss::new(config.margin)?;
        Ok(Self {
            config,
            sampler,
            loss,
            shape: None,
        })
    }

    pub fn config(&self) -> &TripletConfig {
        &self.config
    }

    /// Validates the batch shape and sizes every internal buffer. Calling it
    /// again with the same shape keeps the buffers.
    pub fn setup(&mut self, batch_size: usize, dim: usize) -> MetricResult<()> {
        self.sampler.prepare(batch_size, dim)?;
        if self.shape != Some((batch_size, dim)) {
            self.loss.reset();
            self.shape = Some((batch_size, dim));
            info!(
                batch_size,
                dim,
                group_size = self.config.group_size,
                margin = self.config.margin,
                triples = self.sampler.output_size(),
                "triplet head configured"
            );
        }
        Ok(())
    }

    /// Mines triples from `embeddings` and returns the summed margin loss.
    pub fn forward(&mut self, embeddings: &Tensor) -> MetricResult<f32> {
        let shape = self.shape.ok_or(MetricError::PrecedenceViolation {
            stage: "forward",
            requires: "setup",
        })?;
        if embeddings.shape() != shape {
            self.loss.reset();
            return Err(MetricError::shape("embedding batch", shape, embeddings.shape()));
        }
        let batch = EmbeddingBatch::new(embeddings, self.config.group_size)?;
        let selection = match self.sampler.sample(&batch) {
            Ok(selection) => selection,
            Err(err) => {
                self.loss.reset();
                return Err(err);
            }
        };
        self.loss.forward_selection(selection)
    }

    /// Gradient of `loss_weight * L` with respect to the embeddings of the
    /// last forward, shaped like the batch.
    pub fn backward(&self, loss_weight: f32) -> MetricResult<Tensor> {
        self.backward_with_mask(loss_weight, RoleMask::ALL)
    }

    /// Like [`backward`](Self::backward) but only routes the roles in `mask`.
    pub fn backward_with_mask(&self, loss_weight: f32, mask: RoleMask) -> MetricResult<Tensor> {
        let (Some((batch_size, dim)), Some(selection)) = (self.shape, self.sampler.selection())
        else {
            return Err(MetricError::PrecedenceViolation {
                stage: "backward",
                requires: "forward",
            });
        };
        let grads = self.loss.backward(loss_weight, mask)?;
        let grad = GradientScatter::new(batch_size, dim).scatter(&grads, selection.triples())?;
        debug!(
            loss_weight,
            grad_norm = grad.squared_l2_norm().sqrt(),
            "triplet head backward"
        );
        Ok(grad)
    }

    /// Triples and subsets mined by the last forward.
    pub fn last_selection(&self) -> Option<&TripletSelection> {
        self.sampler.selection()
    }

    pub fn loss(&self) -> &TripletMarginLoss {
        &self.loss
    }
}
