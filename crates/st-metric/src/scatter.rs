// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{MetricError, MetricResult, Role};
use crate::loss::RoleGradients;
use crate::sampler::TripleSet;
use st_tensor::Tensor;
use tracing::debug_span;

/// Routes per-triple role gradients back onto the `N × D` batch they were
/// mined from.
///
/// A batch row may serve as anchor, positive and negative of several triples
/// at once, so rows are accumulated rather than assigned. The accumulation
/// runs on one thread; parallel writers would race on shared rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GradientScatter {
    batch_size: usize,
    dim: usize,
}

impl GradientScatter {
    pub fn new(batch_size: usize, dim: usize) -> Self {
        Self { batch_size, dim }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.batch_size, self.dim)
    }

    /// Scatter-adds into a freshly zeroed `N × D` tensor.
    pub fn scatter(&self, grads: &RoleGradients, triples: &TripleSet) -> MetricResult<Tensor> {
        let mut out = Tensor::zeros(self.batch_size, self.dim)?;
        self.scatter_into(grads, triples, &mut out)?;
        Ok(out)
    }

    /// Zeroes `out` and scatter-adds every present role gradient into it.
    /// All shapes and indices are checked before `out` is touched.
    pub fn scatter_into(
        &self,
        grads: &RoleGradients,
        triples: &TripleSet,
        out: &mut Tensor,
    ) -> MetricResult<()> {
        if out.shape() != self.shape() {
            return Err(MetricError::shape("batch gradient", self.shape(), out.shape()));
        }
        let expected = (triples.len(), self.dim);
        for role in Role::ALL {
            if let Some(grad) = grads.get(role) {
                if grad.shape() != expected {
                    return Err(MetricError::shape("role gradient", expected, grad.shape()));
                }
            }
        }
        for (position, triple) in triples.iter().enumerate() {
            for role in Role::ALL {
                let index = triple.index(role);
                if index >= self.batch_size {
                    return Err(MetricError::IndexOutOfRange {
                        role,
                        triple: position,
                        index,
                        batch: self.batch_size,
                    });
                }
            }
        }

        let _span = debug_span!("gradient_scatter", triples = triples.len()).entered();
        out.fill(0.0);
        for role in Role::ALL {
            let Some(grad) = grads.get(role) else {
                continue;
            };
            for (position, triple) in triples.iter().enumerate() {
                let src = grad.row(position)?;
                let dst = out.row_mut(triple.index(role))?;
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += *s;
                }
            }
        }
        Ok(())
    }
}
