// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Squared-Euclidean triplet margin loss.
//!
//! ```text
//! L = Σ_i max(0, margin + ||a_i - p_i||² - ||a_i - n_i||²)
//! ```
//!
//! The sum is not averaged; loss weighting belongs to the caller and enters
//! through the `upstream` factor of [`TripletMarginLoss::backward`].
//!
//! Forward caches `n - p`, `a - p` and `a - n` per triple. A triple's cached
//! differences are all zero exactly when its hinge term is zero, which is what
//! makes its backward rows vanish without any branch in backward.

use crate::config::validate_margin;
use crate::error::{MetricError, MetricResult, Role};
use crate::sampler::TripletSelection;
use rayon::prelude::*;
use st_tensor::Tensor;
use tracing::{debug, debug_span};

/// Which roles need a gradient from backward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleMask {
    pub anchor: bool,
    pub positive: bool,
    pub negative: bool,
}

impl RoleMask {
    pub const ALL: RoleMask = RoleMask {
        anchor: true,
        positive: true,
        negative: true,
    };
    pub const NONE: RoleMask = RoleMask {
        anchor: false,
        positive: false,
        negative: false,
    };

    pub fn only(role: Role) -> Self {
        Self::NONE.with(role, true)
    }

    pub fn with(mut self, role: Role, enabled: bool) -> Self {
        match role {
            Role::Anchor => self.anchor = enabled,
            Role::Positive => self.positive = enabled,
            Role::Negative => self.negative = enabled,
        }
        self
    }

    pub fn contains(&self, role: Role) -> bool {
        match role {
            Role::Anchor => self.anchor,
            Role::Positive => self.positive,
            Role::Negative => self.negative,
        }
    }
}

impl Default for RoleMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Per-role `M × D` gradients. Roles that were not requested stay `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleGradients {
    pub anchor: Option<Tensor>,
    pub positive: Option<Tensor>,
    pub negative: Option<Tensor>,
}

impl RoleGradients {
    pub fn get(&self, role: Role) -> Option<&Tensor> {
        match role {
            Role::Anchor => self.anchor.as_ref(),
            Role::Positive => self.positive.as_ref(),
            Role::Negative => self.negative.as_ref(),
        }
    }

    fn slot(&mut self, role: Role) -> &mut Option<Tensor> {
        match role {
            Role::Anchor => &mut self.anchor,
            Role::Positive => &mut self.positive,
            Role::Negative => &mut self.negative,
        }
    }
}

#[derive(Clone, Debug)]
struct DifferenceCache {
    diff_np: Tensor,
    diff_ap: Tensor,
    diff_an: Tensor,
    dist_sq_ap: Vec<f32>,
    dist_sq_an: Vec<f32>,
    hinge: Vec<f32>,
}

impl DifferenceCache {
    fn allocate(rows: usize, cols: usize) -> MetricResult<Self> {
        Ok(Self {
            diff_np: Tensor::zeros(rows, cols)?,
            diff_ap: Tensor::zeros(rows, cols)?,
            diff_an: Tensor::zeros(rows, cols)?,
            dist_sq_ap: vec![0.0; rows],
            dist_sq_an: vec![0.0; rows],
            hinge: vec![0.0; rows],
        })
    }

    fn shape(&self) -> (usize, usize) {
        self.diff_np.shape()
    }

    /// Cached difference that the gradient of `role` is proportional to,
    /// with its coefficient.
    fn gradient_source(&self, role: Role) -> (&Tensor, f32) {
        match role {
            Role::Anchor => (&self.diff_np, 2.0),
            Role::Positive => (&self.diff_ap, -2.0),
            Role::Negative => (&self.diff_an, 2.0),
        }
    }
}

/// Margin loss over anchor/positive/negative subsets with cached differences
/// for the backward pass.
#[derive(Clone, Debug)]
pub struct TripletMarginLoss {
    margin: f32,
    cache: Option<DifferenceCache>,
}

impl TripletMarginLoss {
    pub fn new(margin: f32) -> MetricResult<Self> {
        validate_margin(margin)?;
        Ok(Self {
            margin,
            cache: None,
        })
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Computes the summed hinge loss over `M` triples and refreshes the
    /// difference cache. On error the cache is left invalid.
    pub fn forward(
        &mut self,
        anchors: &Tensor,
        positives: &Tensor,
        negatives: &Tensor,
    ) -> MetricResult<f32> {
        let previous = self.cache.take();
        let shape = anchors.shape();
        if positives.shape() != shape {
            return Err(MetricError::shape("positive subset", shape, positives.shape()));
        }
        if negatives.shape() != shape {
            return Err(MetricError::shape("negative subset", shape, negatives.shape()));
        }
        let (rows, cols) = shape;
        let _span = debug_span!("triplet_loss_forward", triples = rows, dim = cols).entered();

        let mut cache = match previous {
            Some(cache) if cache.shape() == shape => cache,
            _ => DifferenceCache::allocate(rows, cols)?,
        };

        let margin = self.margin;
        let (a, p, n) = (anchors.data(), positives.data(), negatives.data());
        cache
            .diff_np
            .data_mut()
            .par_chunks_mut(cols)
            .zip(cache.diff_ap.data_mut().par_chunks_mut(cols))
            .zip(cache.diff_an.data_mut().par_chunks_mut(cols))
            .zip(cache.dist_sq_ap.par_iter_mut())
            .zip(cache.dist_sq_an.par_iter_mut())
            .zip(cache.hinge.par_iter_mut())
            .enumerate()
            .for_each(|(i, (((((np, ap), an), dist_ap), dist_an), hinge))| {
                let range = i * cols..(i + 1) * cols;
                let (a, p, n) = (&a[range.clone()], &p[range.clone()], &n[range]);
                for c in 0..cols {
                    np[c] = n[c] - p[c];
                    ap[c] = a[c] - p[c];
                    an[c] = a[c] - n[c];
                }
                *dist_ap = squared_norm(ap);
                *dist_an = squared_norm(an);
                // Only a real clip zeroes the cache; NaN passes through.
                let raw = margin + *dist_ap - *dist_an;
                *hinge = if raw > 0.0 || raw.is_nan() { raw } else { 0.0 };
                if *hinge == 0.0 {
                    np.fill(0.0);
                    ap.fill(0.0);
                    an.fill(0.0);
                }
            });

        // Ordered reduction keeps the loss independent of the thread count.
        let loss: f32 = cache.hinge.iter().sum();
        let active = cache.hinge.iter().filter(|h| **h > 0.0).count();
        debug!(loss, active, triples = rows, "triplet loss forward");
        self.cache = Some(cache);
        Ok(loss)
    }

    /// Forward over the subsets of a sampled selection.
    pub fn forward_selection(&mut self, selection: &TripletSelection) -> MetricResult<f32> {
        self.forward(
            selection.anchors(),
            selection.positives(),
            selection.negatives(),
        )
    }

    /// Gradients of `upstream * L` for every role in `mask`:
    /// anchor `2·(n - p)`, positive `-2·(a - p)`, negative `2·(a - n)`.
    pub fn backward(&self, upstream: f32, mask: RoleMask) -> MetricResult<RoleGradients> {
        let cache = self.cache()?;
        let (rows, cols) = cache.shape();
        let mut grads = RoleGradients::default();
        for role in Role::ALL.into_iter().filter(|role| mask.contains(*role)) {
            let mut buffer = Tensor::zeros(rows, cols)?;
            self.backward_into(upstream, role, &mut buffer)?;
            *grads.slot(role) = Some(buffer);
        }
        Ok(grads)
    }

    /// Writes the gradient for `role` into a caller-owned `M × D` buffer,
    /// overwriting its contents.
    pub fn backward_into(&self, upstream: f32, role: Role, out: &mut Tensor) -> MetricResult<()> {
        let cache = self.cache()?;
        if out.shape() != cache.shape() {
            return Err(MetricError::shape("gradient buffer", cache.shape(), out.shape()));
        }
        let (source, coefficient) = cache.gradient_source(role);
        let alpha = coefficient * upstream;
        out.data_mut()
            .par_iter_mut()
            .zip(source.data().par_iter())
            .for_each(|(dst, diff)| *dst = alpha * diff);
        Ok(())
    }

    /// Drops the cached differences; backward fails until the next forward.
    pub fn reset(&mut self) {
        self.cache = None;
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn dist_sq_ap(&self) -> Option<&[f32]> {
        self.cache.as_ref().map(|c| c.dist_sq_ap.as_slice())
    }

    pub fn dist_sq_an(&self) -> Option<&[f32]> {
        self.cache.as_ref().map(|c| c.dist_sq_an.as_slice())
    }

    /// Per-triple hinge terms of the last forward.
    pub fn hinge(&self) -> Option<&[f32]> {
        self.cache.as_ref().map(|c| c.hinge.as_slice())
    }

    /// Triples whose hinge term did not clip in the last forward.
    pub fn active_triples(&self) -> Option<usize> {
        self.hinge()
            .map(|hinge| hinge.iter().filter(|h| **h > 0.0).count())
    }

    /// Cached `n - p`, `a - p`, `a - n` of the last forward.
    pub fn differences(&self) -> Option<(&Tensor, &Tensor, &Tensor)> {
        self.cache
            .as_ref()
            .map(|c| (&c.diff_np, &c.diff_ap, &c.diff_an))
    }

    fn cache(&self) -> MetricResult<&DifferenceCache> {
        self.cache.as_ref().ok_or(MetricError::PrecedenceViolation {
            stage: "backward",
            requires: "forward",
        })
    }
}

fn squared_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum()
}
