// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Random triplet mining over identity-grouped batches.
//!
//! Every unordered pair `(j, k)`, `j < k`, inside a group becomes one
//! anchor/positive pair, in group order then pair order. Each pair receives a
//! single negative drawn uniformly from a different group. The resulting
//! ordering is the only link between a triple's position and the rows of the
//! materialised subsets, so it never changes between calls; only the
//! negatives do.

use crate::batch::EmbeddingBatch;
use crate::config::validate_group_size;
use crate::error::{MetricError, MetricResult, Role};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use spiral_config::determinism;
use st_tensor::Tensor;
use std::fmt;
use tracing::{debug, debug_span, trace};

const SAMPLER_LABEL: &str = "st-metric/triplet-sampler";

/// Number of triples mined from a batch of `batch_size` rows with groups of
/// `group_size`: one per unordered same-group pair. `group_size` must be
/// non-zero.
pub fn triples_per_batch(batch_size: usize, group_size: usize) -> usize {
    (batch_size / group_size) * group_size * group_size.saturating_sub(1) / 2
}

/// Indices of one anchor/positive/negative triple in the original batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Triple {
    pub anchor: usize,
    pub positive: usize,
    pub negative: usize,
}

impl Triple {
    pub fn new(anchor: usize, positive: usize, negative: usize) -> Self {
        Self {
            anchor,
            positive,
            negative,
        }
    }

    pub fn index(&self, role: Role) -> usize {
        match role {
            Role::Anchor => self.anchor,
            Role::Positive => self.positive,
            Role::Negative => self.negative,
        }
    }
}

/// Ordered triples of one sampling call. Position `i` addresses row `i` of
/// every per-role subset and gradient buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TripleSet {
    triples: Vec<Triple>,
}

impl TripleSet {
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Triple> {
        self.triples.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triple> {
        self.triples.iter()
    }

    pub fn as_slice(&self) -> &[Triple] {
        &self.triples
    }

    /// Original batch index of `role` for every triple, in triple order.
    pub fn role_map(&self, role: Role) -> Vec<usize> {
        self.triples.iter().map(|t| t.index(role)).collect()
    }

    pub fn anchor_map(&self) -> Vec<usize> {
        self.role_map(Role::Anchor)
    }

    pub fn positive_map(&self) -> Vec<usize> {
        self.role_map(Role::Positive)
    }

    pub fn negative_map(&self) -> Vec<usize> {
        self.role_map(Role::Negative)
    }
}

impl From<Vec<Triple>> for TripleSet {
    fn from(triples: Vec<Triple>) -> Self {
        Self { triples }
    }
}

impl<'a> IntoIterator for &'a TripleSet {
    type Item = &'a Triple;
    type IntoIter = std::slice::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}

/// A triple set together with the embeddings it selects, one `M × D` tensor
/// per role.
#[derive(Clone, Debug, PartialEq)]
pub struct TripletSelection {
    triples: TripleSet,
    anchors: Tensor,
    positives: Tensor,
    negatives: Tensor,
    batch_size: usize,
}

impl TripletSelection {
    fn allocate(triple_count: usize, dim: usize, batch_size: usize) -> MetricResult<Self> {
        Ok(Self {
            triples: TripleSet::default(),
            anchors: Tensor::zeros(triple_count, dim)?,
            positives: Tensor::zeros(triple_count, dim)?,
            negatives: Tensor::zeros(triple_count, dim)?,
            batch_size,
        })
    }

    /// Builds a selection from caller-chosen triples, bypassing random
    /// mining. Every triple is checked against the batch grouping.
    pub fn from_triples(batch: &EmbeddingBatch<'_>, triples: Vec<Triple>) -> MetricResult<Self> {
        if triples.is_empty() {
            return Err(MetricError::Configuration(
                "triple list must not be empty".to_string(),
            ));
        }
        for (position, triple) in triples.iter().enumerate() {
            check_triple(batch, position, triple)?;
        }
        let mut selection = Self::allocate(triples.len(), batch.dim(), batch.len())?;
        selection.fill(batch, TripleSet::from(triples))?;
        Ok(selection)
    }

    fn fill(&mut self, batch: &EmbeddingBatch<'_>, triples: TripleSet) -> MetricResult<()> {
        let dim = batch.dim();
        let source = batch.tensor().data();
        for role in Role::ALL {
            let target = match role {
                Role::Anchor => &mut self.anchors,
                Role::Positive => &mut self.positives,
                Role::Negative => &mut self.negatives,
            };
            if target.shape() != (triples.len(), dim) {
                return Err(MetricError::shape(
                    "triplet subset",
                    target.shape(),
                    (triples.len(), dim),
                ));
            }
            target
                .data_mut()
                .par_chunks_mut(dim)
                .zip(triples.as_slice().par_iter())
                .for_each(|(row, triple)| {
                    let start = triple.index(role) * dim;
                    row.copy_from_slice(&source[start..start + dim]);
                });
        }
        self.triples = triples;
        self.batch_size = batch.len();
        Ok(())
    }

    pub fn triples(&self) -> &TripleSet {
        &self.triples
    }

    pub fn anchors(&self) -> &Tensor {
        &self.anchors
    }

    pub fn positives(&self) -> &Tensor {
        &self.positives
    }

    pub fn negatives(&self) -> &Tensor {
        &self.negatives
    }

    pub fn subset(&self, role: Role) -> &Tensor {
        match role {
            Role::Anchor => &self.anchors,
            Role::Positive => &self.positives,
            Role::Negative => &self.negatives,
        }
    }

    /// Rows `N` of the batch the triples index into.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dim(&self) -> usize {
        self.anchors.cols()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

fn check_triple(batch: &EmbeddingBatch<'_>, position: usize, triple: &Triple) -> MetricResult<()> {
    for role in Role::ALL {
        let index = triple.index(role);
        if index >= batch.len() {
            return Err(MetricError::IndexOutOfRange {
                role,
                triple: position,
                index,
                batch: batch.len(),
            });
        }
    }
    let group = batch.group_of(triple.anchor);
    if triple.anchor == triple.positive || batch.group_of(triple.positive) != group {
        return Err(MetricError::InvariantViolation(format!(
            "triple {position}: positive {} must be a different row of the anchor's group {group}",
            triple.positive
        )));
    }
    if batch.group_of(triple.negative) == group {
        return Err(MetricError::InvariantViolation(format!(
            "triple {position}: negative {} shares the anchor's group {group}",
            triple.negative
        )));
    }
    Ok(())
}

/// Mines every same-group anchor/positive pair and pairs it with a random
/// negative from another group.
pub struct TripletSampler {
    group_size: usize,
    batch_size: usize,
    dim: usize,
    rng: StdRng,
    selection: Option<TripletSelection>,
}

impl fmt::Debug for TripletSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripletSampler")
            .field("group_size", &self.group_size)
            .field("batch_size", &self.batch_size)
            .field("dim", &self.dim)
            .field("prepared", &self.selection.is_some())
            .finish()
    }
}

impl TripletSampler {
    /// Sampler whose RNG follows the process determinism settings.
    pub fn configure(group_size: usize) -> MetricResult<Self> {
        Self::with_seed(group_size, None)
    }

    /// Sampler with an explicit seed, or the determinism defaults when `None`.
    pub fn with_seed(group_size: usize, seed: Option<u64>) -> MetricResult<Self> {
        Self::with_rng(group_size, determinism::rng_from_optional(seed, SAMPLER_LABEL))
    }

    /// Sampler driven by a caller-owned generator.
    pub fn with_rng(group_size: usize, rng: StdRng) -> MetricResult<Self> {
        validate_group_size(group_size)?;
        Ok(Self {
            group_size,
            batch_size: 0,
            dim: 0,
            rng,
            selection: None,
        })
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Triples produced per call for the prepared batch shape.
    pub fn output_size(&self) -> usize {
        triples_per_batch(self.batch_size, self.group_size)
    }

    /// Sizes the index maps and subsets for batches of `batch_size × dim`.
    /// Buffers are kept when the shape is unchanged.
    pub fn prepare(&mut self, batch_size: usize, dim: usize) -> MetricResult<()> {
        if batch_size % self.group_size != 0 {
            return Err(MetricError::Configuration(format!(
                "batch size {batch_size} is not divisible by group_size {}",
                self.group_size
            )));
        }
        let groups = batch_size / self.group_size;
        if groups < 2 {
            return Err(MetricError::Configuration(format!(
                "batch of {batch_size} rows holds {groups} group(s); negatives need at least 2"
            )));
        }
        if dim == 0 {
            return Err(MetricError::Configuration(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        if self.selection.is_some() && self.batch_size == batch_size && self.dim == dim {
            return Ok(());
        }
        let output_size = triples_per_batch(batch_size, self.group_size);
        self.selection = Some(TripletSelection::allocate(output_size, dim, batch_size)?);
        self.batch_size = batch_size;
        self.dim = dim;
        debug!(
            batch_size,
            dim,
            group_size = self.group_size,
            output_size,
            "triplet sampler prepared ({output_size} x {dim})"
        );
        Ok(())
    }

    /// Draws a fresh triple set for `batch` and materialises its subsets.
    /// Previous results are overwritten.
    pub fn sample(&mut self, batch: &EmbeddingBatch<'_>) -> MetricResult<&TripletSelection> {
        if batch.group_size() != self.group_size {
            return Err(MetricError::Configuration(format!(
                "batch grouped by {} but sampler expects {}",
                batch.group_size(),
                self.group_size
            )));
        }
        if self.selection.is_none() {
            return Err(MetricError::PrecedenceViolation {
                stage: "sample",
                requires: "prepare",
            });
        }
        if (batch.len(), batch.dim()) != (self.batch_size, self.dim) {
            return Err(MetricError::shape(
                "embedding batch",
                (self.batch_size, self.dim),
                (batch.len(), batch.dim()),
            ));
        }

        let output_size = self.output_size();
        let _span = debug_span!("triplet_sample", batch = batch.len(), output_size).entered();

        let groups = batch.num_groups();
        let mut triples = Vec::with_capacity(output_size);
        for group in 0..groups {
            let start = group * self.group_size;
            for j in 0..self.group_size {
                for k in (j + 1)..self.group_size {
                    let negative = self.draw_negative(group, groups);
                    triples.push(Triple::new(start + j, start + k, negative));
                }
            }
        }
        if triples.len() != output_size {
            return Err(MetricError::InvariantViolation(format!(
                "mined {} triples, expected {output_size}",
                triples.len()
            )));
        }
        trace!(first = ?triples.first(), last = ?triples.last(), "mined triples");

        let selection = self
            .selection
            .as_mut()
            .ok_or(MetricError::PrecedenceViolation {
                stage: "sample",
                requires: "prepare",
            })?;
        selection.fill(batch, TripleSet::from(triples))?;
        Ok(&*selection)
    }

    /// Latest selection, if `sample` has run since `prepare`.
    pub fn selection(&self) -> Option<&TripletSelection> {
        self.selection.as_ref().filter(|s| !s.is_empty())
    }

    /// Uniform over the other `groups - 1` groups: draw from the reduced range
    /// and step over the anchor's own group.
    fn draw_negative(&mut self, own_group: usize, groups: usize) -> usize {
        let mut group = self.rng.gen_range(0..groups - 1);
        if group >= own_group {
            group += 1;
        }
        group * self.group_size + self.rng.gen_range(0..self.group_size)
    }
}
