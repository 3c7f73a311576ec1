// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::config::validate_group_size;
use crate::error::{MetricError, MetricResult};
use st_tensor::Tensor;
use std::ops::Range;

/// Read-only view over `N` embeddings of dimension `D`, split into `N / G`
/// contiguous identity groups of `G` rows each.
#[derive(Clone, Copy, Debug)]
pub struct EmbeddingBatch<'a> {
    embeddings: &'a Tensor,
    group_size: usize,
}

impl<'a> EmbeddingBatch<'a> {
    pub fn new(embeddings: &'a Tensor, group_size: usize) -> MetricResult<Self> {
        validate_group_size(group_size)?;
        let rows = embeddings.rows();
        if rows % group_size != 0 {
            return Err(MetricError::Configuration(format!(
                "batch size {rows} is not divisible by group_size {group_size}"
            )));
        }
        Ok(Self {
            embeddings,
            group_size,
        })
    }

    /// Number of embeddings `N`.
    pub fn len(&self) -> usize {
        self.embeddings.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimension `D`.
    pub fn dim(&self) -> usize {
        self.embeddings.cols()
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn num_groups(&self) -> usize {
        self.len() / self.group_size
    }

    pub fn group_of(&self, position: usize) -> usize {
        position / self.group_size
    }

    /// Batch rows belonging to `group`.
    pub fn group_rows(&self, group: usize) -> Range<usize> {
        let start = group * self.group_size;
        start..start + self.group_size
    }

    pub fn embedding(&self, position: usize) -> MetricResult<&'a [f32]> {
        Ok(self.embeddings.row(position)?)
    }

    pub fn tensor(&self) -> &'a Tensor {
        self.embeddings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_contiguous() {
        let tensor = Tensor::from_fn(6, 2, |r, c| (r * 2 + c) as f32).unwrap();
        let batch = EmbeddingBatch::new(&tensor, 3).unwrap();
        assert_eq!(batch.num_groups(), 2);
        assert_eq!(batch.group_of(2), 0);
        assert_eq!(batch.group_of(3), 1);
        assert_eq!(batch.group_rows(1), 3..6);
        assert_eq!(batch.embedding(4).unwrap(), &[8.0, 9.0]);
    }

    #[test]
    fn rejects_ragged_batches() {
        let tensor = Tensor::zeros(7, 2).unwrap();
        assert!(matches!(
            EmbeddingBatch::new(&tensor, 3),
            Err(MetricError::Configuration(_))
        ));
        assert!(EmbeddingBatch::new(&tensor, 2).is_err());
    }
}
