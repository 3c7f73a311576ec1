// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_tensor::TensorError;
use std::fmt;
use thiserror::Error;

/// Position of an embedding inside a triplet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Anchor,
    Positive,
    Negative,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Anchor, Role::Positive, Role::Negative];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Anchor => write!(f, "anchor"),
            Role::Positive => write!(f, "positive"),
            Role::Negative => write!(f, "negative"),
        }
    }
}

/// Errors surfaced by the triplet mining and loss stages.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    /// Invalid group size or margin, or a batch that cannot be split into
    /// groups with at least one foreign group per anchor.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Two buffers that must agree on `(rows, cols)` do not.
    #[error("shape mismatch for {label}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        label: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// A stage was invoked before the stage it depends on.
    #[error("{stage} requires a preceding {requires}")]
    PrecedenceViolation {
        stage: &'static str,
        requires: &'static str,
    },
    /// An index map entry points outside the batch.
    #[error("{role} index {index} at triple {triple} is outside the batch of {batch} rows")]
    IndexOutOfRange {
        role: Role,
        triple: usize,
        index: usize,
        batch: usize,
    },
    /// Internal bookkeeping disagreed with itself.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type MetricResult<T> = std::result::Result<T, MetricError>;

impl MetricError {
    pub(crate) fn shape(label: &'static str, expected: (usize, usize), got: (usize, usize)) -> Self {
        MetricError::ShapeMismatch {
            label,
            expected,
            got,
        }
    }
}
