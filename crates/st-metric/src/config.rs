// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{MetricError, MetricResult};
use serde::{Deserialize, Serialize};

/// Smallest group that still yields an anchor/positive pair plus room for
/// the group to be distinguished from others.
pub const MIN_GROUP_SIZE: usize = 3;

fn default_margin() -> f32 {
    1.0
}

/// Host-facing configuration for the triplet head.
///
/// `group_size` is the number of consecutive batch rows that share an
/// identity. `seed` pins the negative sampler; without it the process
/// determinism settings from `spiral-config` apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TripletConfig {
    pub group_size: usize,
    #[serde(default = "default_margin")]
    pub margin: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TripletConfig {
    pub fn new(group_size: usize, margin: f32) -> Self {
        Self {
            group_size,
            margin,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Rejects group sizes below [`MIN_GROUP_SIZE`] and negative or
    /// non-finite margins.
    pub fn validate(&self) -> MetricResult<()> {
        validate_group_size(self.group_size)?;
        validate_margin(self.margin)
    }
}

pub(crate) fn validate_group_size(group_size: usize) -> MetricResult<()> {
    if group_size < MIN_GROUP_SIZE {
        return Err(MetricError::Configuration(format!(
            "group_size must be greater than 2, got {group_size}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_margin(margin: f32) -> MetricResult<()> {
    if !margin.is_finite() || margin < 0.0 {
        return Err(MetricError::Configuration(format!(
            "margin must be finite and non-negative, got {margin}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_margin_and_seed() {
        let cfg: TripletConfig = serde_json::from_str(r#"{ "group_size": 4 }"#).unwrap();
        assert_eq!(cfg, TripletConfig::new(4, 1.0));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_small_groups_and_bad_margins() {
        assert!(matches!(
            TripletConfig::new(2, 0.5).validate(),
            Err(MetricError::Configuration(_))
        ));
        assert!(TripletConfig::new(3, -0.1).validate().is_err());
        assert!(TripletConfig::new(3, f32::NAN).validate().is_err());
        assert!(TripletConfig::new(3, 0.0).validate().is_ok());
    }
}
