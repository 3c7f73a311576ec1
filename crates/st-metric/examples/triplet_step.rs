// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Runs a few SGD steps of triplet loss directly on a random embedding batch.
//!
//! ```text
//! RUST_LOG=st_metric=debug cargo run -p st-metric --example triplet_step
//! ```

use spiral_config::tracing::{flush_chrome_trace, init_tracing};
use st_metric::{MetricResult, TripletConfig, TripletHead};
use st_tensor::Tensor;
use tracing::{info, warn};

const IDENTITIES: usize = 8;
const GROUP_SIZE: usize = 4;
const DIM: usize = 16;
const STEPS: usize = 25;
const LEARNING_RATE: f32 = 0.02;

fn main() -> MetricResult<()> {
    if let Err(err) = init_tracing() {
        warn!("tracing subscriber not installed: {err}");
    }

    let batch_size = IDENTITIES * GROUP_SIZE;
    let mut embeddings = Tensor::random_uniform(batch_size, DIM, -1.0, 1.0, Some(7))?;
    let mut head = TripletHead::new(TripletConfig::new(GROUP_SIZE, 0.2).with_seed(11))?;
    head.setup(batch_size, DIM)?;

    for step in 0..STEPS {
        let loss = head.forward(&embeddings)?;
        let grad = head.backward(1.0)?;
        embeddings.add_scaled(&grad, -LEARNING_RATE)?;
        let active = head.loss().active_triples().unwrap_or(0);
        info!(step, loss, active, "triplet step");
    }

    flush_chrome_trace();
    Ok(())
}
