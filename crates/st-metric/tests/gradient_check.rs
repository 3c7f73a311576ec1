//! Central finite differences against the scattered analytic gradient.

use st_metric::{
    EmbeddingBatch, GradientScatter, RoleMask, Triple, TripletMarginLoss, TripletSelection,
};
use st_tensor::Tensor;

const EPS: f32 = 1e-2;
const TOLERANCE: f32 = 1e-2;

fn fixture() -> Tensor {
    Tensor::from_vec(
        6,
        2,
        vec![0.0, 0.0, 0.5, 0.2, -0.3, 0.4, 0.6, -0.1, 2.0, 2.0, -0.2, 0.7],
    )
    .unwrap()
}

fn triples() -> Vec<Triple> {
    vec![
        Triple::new(0, 1, 3),
        Triple::new(0, 2, 5),
        Triple::new(1, 2, 4),
        Triple::new(3, 4, 0),
        Triple::new(3, 5, 1),
        Triple::new(4, 5, 2),
    ]
}

fn loss_at(embeddings: &Tensor, margin: f32) -> f32 {
    let batch = EmbeddingBatch::new(embeddings, 3).unwrap();
    let selection = TripletSelection::from_triples(&batch, triples()).unwrap();
    TripletMarginLoss::new(margin)
        .unwrap()
        .forward_selection(&selection)
        .unwrap()
}

fn analytic_gradient(embeddings: &Tensor, margin: f32, upstream: f32) -> Tensor {
    let batch = EmbeddingBatch::new(embeddings, 3).unwrap();
    let selection = TripletSelection::from_triples(&batch, triples()).unwrap();
    let mut loss = TripletMarginLoss::new(margin).unwrap();
    loss.forward_selection(&selection).unwrap();
    let grads = loss.backward(upstream, RoleMask::ALL).unwrap();
    GradientScatter::new(embeddings.rows(), embeddings.cols())
        .scatter(&grads, selection.triples())
        .unwrap()
}

#[test]
fn analytic_gradient_matches_finite_differences() {
    let embeddings = fixture();
    let margin = 0.5;
    let analytic = analytic_gradient(&embeddings, margin, 1.0);

    for index in 0..embeddings.len() {
        let mut plus = embeddings.clone();
        plus.data_mut()[index] += EPS;
        let mut minus = embeddings.clone();
        minus.data_mut()[index] -= EPS;
        let numeric = (loss_at(&plus, margin) - loss_at(&minus, margin)) / (2.0 * EPS);
        let exact = analytic.data()[index];
        assert!(
            (numeric - exact).abs() < TOLERANCE,
            "coordinate {index}: numeric {numeric} vs analytic {exact}"
        );
    }
}

#[test]
fn upstream_scales_the_gradient_linearly() {
    let embeddings = fixture();
    let unit = analytic_gradient(&embeddings, 0.5, 1.0);
    let weighted = analytic_gradient(&embeddings, 0.5, 0.25);
    for (u, w) in unit.data().iter().zip(weighted.data()) {
        assert!((u * 0.25 - w).abs() < 1e-6);
    }
}
