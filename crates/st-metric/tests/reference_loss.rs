use st_metric::{
    EmbeddingBatch, GradientScatter, Role, RoleMask, Triple, TripletMarginLoss, TripletSelection,
};
use st_tensor::Tensor;

const MARGIN: f32 = 0.5;

/// Two identities of three samples each, two dimensions.
fn fixture() -> Tensor {
    Tensor::from_vec(
        6,
        2,
        vec![
            0.0, 0.0, //
            0.5, 0.2, //
            -0.3, 0.4, //
            0.6, -0.1, //
            2.0, 2.0, //
            -0.2, 0.7,
        ],
    )
    .unwrap()
}

/// Every same-group pair with a hand-picked negative from the other group.
fn hand_triples() -> Vec<Triple> {
    vec![
        Triple::new(0, 1, 3),
        Triple::new(0, 2, 5),
        Triple::new(1, 2, 4),
        Triple::new(3, 4, 0),
        Triple::new(3, 5, 1),
        Triple::new(4, 5, 2),
    ]
}

fn squared_distance(lhs: &[f32], rhs: &[f32]) -> f32 {
    lhs.iter().zip(rhs).map(|(a, b)| (a - b) * (a - b)).sum()
}

fn reference_loss(embeddings: &Tensor, triples: &[Triple], margin: f32) -> f32 {
    triples
        .iter()
        .map(|t| {
            let a = embeddings.row(t.anchor).unwrap();
            let p = embeddings.row(t.positive).unwrap();
            let n = embeddings.row(t.negative).unwrap();
            (margin + squared_distance(a, p) - squared_distance(a, n)).max(0.0)
        })
        .sum()
}

#[test]
fn forward_matches_literal_sum() {
    let embeddings = fixture();
    let batch = EmbeddingBatch::new(&embeddings, 3).unwrap();
    let selection = TripletSelection::from_triples(&batch, hand_triples()).unwrap();
    let mut loss = TripletMarginLoss::new(MARGIN).unwrap();
    let value = loss.forward_selection(&selection).unwrap();

    let expected = reference_loss(&embeddings, &hand_triples(), MARGIN);
    assert!((value - expected).abs() < 1e-6, "{value} vs {expected}");
    // 0.42 + 0.22 + 0 + 6.5 + 1.68 + 0
    assert!((value - 8.82).abs() < 1e-4);
    assert_eq!(loss.active_triples(), Some(4));
}

#[test]
fn squared_distances_are_non_negative() {
    let embeddings = Tensor::random_uniform(12, 5, -3.0, 3.0, Some(21)).unwrap();
    let batch = EmbeddingBatch::new(&embeddings, 4).unwrap();
    let mut sampler = st_metric::TripletSampler::with_seed(4, Some(8)).unwrap();
    sampler.prepare(12, 5).unwrap();
    let selection = sampler.sample(&batch).unwrap();
    let mut loss = TripletMarginLoss::new(0.2).unwrap();
    let value = loss.forward_selection(selection).unwrap();

    assert!(loss.dist_sq_ap().unwrap().iter().all(|d| *d >= 0.0));
    assert!(loss.dist_sq_an().unwrap().iter().all(|d| *d >= 0.0));
    let expected = reference_loss(&embeddings, selection.triples().as_slice(), 0.2);
    assert!((value - expected).abs() < 1e-4 * expected.max(1.0));
}

#[test]
fn clipped_triples_produce_zero_gradient_rows() {
    let embeddings = fixture();
    let batch = EmbeddingBatch::new(&embeddings, 3).unwrap();
    let selection = TripletSelection::from_triples(&batch, hand_triples()).unwrap();
    let mut loss = TripletMarginLoss::new(MARGIN).unwrap();
    loss.forward_selection(&selection).unwrap();
    let grads = loss.backward(1.0, RoleMask::ALL).unwrap();

    let hinge = loss.hinge().unwrap().to_vec();
    for (i, h) in hinge.iter().enumerate() {
        for role in Role::ALL {
            let row = grads.get(role).unwrap().row(i).unwrap();
            if *h == 0.0 {
                assert!(row.iter().all(|v| *v == 0.0), "triple {i} {role} {row:?}");
            } else {
                assert!(row.iter().any(|v| *v != 0.0), "triple {i} {role} {row:?}");
            }
        }
    }
    assert_eq!(hinge[2], 0.0);
    assert_eq!(hinge[5], 0.0);
}

#[test]
fn active_triple_gradients_follow_closed_form() {
    let embeddings = fixture();
    let batch = EmbeddingBatch::new(&embeddings, 3).unwrap();
    let selection = TripletSelection::from_triples(&batch, hand_triples()).unwrap();
    let mut loss = TripletMarginLoss::new(MARGIN).unwrap();
    loss.forward_selection(&selection).unwrap();
    let grads = loss.backward(1.0, RoleMask::ALL).unwrap();

    // Triple 0 is active: a = r0, p = r1, n = r3.
    let (a, p, n) = ([0.0f32, 0.0], [0.5f32, 0.2], [0.6f32, -0.1]);
    let anchor = [2.0 * (n[0] - p[0]), 2.0 * (n[1] - p[1])];
    let positive = [-2.0 * (a[0] - p[0]), -2.0 * (a[1] - p[1])];
    let negative = [2.0 * (a[0] - n[0]), 2.0 * (a[1] - n[1])];
    for (role, want) in [
        (Role::Anchor, anchor),
        (Role::Positive, positive),
        (Role::Negative, negative),
    ] {
        let got = grads.get(role).unwrap().row(0).unwrap();
        for c in 0..2 {
            assert!((got[c] - want[c]).abs() < 1e-6, "{role}: {got:?} vs {want:?}");
        }
    }
}

#[test]
fn scatter_sums_contributions_of_shared_rows() {
    let embeddings = fixture();
    let batch = EmbeddingBatch::new(&embeddings, 3).unwrap();
    let triples = hand_triples();
    let selection = TripletSelection::from_triples(&batch, triples.clone()).unwrap();
    let mut loss = TripletMarginLoss::new(MARGIN).unwrap();
    loss.forward_selection(&selection).unwrap();
    let grads = loss.backward(1.0, RoleMask::ALL).unwrap();
    let scattered = GradientScatter::new(6, 2)
        .scatter(&grads, selection.triples())
        .unwrap();

    // Row 3 is the negative of triple 0 and the anchor of triples 3 and 4.
    let mut expected = [0.0f32; 2];
    for (i, triple) in triples.iter().enumerate() {
        for role in Role::ALL {
            if triple.index(role) == 3 {
                let row = grads.get(role).unwrap().row(i).unwrap();
                expected[0] += row[0];
                expected[1] += row[1];
            }
        }
    }
    let last_write = grads.get(Role::Anchor).unwrap().row(4).unwrap();
    let got = scattered.row(3).unwrap();
    for c in 0..2 {
        assert!((got[c] - expected[c]).abs() < 1e-6);
    }
    assert_ne!(got, last_write);
}
