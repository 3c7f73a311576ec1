use proptest::prelude::*;
use st_metric::sampler::triples_per_batch;
use st_metric::{EmbeddingBatch, MetricError, TripletSampler};
use st_tensor::Tensor;

fn sampled_pairs(
    embeddings: &Tensor,
    group_size: usize,
    seed: u64,
) -> Vec<(usize, usize, usize)> {
    let batch = EmbeddingBatch::new(embeddings, group_size).unwrap();
    let mut sampler = TripletSampler::with_seed(group_size, Some(seed)).unwrap();
    sampler.prepare(embeddings.rows(), embeddings.cols()).unwrap();
    sampler
        .sample(&batch)
        .unwrap()
        .triples()
        .iter()
        .map(|t| (t.anchor, t.positive, t.negative))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mined_triples_respect_grouping(
        group_size in 3usize..7,
        groups in 2usize..6,
        dim in 1usize..4,
        seed in any::<u64>(),
    ) {
        let rows = group_size * groups;
        let embeddings = Tensor::random_uniform(rows, dim, -1.0, 1.0, Some(seed)).unwrap();
        let triples = sampled_pairs(&embeddings, group_size, seed);

        prop_assert_eq!(triples.len(), groups * group_size * (group_size - 1) / 2);
        prop_assert_eq!(triples.len(), triples_per_batch(rows, group_size));
        for (anchor, positive, negative) in triples {
            prop_assert!(anchor < positive);
            prop_assert_eq!(anchor / group_size, positive / group_size);
            prop_assert_ne!(anchor / group_size, negative / group_size);
            prop_assert!(negative < rows);
        }
    }

    #[test]
    fn anchor_positive_order_ignores_the_seed(
        group_size in 3usize..6,
        groups in 2usize..5,
        first_seed in any::<u64>(),
        second_seed in any::<u64>(),
    ) {
        let rows = group_size * groups;
        let embeddings = Tensor::zeros(rows, 2).unwrap();
        let lhs = sampled_pairs(&embeddings, group_size, first_seed);
        let rhs = sampled_pairs(&embeddings, group_size, second_seed);
        let strip = |v: &[(usize, usize, usize)]| -> Vec<(usize, usize)> {
            v.iter().map(|&(a, p, _)| (a, p)).collect()
        };
        prop_assert_eq!(strip(lhs.as_slice()), strip(rhs.as_slice()));
    }
}

#[test]
fn negatives_cover_every_foreign_group_evenly() {
    let group_size = 3;
    let groups = 4;
    let rows = group_size * groups;
    let embeddings = Tensor::zeros(rows, 1).unwrap();
    let batch = EmbeddingBatch::new(&embeddings, group_size).unwrap();
    let mut sampler = TripletSampler::with_seed(group_size, Some(2024)).unwrap();
    sampler.prepare(rows, 1).unwrap();

    let mut counts = [0usize; 4];
    let rounds = 2000;
    for _ in 0..rounds {
        let selection = sampler.sample(&batch).unwrap();
        for triple in selection.triples().iter().filter(|t| t.anchor < group_size) {
            counts[triple.negative / group_size] += 1;
        }
    }
    assert_eq!(counts[0], 0);
    // 3 pairs per round spread over 3 foreign groups: 2000 expected each.
    for count in &counts[1..] {
        assert!((1700..2300).contains(count), "{counts:?}");
    }
}

#[test]
fn minimum_group_with_single_identity_is_rejected() {
    let mut sampler = TripletSampler::with_seed(3, Some(0)).unwrap();
    assert!(matches!(
        sampler.prepare(3, 4),
        Err(MetricError::Configuration(_))
    ));
    sampler.prepare(6, 4).unwrap();
    assert_eq!(sampler.output_size(), 6);
}
