use super::*;

fn score(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    metric.score(a, norm(a), b, norm(b))
}

#[test]
fn cosine_ignores_magnitude() {
    let a = [1.0, 0.0];
    assert!((score(DistanceMetric::Cosine, &a, &[5.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(score(DistanceMetric::Cosine, &a, &[0.0, 3.0]).abs() < 1e-6);
    assert!((score(DistanceMetric::Cosine, &a, &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
}

#[test]
fn cosine_of_zero_vector_is_zero() {
    assert!(score(DistanceMetric::Cosine, &[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
}

#[test]
fn inner_product_keeps_magnitude() {
    assert!((score(DistanceMetric::InnerProduct, &[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-6);
}

#[test]
fn l2_is_inverted_distance() {
    assert!((score(DistanceMetric::L2, &[1.0, 1.0], &[1.0, 1.0]) - 1.0).abs() < 1e-6);
    // distance 5 -> 1 / 6
    assert!((score(DistanceMetric::L2, &[0.0, 0.0], &[3.0, 4.0]) - 1.0 / 6.0).abs() < 1e-6);
}

#[test]
fn scored_orders_ties_by_slot() {
    let mut scored = vec![
        Scored { slot: 3, score: 0.5 },
        Scored { slot: 1, score: 0.5 },
        Scored { slot: 2, score: 0.9 },
    ];
    rank(&mut scored);
    let slots: Vec<usize> = scored.iter().map(|s| s.slot).collect();
    assert_eq!(slots, vec![2, 1, 3]);
}

#[test]
fn metric_names() {
    assert_eq!(DistanceMetric::InnerProduct.to_string(), "inner_product");
    let parsed: DistanceMetric = serde_json::from_str("\"l2\"").expect("should parse metric");
    assert_eq!(parsed, DistanceMetric::L2);
}
