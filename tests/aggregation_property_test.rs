//! Property tests for the weighted federated average.

use std::collections::HashMap;

use drover::domain::models::ModelUpdate;
use drover::services::aggregation::aggregate_updates;
use proptest::prelude::*;

fn update(data_size: i64, loss: f64, values: Vec<f64>) -> ModelUpdate {
    let mut gradients = HashMap::new();
    gradients.insert("layer".to_string(), values);
    ModelUpdate {
        gradients,
        weights: None,
        update_type: "gradient".to_string(),
        data_size,
        loss,
        accuracy: 0.0,
        metadata: serde_json::Value::Null,
    }
}

proptest! {
    /// The aggregated gradient equals Σ wᵢgᵢ / Σ wᵢ to machine precision.
    #[test]
    fn aggregate_matches_reference_formula(
        raw in prop::collection::vec(
            (1i64..10_000, prop::collection::vec(-100.0f64..100.0, 4)),
            1..8,
        )
    ) {
        let updates: Vec<ModelUpdate> = raw
            .iter()
            .map(|(w, g)| update(*w, 0.5, g.clone()))
            .collect();

        let agg = aggregate_updates(&updates).expect("positive weights always aggregate");
        let total: f64 = raw.iter().map(|(w, _)| *w as f64).sum();

        for i in 0..4 {
            let expected: f64 =
                raw.iter().map(|(w, g)| *w as f64 * g[i]).sum::<f64>() / total;
            let got = agg.gradients["layer"][i];
            prop_assert!(
                (got - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "index {}: got {}, expected {}", i, got, expected
            );
        }
    }

    /// Each aggregated component stays inside the min/max envelope of its
    /// contributors; a weighted mean cannot extrapolate.
    #[test]
    fn aggregate_stays_within_contributor_envelope(
        raw in prop::collection::vec(
            (1i64..1_000, prop::collection::vec(-50.0f64..50.0, 3)),
            1..6,
        )
    ) {
        let updates: Vec<ModelUpdate> = raw
            .iter()
            .map(|(w, g)| update(*w, 0.1, g.clone()))
            .collect();

        let agg = aggregate_updates(&updates).expect("aggregates");
        for i in 0..3 {
            let lo = raw.iter().map(|(_, g)| g[i]).fold(f64::INFINITY, f64::min);
            let hi = raw.iter().map(|(_, g)| g[i]).fold(f64::NEG_INFINITY, f64::max);
            let got = agg.gradients["layer"][i];
            prop_assert!(got >= lo - 1e-9 && got <= hi + 1e-9);
        }
    }

    /// Scaling every weight by the same factor leaves the average unchanged.
    #[test]
    fn aggregate_is_invariant_under_weight_scaling(
        raw in prop::collection::vec(
            (1i64..100, prop::collection::vec(-10.0f64..10.0, 2)),
            2..5,
        ),
        factor in 2i64..50,
    ) {
        let base: Vec<ModelUpdate> = raw
            .iter()
            .map(|(w, g)| update(*w, 0.1, g.clone()))
            .collect();
        let scaled: Vec<ModelUpdate> = raw
            .iter()
            .map(|(w, g)| update(*w * factor, 0.1, g.clone()))
            .collect();

        let a = aggregate_updates(&base).expect("aggregates");
        let b = aggregate_updates(&scaled).expect("aggregates");
        for i in 0..2 {
            prop_assert!((a.gradients["layer"][i] - b.gradients["layer"][i]).abs() < 1e-9);
        }
    }
}
