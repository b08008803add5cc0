//! Weighted federated averaging.
//!
//! Pure functions over participant updates; the coordinator decides when to
//! call them, this module decides only what the numbers are.

use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ModelUpdate, RoundAggregation, RoundMetrics};

/// Average the per-layer vectors of `updates`, weighted by each update's
/// `data_size`.
///
/// For every layer name appearing in any update, the aggregated vector is
/// `Σ wᵢ·gᵢ / Σ wᵢ` over the updates that carry that layer. The first-seen
/// vector fixes the layer's length; indices past it in any contributor are
/// ignored, and shorter contributors contribute zeros at the tail.
///
/// Fails when there are no updates or the total weight is zero.
pub fn aggregate_updates(updates: &[ModelUpdate]) -> DomainResult<RoundAggregation> {
    if updates.is_empty() {
        return Err(DomainError::AggregationFailed(
            "no participant updates to aggregate".to_string(),
        ));
    }

    let total_weight: f64 = updates.iter().map(|u| u.data_size.max(0) as f64).sum();
    if total_weight <= 0.0 {
        return Err(DomainError::AggregationFailed(
            "total participant weight is zero".to_string(),
        ));
    }

    let gradient_sets: Vec<(f64, &HashMap<String, Vec<f64>>)> = updates
        .iter()
        .map(|u| (u.data_size.max(0) as f64, &u.gradients))
        .collect();
    let gradients = weighted_layer_average(&gradient_sets);

    let weight_sets: Vec<(f64, &HashMap<String, Vec<f64>>)> = updates
        .iter()
        .filter_map(|u| u.weights.as_ref().map(|w| (u.data_size.max(0) as f64, w)))
        .collect();
    let weights = if weight_sets.is_empty() {
        None
    } else {
        Some(weighted_layer_average(&weight_sets))
    };

    let metrics = round_metrics(updates, total_weight);

    Ok(RoundAggregation { gradients, weights, metrics })
}

/// Weighted per-layer mean of a collection of layer maps.
fn weighted_layer_average(
    sets: &[(f64, &HashMap<String, Vec<f64>>)],
) -> HashMap<String, Vec<f64>> {
    // Layer order: first appearance across contributors, so the first-seen
    // vector length rule is well defined.
    let mut layer_order: Vec<&str> = Vec::new();
    for (_, layers) in sets {
        let mut names: Vec<&str> = layers.keys().map(String::as_str).collect();
        names.sort_unstable();
        for name in names {
            if !layer_order.contains(&name) {
                layer_order.push(name);
            }
        }
    }

    let mut averaged = HashMap::new();
    for layer in layer_order {
        let mut length = 0usize;
        let mut sums: Vec<f64> = Vec::new();
        let mut layer_weight = 0.0;

        for (weight, layers) in sets {
            let Some(vector) = layers.get(layer) else { continue };
            if sums.is_empty() {
                length = vector.len();
                sums = vec![0.0; length];
            }
            layer_weight += weight;
            for (i, value) in vector.iter().take(length).enumerate() {
                sums[i] += weight * value;
            }
        }

        if layer_weight > 0.0 {
            for sum in &mut sums {
                *sum /= layer_weight;
            }
            averaged.insert(layer.to_string(), sums);
        }
    }

    averaged
}

/// Global round metrics: weighted loss/accuracy means, unbiased loss
/// variance, and the convergence score `max(0, 1 − variance / average_loss)`.
fn round_metrics(updates: &[ModelUpdate], total_weight: f64) -> RoundMetrics {
    let average_loss = updates
        .iter()
        .map(|u| u.data_size.max(0) as f64 * u.loss)
        .sum::<f64>()
        / total_weight;
    let average_accuracy = updates
        .iter()
        .map(|u| u.data_size.max(0) as f64 * u.accuracy)
        .sum::<f64>()
        / total_weight;

    let n = updates.len();
    let loss_variance = if n > 1 {
        updates
            .iter()
            .map(|u| (u.loss - average_loss).powi(2))
            .sum::<f64>()
            / (n - 1) as f64
    } else {
        0.0
    };

    let convergence = if loss_variance == 0.0 {
        1.0
    } else if average_loss <= 0.0 {
        0.0
    } else {
        (1.0 - loss_variance / average_loss).max(0.0)
    };

    RoundMetrics {
        average_loss,
        average_accuracy,
        loss_variance,
        convergence,
        participant_count: n,
        total_weight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(data_size: i64, loss: f64, layers: &[(&str, &[f64])]) -> ModelUpdate {
        ModelUpdate {
            gradients: layers
                .iter()
                .map(|(name, values)| ((*name).to_string(), values.to_vec()))
                .collect(),
            weights: None,
            update_type: "gradient".to_string(),
            data_size,
            loss,
            accuracy: 0.0,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn two_participant_weighted_average() {
        let updates = vec![
            update(100, 0.5, &[("L", &[1.0, 1.0])]),
            update(300, 0.5, &[("L", &[3.0, 3.0])]),
        ];
        let agg = aggregate_updates(&updates).expect("should aggregate");
        assert_eq!(agg.gradients["L"], vec![2.5, 2.5]);
        assert!((agg.metrics.total_weight - 400.0).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregate_matches_formula_to_machine_precision() {
        let updates = vec![
            update(7, 1.0, &[("a", &[0.25, -1.5, 3.0])]),
            update(13, 1.0, &[("a", &[2.0, 0.5, -0.75])]),
            update(5, 1.0, &[("a", &[-4.0, 1.25, 0.0])]),
        ];
        let agg = aggregate_updates(&updates).expect("should aggregate");
        let w = [7.0, 13.0, 5.0];
        let g = [[0.25, -1.5, 3.0], [2.0, 0.5, -0.75], [-4.0, 1.25, 0.0]];
        let total: f64 = w.iter().sum();
        for i in 0..3 {
            let expected: f64 = (0..3).map(|p| w[p] * g[p][i]).sum::<f64>() / total;
            assert!((agg.gradients["a"][i] - expected).abs() < 1e-15);
        }
    }

    #[test]
    fn first_seen_vector_fixes_layer_length() {
        let updates = vec![
            update(1, 0.0, &[("L", &[1.0, 1.0])]),
            update(1, 0.0, &[("L", &[3.0, 3.0, 99.0])]),
        ];
        let agg = aggregate_updates(&updates).expect("should aggregate");
        // The third index of the longer contributor is ignored.
        assert_eq!(agg.gradients["L"], vec![2.0, 2.0]);
    }

    #[test]
    fn layer_missing_from_one_participant_averages_over_contributors() {
        let updates = vec![
            update(100, 0.0, &[("shared", &[2.0]), ("only_a", &[10.0])]),
            update(300, 0.0, &[("shared", &[6.0])]),
        ];
        let agg = aggregate_updates(&updates).expect("should aggregate");
        assert_eq!(agg.gradients["shared"], vec![5.0]);
        assert_eq!(agg.gradients["only_a"], vec![10.0]);
    }

    #[test]
    fn zero_participants_fails() {
        assert!(aggregate_updates(&[]).is_err());
    }

    #[test]
    fn zero_total_weight_fails() {
        let updates = vec![update(0, 0.5, &[("L", &[1.0])]), update(0, 0.5, &[("L", &[2.0])])];
        assert!(aggregate_updates(&updates).is_err());
    }

    #[test]
    fn identical_losses_give_full_convergence() {
        let updates = vec![
            update(100, 0.5, &[("L", &[1.0])]),
            update(300, 0.5, &[("L", &[3.0])]),
        ];
        let agg = aggregate_updates(&updates).expect("should aggregate");
        assert!((agg.metrics.average_loss - 0.5).abs() < 1e-15);
        assert_eq!(agg.metrics.loss_variance, 0.0);
        assert_eq!(agg.metrics.convergence, 1.0);
    }

    #[test]
    fn variance_is_unbiased_sample_variance() {
        let updates = vec![
            update(1, 1.0, &[("L", &[0.0])]),
            update(1, 3.0, &[("L", &[0.0])]),
        ];
        let agg = aggregate_updates(&updates).expect("should aggregate");
        // mean 2.0, deviations ±1, unbiased variance = (1 + 1) / (2 − 1) = 2
        assert!((agg.metrics.average_loss - 2.0).abs() < 1e-15);
        assert!((agg.metrics.loss_variance - 2.0).abs() < 1e-15);
        assert_eq!(agg.metrics.convergence, 0.0);
    }

    #[test]
    fn weights_are_averaged_when_present() {
        let mut a = update(100, 0.0, &[("L", &[1.0])]);
        a.weights = Some([("w".to_string(), vec![1.0])].into_iter().collect());
        let mut b = update(300, 0.0, &[("L", &[3.0])]);
        b.weights = Some([("w".to_string(), vec![3.0])].into_iter().collect());

        let agg = aggregate_updates(&[a, b]).expect("should aggregate");
        let weights = agg.weights.expect("weights should be averaged");
        assert_eq!(weights["w"], vec![2.5]);
    }
}
