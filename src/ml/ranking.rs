// ============================================================
// Layer 5 — Ranking Metrics
// ============================================================
// Mean average precision for multi-label classification.
//
// Per class: rank every sample by its score, walk down the list
// and average the precision at each positive. Classes without a
// single positive have no AP and are left out of the mean.
//
// Scores and targets are row-major [samples, classes] buffers,
// collected on the host after each validation batch.

/// Average precision of one class. `None` when it has no positives.
pub fn average_precision(scores: &[f32], targets: &[f32]) -> Option<f64> {
    let positives = targets.iter().filter(|&&t| t > 0.5).count();
    if positives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut hits = 0usize;
    let mut precision_sum = 0.0f64;
    for (rank, &i) in order.iter().enumerate() {
        if targets[i] > 0.5 {
            hits += 1;
            precision_sum += hits as f64 / (rank + 1) as f64;
        }
    }
    Some(precision_sum / positives as f64)
}

/// Macro-averaged AP over the classes that have positives.
pub fn mean_average_precision(scores: &[f32], targets: &[f32], num_classes: usize) -> Option<f64> {
    if num_classes == 0 || scores.len() != targets.len() {
        return None;
    }
    let samples = scores.len() / num_classes;

    let column = |buf: &[f32], c: usize| -> Vec<f32> {
        (0..samples).map(|s| buf[s * num_classes + c]).collect()
    };
    let aps: Vec<f64> = (0..num_classes)
        .filter_map(|c| average_precision(&column(scores, c), &column(targets, c)))
        .collect();

    if aps.is_empty() {
        None
    } else {
        Some(aps.iter().sum::<f64>() / aps.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_ranking_is_one() {
        let ap = average_precision(&[0.9, 0.8, 0.1], &[1.0, 1.0, 0.0]).unwrap();
        assert!((ap - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_interleaved_ranking() {
        // positives at ranks 1 and 3 → (1/1 + 2/3) / 2
        let ap = average_precision(&[0.9, 0.5, 0.3], &[1.0, 0.0, 1.0]).unwrap();
        assert!((ap - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_classes_without_positives_are_skipped() {
        // class 0 perfect, class 1 never positive
        let scores  = [0.9, 0.2, 0.1, 0.7];
        let targets = [1.0, 0.0, 0.0, 0.0];
        let map = mean_average_precision(&scores, &targets, 2).unwrap();
        assert!((map - 1.0).abs() < 1e-12);
        assert!(average_precision(&[0.3], &[0.0]).is_none());
        assert!(mean_average_precision(&[0.1, 0.2], &[0.0, 0.0], 2).is_none());
    }
}
