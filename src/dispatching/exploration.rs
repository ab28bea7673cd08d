//! Epsilon-greedy exploration helpers.

use rand::Rng;

/// Exploration probability for one job.
///
/// `max(ε_min, ε_max · f_P · f_C · f_S)` with `f_C = 1 / (1 + priority)` and
/// `f_S = eligible / total`. Negative priorities count as zero.
pub fn exploration_rate(
    epsilon_min: f64,
    epsilon_max: f64,
    pressure_factor: f64,
    priority: i32,
    eligible: usize,
    total: usize,
) -> f64 {
    let f_c = 1.0 / (1.0 + priority.max(0) as f64);
    let f_s = if total == 0 {
        0.0
    } else {
        eligible as f64 / total as f64
    };
    epsilon_min.max(epsilon_max * pressure_factor * f_c * f_s)
}

/// Roulette-wheel pick over `softmax(bid / temperature)`.
///
/// Bids are shifted by their maximum before exponentiation. Returns `None`
/// only for an empty slice.
pub fn softmax_pick<R: Rng + ?Sized>(bids: &[f64], temperature: f64, rng: &mut R) -> Option<usize> {
    let max = bids.iter().copied().reduce(f64::max)?;
    let temperature = if temperature > 0.0 { temperature } else { f64::MIN_POSITIVE };
    let weights: Vec<f64> = bids.iter().map(|b| ((b - max) / temperature).exp()).collect();
    let sum: f64 = weights.iter().sum();

    let mut remaining = rng.random::<f64>() * sum;
    for (i, w) in weights.iter().enumerate() {
        remaining -= w;
        if remaining <= 0.0 {
            return Some(i);
        }
    }
    Some(bids.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_rate_floor_and_factors() {
        assert_eq!(exploration_rate(0.005, 0.05, 1.0, 0, 2, 2), 0.05);
        assert!((exploration_rate(0.005, 0.05, 1.0, 1, 1, 2) - 0.0125).abs() < 1e-12);
        assert_eq!(exploration_rate(0.005, 0.05, 0.0, 0, 2, 2), 0.005);
        assert_eq!(exploration_rate(0.0, 0.05, 1.0, -7, 1, 1), 0.05);
        assert_eq!(exploration_rate(0.0, 0.05, 1.0, 0, 0, 0), 0.0);
    }

    #[test]
    fn test_softmax_empty() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(softmax_pick(&[], 0.1, &mut rng), None);
    }

    #[test]
    fn test_softmax_prefers_high_bid() {
        let mut rng = SmallRng::seed_from_u64(42);
        let bids = [0.1, 0.9];
        let high = (0..1000)
            .filter(|_| softmax_pick(&bids, 0.1, &mut rng) == Some(1))
            .count();
        // exp(8) / (1 + exp(8)) ≈ 0.9997
        assert!(high > 990);
    }

    #[test]
    fn test_softmax_large_bids_do_not_overflow() {
        let mut rng = SmallRng::seed_from_u64(7);
        let pick = softmax_pick(&[1000.0, 1000.0], 0.1, &mut rng);
        assert!(matches!(pick, Some(0) | Some(1)));
    }
}
