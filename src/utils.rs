use rand::{rngs::StdRng, SeedableRng};
use rand_distr::LogNormal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of simulated auctions averaged per bid and unobserved auction type
pub const DEFAULT_NUM_SIMULATIONS: usize = 1000;

/// Competitors drawn beside the focal bid when no bid-count distribution is used
pub const DEFAULT_NUM_COMPETITORS: usize = 9;

/// Points on the quantile grid of every inverse-CDF cell
pub const QUANTILE_GRID_SIZE: usize = 1000;

/// Recorded bids in every sample-pool cell
pub const SAMPLE_POOL_SIZE: usize = 10000;

/// Multiplier applied to the markup-inverted cost.
/// Historical runs used both 0.85 and 1.0; 1.0 leaves the inversion untouched.
pub const DEFAULT_COMMISSION_FACTOR: f64 = 1.0;

/// Emitted for probability, derivative and cost of non-participating rows
pub const SENTINEL: f64 = -99.0;

/// Base seed used when none is given on the command line
pub const DEFAULT_BASE_SEED: u64 = 1991;

/// Scenario iteration offset, set by the scenario runner for each iteration
pub static RAND_SEED: AtomicU64 = AtomicU64::new(0);

/// Combine a fixed per-purpose seed with the current scenario iteration
pub fn get_seed(base: u64) -> u64 {
    base.wrapping_add(RAND_SEED.load(Ordering::Relaxed).wrapping_mul(1_000_003))
}

/// Generator owned by one bid's estimation task
pub fn task_rng(base_seed: u64, task_index: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(task_index as u64))
}

/// Log-normal distribution with the given mean and standard deviation
///
/// For LogNormal(μ, σ): E[X] = exp(μ + σ²/2) and Var[X] = (exp(σ²) - 1) * exp(2μ + σ²),
/// so σ² = ln(1 + s²/m²) and μ = ln(m) - σ²/2.
pub fn lognormal_dist(mean: f64, stddev: f64) -> LogNormal<f64> {
    let sigma_squared = (1.0 + (stddev * stddev) / (mean * mean)).ln();
    let mu = mean.ln() - sigma_squared / 2.0;
    LogNormal::new(mu, sigma_squared.sqrt()).expect("log-normal parameters must be finite and positive")
}

/// Relative closeness check used by scenario validations
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_distr::Distribution;

    #[test]
    fn test_task_rng_is_reproducible() {
        let a: Vec<u32> = (0..5).map({
            let mut rng = task_rng(7, 3);
            move |_| rng.gen()
        }).collect();
        let b: Vec<u32> = (0..5).map({
            let mut rng = task_rng(7, 3);
            move |_| rng.gen()
        }).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_lognormal_mean() {
        let dist = lognormal_dist(250.0, 30.0);
        let mut rng = task_rng(11, 0);
        let n = 20000;
        let mean: f64 = (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 250.0).abs() < 2.0, "sample mean {}", mean);
    }

    #[test]
    fn test_approx_eq() {
        assert!(approx_eq(100.0, 100.0 + 1e-9, 1e-10));
        assert!(!approx_eq(100.0, 101.0, 1e-3));
    }
}
