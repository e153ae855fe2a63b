//! Checks that cost inversion recovers a sensible markup in a market where cheaper offers win.
//!
//! With a negative price coefficient the selection probability falls with the bid amount,
//! so every implied cost must lie below its bid. Holding the simulated competitors fixed
//! (same generator seed), a higher bid must also imply a higher cost.

use rand::SeedableRng;
use rand::rngs::StdRng;
use crate::estimator::{CostEstimator, EstimatorConfig};
use crate::logger::{Logger, LogEvent};
use crate::scenarios::{check, finish, lognormal_quantile_model, run_variant, scenario_params, scenario_rng, synthetic_bids};
use crate::types::{AuctionTraits, Bid, BidRole};
use crate::utils;
use crate::logln;

// Register this scenario in the catalog
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "markup_recovery",
    run,
});

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let traits = AuctionTraits::new(3, 2, 2)?;
    let mut rng = scenario_rng(101);
    let model = lognormal_quantile_model(traits, utils::QUANTILE_GRID_SIZE, &mut rng)?;
    let params = scenario_params();
    let config = EstimatorConfig {
        num_simulations: 300,
        base_seed: utils::get_seed(7),
        ..EstimatorConfig::default()
    };
    let estimator = CostEstimator::new(&model, &params, config)?;

    let mut bids = synthetic_bids(&traits, 24, &mut rng);
    bids[5].role = BidRole::OutsideOption;
    bids[11].amount = 0.0;
    bids[11].role = BidRole::Placeholder;
    let results = run_variant(&estimator, &bids, false, scenario_name, "market", logger)?;

    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");
    let mut errors: Vec<String> = Vec::new();

    let failed = results.iter().filter(|r| r.is_err()).count();
    check(failed == 0, format!("All bids estimated without errors: {} failures", failed), &mut errors, logger);

    let mut above = 0;
    let mut out_of_range = 0;
    for (bid, result) in bids.iter().zip(&results) {
        let Ok(estimate) = result else { continue };
        if !bid.is_simulated() {
            continue;
        }
        for cost in &estimate.per_unobs_type {
            if cost.implied_cost >= bid.amount || !cost.implied_cost.is_finite() {
                above += 1;
            }
            if !(cost.mean_probability > 0.0 && cost.mean_probability < 1.0) {
                out_of_range += 1;
            }
        }
    }
    check(above == 0, format!("Implied cost below bid amount for every simulated bid: {} violations", above), &mut errors, logger);
    check(out_of_range == 0, format!("Mean selection probability inside (0, 1): {} violations", out_of_range), &mut errors, logger);

    let sentinel_ok = [5, 11].iter().all(|&i| results[i].as_ref().map(|e| e.is_sentinel()).unwrap_or(false));
    check(sentinel_ok, "Outside-option and placeholder rows carry the sentinel triple".to_string(), &mut errors, logger);

    // Same auction, same competitor draws, rising bid amounts
    let template = bids[0].clone();
    let mut previous_cost: Option<f64> = None;
    let mut non_increasing = 0;
    for step in 0..8 {
        let focal = Bid {
            amount: 150.0 + 15.0 * step as f64,
            ..template.clone()
        };
        let seed = utils::get_seed(55);
        let estimate = estimator.estimate_bid(&focal, &mut StdRng::seed_from_u64(seed))?;
        let cost = estimate.per_unobs_type[0].implied_cost;
        logln!(logger, LogEvent::Scenario, "amount {:.2} -> implied cost {:.4}", focal.amount, cost);
        if previous_cost.is_some_and(|previous| cost <= previous) {
            non_increasing += 1;
        }
        previous_cost = Some(cost);
    }
    check(non_increasing == 0, format!("Implied cost rises with the bid amount: {} violations", non_increasing), &mut errors, logger);

    finish(scenario_name, errors)
}
