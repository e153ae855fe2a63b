//! Compares the two commission factors in use (κ = 1.0 and κ = 0.85) on the same market.
//!
//! The factor only rescales the inverted cost, so with identical seeds the simulated
//! probabilities and slopes must match exactly and the costs must differ by the factor.

use crate::estimator::{CostEstimator, EstimatorConfig};
use crate::logger::{Logger, LogEvent};
use crate::scenarios::{check, finish, lognormal_quantile_model, run_variant, scenario_params, scenario_rng, synthetic_bids};
use crate::types::AuctionTraits;
use crate::utils;
use crate::logln;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "commission_variants",
    run,
});

const REDUCED_COMMISSION: f64 = 0.85;

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let traits = AuctionTraits::new(2, 2, 3)?;
    let mut rng = scenario_rng(202);
    let model = lognormal_quantile_model(traits, utils::QUANTILE_GRID_SIZE, &mut rng)?;
    let params = scenario_params();
    let bids = synthetic_bids(&traits, 16, &mut rng);

    let full_config = EstimatorConfig {
        num_simulations: 200,
        commission_factor: 1.0,
        base_seed: utils::get_seed(13),
    };
    let reduced_config = EstimatorConfig {
        commission_factor: REDUCED_COMMISSION,
        ..full_config.clone()
    };
    let full = CostEstimator::new(&model, &params, full_config)?;
    let reduced = CostEstimator::new(&model, &params, reduced_config)?;
    let full_results = run_variant(&full, &bids, false, scenario_name, "commission-1.00", logger)?;
    let reduced_results = run_variant(&reduced, &bids, false, scenario_name, "commission-0.85", logger)?;

    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");
    let mut errors: Vec<String> = Vec::new();

    let mut compared = 0;
    let mut probability_mismatches = 0;
    let mut cost_mismatches = 0;
    for (a, b) in full_results.iter().zip(&reduced_results) {
        let (Ok(a), Ok(b)) = (a, b) else { continue };
        for (x, y) in a.per_unobs_type.iter().zip(&b.per_unobs_type) {
            compared += 1;
            if x.mean_probability != y.mean_probability || x.mean_derivative != y.mean_derivative {
                probability_mismatches += 1;
            }
            if !utils::approx_eq(y.implied_cost, REDUCED_COMMISSION * x.implied_cost, 1e-12) {
                cost_mismatches += 1;
            }
        }
    }
    check(compared == bids.len() * traits.num_unobs_auc_types,
        format!("Every bid and unobserved type estimated under both factors: {} of {}", compared, bids.len() * traits.num_unobs_auc_types),
        &mut errors, logger);
    check(probability_mismatches == 0,
        format!("Simulated probabilities and slopes independent of the factor: {} mismatches", probability_mismatches),
        &mut errors, logger);
    check(cost_mismatches == 0,
        format!("Costs at κ = {} equal {} × costs at κ = 1: {} mismatches", REDUCED_COMMISSION, REDUCED_COMMISSION, cost_mismatches),
        &mut errors, logger);

    finish(scenario_name, errors)
}
