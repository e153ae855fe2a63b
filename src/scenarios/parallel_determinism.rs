use crate::errors::Result as EstimationResult;
use crate::estimator::{BidEstimate, CostEstimator, EstimatorConfig};
use crate::logger::{Logger, LogEvent};
use crate::scenarios::{check, finish, lognormal_quantile_model, run_variant, scenario_params, scenario_rng, synthetic_bids};
use crate::types::AuctionTraits;
use crate::utils;
use crate::logln;

// Parallel and sequential batches must agree bit for bit, and a repeated parallel run must too
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "parallel_determinism",
    run,
});

/// Bids whose results differ; a failure on either side counts as a difference
fn differing_bids(a: &[EstimationResult<BidEstimate>], b: &[EstimationResult<BidEstimate>]) -> usize {
    a.iter()
        .zip(b)
        .filter(|(x, y)| match (x, y) {
            (Ok(x), Ok(y)) => x != y,
            _ => true,
        })
        .count()
}

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let traits = AuctionTraits::new(4, 3, 2)?;
    let mut rng = scenario_rng(303);
    let model = lognormal_quantile_model(traits, utils::QUANTILE_GRID_SIZE, &mut rng)?;
    let params = scenario_params();
    let bids = synthetic_bids(&traits, 40, &mut rng);
    let config = EstimatorConfig {
        num_simulations: 100,
        base_seed: utils::get_seed(29),
        ..EstimatorConfig::default()
    };
    let estimator = CostEstimator::new(&model, &params, config)?;

    let parallel = run_variant(&estimator, &bids, false, scenario_name, "parallel", logger)?;
    let sequential = run_variant(&estimator, &bids, true, scenario_name, "sequential", logger)?;
    let repeated = run_variant(&estimator, &bids, false, scenario_name, "parallel-repeat", logger)?;

    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");
    let mut errors: Vec<String> = Vec::new();

    let vs_sequential = differing_bids(&parallel, &sequential);
    let vs_repeat = differing_bids(&parallel, &repeated);
    check(vs_sequential == 0, format!("Parallel batch equals sequential batch: {} differing bids", vs_sequential), &mut errors, logger);
    check(vs_repeat == 0, format!("Repeated parallel batch is identical: {} differing bids", vs_repeat), &mut errors, logger);

    finish(scenario_name, errors)
}
