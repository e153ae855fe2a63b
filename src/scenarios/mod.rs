use std::error::Error;
use std::path::PathBuf;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Distribution;
use crate::competitors::{CompetitorModel, InverseCdfTable};
use crate::errors::Result as EstimationResult;
use crate::estimator::{BidEstimate, CostEstimator, EstimationSummary};
use crate::logger::{sanitize_filename, FileReceiver, LogEvent, Logger};
use crate::tensor::CellTensor;
use crate::types::{AuctionContext, AuctionTraits, Bid, BidSelectionParams};
use crate::utils;
use crate::{errln, logln};

/// Function type for scenario entry functions
pub type ScenarioFn = fn(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn Error>>;

/// Entry in the scenario catalog
#[derive(Clone)]
pub struct ScenarioEntry {
    pub short_name: &'static str,
    pub run: ScenarioFn,
}

// Create an inventory collection for scenario entries
inventory::collect!(ScenarioEntry);

/// Get all registered scenarios from the catalog
pub fn get_scenario_catalog() -> Vec<ScenarioEntry> {
    let mut catalog: Vec<ScenarioEntry> = inventory::iter::<ScenarioEntry>
        .into_iter()
        .cloned()
        .collect();
    catalog.sort_by_key(|entry| entry.short_name);
    catalog
}

// Scenario modules
pub mod markup_recovery;
pub mod commission_variants;
pub mod parallel_determinism;
pub mod sample_pool_context;

/// Coefficients of a market where cheaper offers are preferred
pub fn scenario_params() -> BidSelectionParams {
    BidSelectionParams {
        bid_amount_coeff: -0.02,
        sell_rep_coeff: 0.15,
        nest_constant: 0.5,
        lnnumreps_coeff: 0.1,
        buyrep_coeff: 0.3,
        lnprevcancel_coeff: -0.25,
        nest_corr: 0.6,
    }
}

/// Mean competitor bid of a cell; higher bidder types and unobserved types bid more
pub fn cell_mean_bid(bidder_type: usize, obs_auc_type: usize, unobs_auc_type: usize) -> f64 {
    200.0 + 25.0 * bidder_type as f64 - 15.0 * obs_auc_type as f64 + 20.0 * unobs_auc_type as f64
}

/// Quantile grids of log-normal competitor bids, one per cell
pub fn lognormal_quantile_model(traits: AuctionTraits, grid_size: usize, rng: &mut StdRng) -> EstimationResult<CompetitorModel> {
    let table = CellTensor::from_fn(&traits, grid_size, |b, o, u| {
        let dist = utils::lognormal_dist(cell_mean_bid(b, o, u), 30.0);
        let mut quantiles: Vec<f64> = (0..grid_size).map(|_| dist.sample(rng)).collect();
        quantiles.sort_by(|x, y| x.total_cmp(y));
        Ok(quantiles)
    })?;
    CompetitorModel::new(traits, Box::new(InverseCdfTable::new(table)))
}

/// Random buyer history for an auction of the given observed type
pub fn random_context(obs_auc_type: usize, rng: &mut StdRng) -> AuctionContext {
    let num_reps = rng.gen_range(0..30);
    AuctionContext {
        obs_auc_type,
        sum_rep: if num_reps > 0 { rng.gen_range(0..=num_reps) } else { 0 },
        num_reps,
        previous_auctions: rng.gen_range(0..10),
        previous_cancels: rng.gen_range(0..3),
    }
}

/// Focal bids spread over all bidder and observed auction types
pub fn synthetic_bids(traits: &AuctionTraits, count: usize, rng: &mut StdRng) -> Vec<Bid> {
    (0..count)
        .map(|i| {
            let bidder_type = i % traits.num_bidder_types;
            let obs_auc_type = (i / traits.num_bidder_types) % traits.num_obs_auc_types;
            let dist = utils::lognormal_dist(cell_mean_bid(bidder_type, obs_auc_type, 0), 30.0);
            Bid::new(dist.sample(rng), bidder_type, random_context(obs_auc_type, rng))
        })
        .collect()
}

/// Fresh generator for scenario data, varied by the scenario iteration
pub fn scenario_rng(base: u64) -> StdRng {
    StdRng::seed_from_u64(utils::get_seed(base))
}

/// Estimate a batch of bids as one named variant, logging every bid to `log/{scenario}/variant-{variant}.log`
pub fn run_variant(
    estimator: &CostEstimator,
    bids: &[Bid],
    sequential: bool,
    scenario_name: &str,
    variant_name: &str,
    logger: &mut Logger,
) -> Result<Vec<EstimationResult<BidEstimate>>, Box<dyn Error>> {
    let path = PathBuf::from(format!(
        "log/{}/variant-{}.log",
        sanitize_filename(scenario_name),
        sanitize_filename(variant_name)
    ));
    let variant_receiver_id = logger.add_receiver(FileReceiver::new(&path, vec![LogEvent::Bid])?);

    logln!(logger, LogEvent::Scenario, "\n=== {} ({} bids, {} simulations, κ = {}) ===",
        variant_name, bids.len(), estimator.config.num_simulations, estimator.config.commission_factor);
    let results = if sequential {
        estimator.estimate_all_sequential(bids)
    } else {
        estimator.estimate_all(bids)
    };
    for (index, (bid, result)) in bids.iter().zip(&results).enumerate() {
        match result {
            Ok(estimate) => {
                let costs: Vec<String> = estimate.per_unobs_type.iter().map(|c| format!("{:.4}", c.implied_cost)).collect();
                logln!(logger, LogEvent::Bid, "bid {}: amount {:.4}, type {}, costs [{}]", index, bid.amount, bid.bidder_type + 1, costs.join(", "));
            }
            Err(e) => errln!(logger, LogEvent::Bid, "bid {}: {}", index, e),
        }
    }
    let summary = EstimationSummary::new(&results, estimator.num_unobs_auc_types());
    logln!(logger, LogEvent::Scenario, "{:?}", summary);

    logger.remove_receiver(variant_receiver_id);
    Ok(results)
}

/// Log a validation line and collect the message when it failed
pub fn check(passed: bool, msg: String, errors: &mut Vec<String>, logger: &mut Logger) {
    if passed {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
        errors.push(msg);
    }
}

/// Turn the collected validation failures into the scenario result
pub fn finish(scenario_name: &str, errors: Vec<String>) -> Result<(), Box<dyn Error>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("Scenario '{}' validation failed:\n{}", scenario_name, errors.join("\n")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lists_all_scenarios() {
        let names: Vec<&str> = get_scenario_catalog().iter().map(|entry| entry.short_name).collect();
        assert_eq!(names, vec!["commission_variants", "markup_recovery", "parallel_determinism", "sample_pool_context"]);
    }

    #[test]
    fn test_synthetic_market() {
        let traits = AuctionTraits::new(2, 2, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let model = lognormal_quantile_model(traits, 100, &mut rng).unwrap();
        assert_eq!(model.source_name(), "inverse-CDF");
        let bids = synthetic_bids(&traits, 10, &mut rng);
        assert_eq!(bids.len(), 10);
        assert!(bids.iter().all(|bid| bid.amount > 0.0 && bid.context.obs_auc_type < 2));
    }

    #[test]
    fn test_finish() {
        assert!(finish("demo", vec![]).is_ok());
        let err = finish("demo", vec!["a".to_string(), "b".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "Scenario 'demo' validation failed:\na\nb");
    }
}
