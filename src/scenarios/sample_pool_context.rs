//! Runs the estimator on recorded-bid pools instead of quantile grids.
//!
//! Pool bids come from other auctions with their own buyer history. When drawn as competitors
//! they must take the focal auction's context and keep only their own offer and financing terms.
//! Bidder type mix and competitor count come from per-observed-type distributions.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::Distribution;
use crate::competitors::{CompetitorModel, CumulativeDistribution, SampleBidPool};
use crate::estimator::{CostEstimator, EstimatorConfig};
use crate::logger::{Logger, LogEvent};
use crate::scenarios::{cell_mean_bid, check, finish, random_context, run_variant, scenario_params, scenario_rng, synthetic_bids};
use crate::tensor::CellTensor;
use crate::types::{AuctionTraits, Bid, Financing};
use crate::utils;
use crate::logln;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "sample_pool_context",
    run,
});

const POOL_SIZE: usize = 2000;

fn sample_pool_model(traits: AuctionTraits, rng: &mut StdRng) -> Result<CompetitorModel, Box<dyn std::error::Error>> {
    let pool = CellTensor::from_fn(&traits, POOL_SIZE, |b, o, u| {
        let dist = utils::lognormal_dist(cell_mean_bid(b, o, u), 35.0);
        Ok((0..POOL_SIZE)
            .map(|_| {
                let mut bid = Bid::new(dist.sample(rng), b, random_context(o, rng));
                let loan_offered = rng.gen_bool(0.4);
                bid.financing = Some(Financing {
                    loan_offered,
                    us_panel: rng.gen_bool(0.3),
                    chinese_panel: rng.gen_bool(0.5),
                    loan_rate: if loan_offered { rng.gen_range(0.02..0.08) } else { 0.0 },
                    relative_system_size: rng.gen_range(0.5..1.5),
                });
                bid
            })
            .collect())
    })?;
    let bidder_type_dist = vec![
        CumulativeDistribution::from_probabilities(&[0.5, 0.3, 0.2])?,
        CumulativeDistribution::from_probabilities(&[0.2, 0.3, 0.5])?,
    ];
    // Bin k: k competitors beside the focal bid
    let num_bid_dist = vec![
        CumulativeDistribution::from_probabilities(&[0.0, 0.1, 0.2, 0.3, 0.2, 0.1, 0.1])?,
        CumulativeDistribution::from_probabilities(&[0.0, 0.0, 0.0, 0.25, 0.25, 0.25, 0.25])?,
    ];
    Ok(CompetitorModel::new(traits, Box::new(SampleBidPool::new(pool)))?
        .with_bidder_type_distribution(bidder_type_dist)?
        .with_num_bid_distribution(num_bid_dist)?)
}

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let traits = AuctionTraits::new(3, 2, 2)?;
    let mut rng = scenario_rng(404);
    let model = sample_pool_model(traits, &mut rng)?;
    let params = scenario_params();
    let bids = synthetic_bids(&traits, 18, &mut rng);

    logln!(logger, LogEvent::Scenario, "Competitor source: {}", model.source_name());

    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");
    let mut errors: Vec<String> = Vec::new();

    let mut foreign_context = 0;
    let mut missing_financing = 0;
    let mut counts = Vec::new();
    let mut draw_rng = scenario_rng(405);
    for focal in &bids {
        let count = model.draw_competitor_count(focal.context.obs_auc_type, &mut draw_rng)?;
        counts.push(count);
        for competitor in model.draw_competitors(focal, 0, count, &mut draw_rng)? {
            if competitor.context != focal.context {
                foreign_context += 1;
            }
            if competitor.financing.is_none() {
                missing_financing += 1;
            }
        }
    }
    check(foreign_context == 0, format!("Drawn competitors share the focal auction context: {} violations", foreign_context), &mut errors, logger);
    check(missing_financing == 0, format!("Drawn competitors keep their financing terms: {} missing", missing_financing), &mut errors, logger);
    let counts_in_range = counts.iter().all(|&c| (1..=6).contains(&c));
    check(counts_in_range, format!("Competitor counts follow the bid count distribution: {:?}", counts), &mut errors, logger);

    let config = EstimatorConfig {
        num_simulations: 200,
        base_seed: utils::get_seed(41),
        ..EstimatorConfig::default()
    };
    let estimator = CostEstimator::new(&model, &params, config)?;
    let results = run_variant(&estimator, &bids, false, scenario_name, "sample-pool", logger)?;

    let mut bad_costs = 0;
    for (bid, result) in bids.iter().zip(&results) {
        match result {
            Ok(estimate) => {
                bad_costs += estimate
                    .per_unobs_type
                    .iter()
                    .filter(|cost| !cost.implied_cost.is_finite() || cost.implied_cost >= bid.amount)
                    .count();
            }
            Err(_) => bad_costs += traits.num_unobs_auc_types,
        }
    }
    check(bad_costs == 0, format!("Finite implied costs below bid amounts: {} violations", bad_costs), &mut errors, logger);

    finish(scenario_name, errors)
}
