//! Monte Carlo averaging and cost inversion
//!
//! For every participating bid and every unobserved auction type the auction is simulated
//! `num_simulations` times. Averaged selection probability P and slope P' give the implied cost
//! from the seller's first-order condition: cost = commission_factor * (amount + P / P').
//!
//! Bids are independent of each other, so a batch is estimated as a parallel map where each bid
//! owns a generator seeded from `(base_seed, bid index)`. Sequential and parallel batches are
//! therefore identical.

use rand::rngs::StdRng;
use rayon::prelude::*;
use crate::competitors::CompetitorModel;
use crate::errors::{EstimationError, Result};
use crate::simulator::{AuctionSimulator, SimulatedAuction};
use crate::types::{Bid, BidSelectionParams};
use crate::utils::{task_rng, DEFAULT_BASE_SEED, DEFAULT_COMMISSION_FACTOR, DEFAULT_NUM_SIMULATIONS, SENTINEL};

/// Callback receiving `(unobserved auction type, draw index, auction)` for every simulated auction
pub type DrawObserver<'f> = dyn FnMut(usize, usize, &SimulatedAuction) + 'f;

/// Settings of the averaging and inversion step
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    pub num_simulations: usize,
    /// Multiplier on the inverted cost (κ)
    pub commission_factor: f64,
    pub base_seed: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            num_simulations: DEFAULT_NUM_SIMULATIONS,
            commission_factor: DEFAULT_COMMISSION_FACTOR,
            base_seed: DEFAULT_BASE_SEED,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_simulations == 0 {
            return Err(EstimationError::Configuration("number of simulations must be positive".to_string()));
        }
        if !self.commission_factor.is_finite() || self.commission_factor <= 0.0 {
            return Err(EstimationError::Configuration(format!(
                "commission factor must be positive, got {}",
                self.commission_factor
            )));
        }
        Ok(())
    }
}

/// Averaged outcome for one bid and one unobserved auction type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub mean_probability: f64,
    pub mean_derivative: f64,
    pub implied_cost: f64,
}

impl CostEstimate {
    /// Row value for bids that are not simulated
    pub fn sentinel() -> Self {
        Self {
            mean_probability: SENTINEL,
            mean_derivative: SENTINEL,
            implied_cost: SENTINEL,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::sentinel()
    }
}

/// Estimates of one bid, indexed by unobserved auction type
#[derive(Debug, Clone, PartialEq)]
pub struct BidEstimate {
    pub per_unobs_type: Vec<CostEstimate>,
}

impl BidEstimate {
    pub fn sentinel(num_unobs_auc_types: usize) -> Self {
        Self {
            per_unobs_type: vec![CostEstimate::sentinel(); num_unobs_auc_types],
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.per_unobs_type.iter().all(CostEstimate::is_sentinel)
    }
}

/// Cost implied by the first-order condition of the seller's pricing problem
pub fn implied_cost(amount: f64, mean_probability: f64, mean_derivative: f64, commission_factor: f64) -> Result<f64> {
    if mean_derivative == 0.0 || !mean_derivative.is_finite() {
        return Err(EstimationError::ModelDegeneracy(format!(
            "mean probability derivative is {} for bid amount {}",
            mean_derivative, amount
        )));
    }
    Ok(commission_factor * (amount + mean_probability / mean_derivative))
}

/// Averages simulated auctions and inverts them into costs
pub struct CostEstimator<'a> {
    simulator: AuctionSimulator<'a>,
    pub config: EstimatorConfig,
}

impl<'a> CostEstimator<'a> {
    pub fn new(model: &'a CompetitorModel, params: &'a BidSelectionParams, config: EstimatorConfig) -> Result<Self> {
        params.validate()?;
        config.validate()?;
        Ok(Self {
            simulator: AuctionSimulator::new(model, params),
            config,
        })
    }

    pub fn num_unobs_auc_types(&self) -> usize {
        self.simulator.model.traits.num_unobs_auc_types
    }

    /// Average `num_simulations` auctions of `focal` under one unobserved auction type.
    /// `on_draw` sees every simulated auction with its draw index.
    pub fn average(&self, focal: &Bid, unobs_auc_type: usize, rng: &mut StdRng, on_draw: &mut DrawObserver<'_>) -> Result<CostEstimate> {
        let mut prob_sum = 0.0;
        let mut prob_der_sum = 0.0;
        for draw in 0..self.config.num_simulations {
            let auction = self.simulator.simulate(focal, unobs_auc_type, rng)?;
            prob_sum += auction.outcome.probability;
            prob_der_sum += auction.outcome.derivative;
            on_draw(unobs_auc_type, draw, &auction);
        }
        let n = self.config.num_simulations as f64;
        let mean_probability = prob_sum / n;
        let mean_derivative = prob_der_sum / n;
        if !(0.0..=1.0).contains(&mean_probability) {
            return Err(EstimationError::ModelDegeneracy(format!(
                "mean selection probability {} outside [0, 1]",
                mean_probability
            )));
        }
        let implied_cost = implied_cost(focal.amount, mean_probability, mean_derivative, self.config.commission_factor)?;
        Ok(CostEstimate {
            mean_probability,
            mean_derivative,
            implied_cost,
        })
    }

    /// Estimate one bid for every unobserved auction type
    pub fn estimate_bid(&self, focal: &Bid, rng: &mut StdRng) -> Result<BidEstimate> {
        self.estimate_bid_with(focal, rng, &mut |_, _, _| {})
    }

    /// Estimate one bid, passing every simulated auction to `on_draw`
    pub fn estimate_bid_with(&self, focal: &Bid, rng: &mut StdRng, on_draw: &mut DrawObserver<'_>) -> Result<BidEstimate> {
        if !focal.is_simulated() {
            return Ok(BidEstimate::sentinel(self.num_unobs_auc_types()));
        }
        let per_unobs_type = (0..self.num_unobs_auc_types())
            .map(|unobs_auc_type| self.average(focal, unobs_auc_type, rng, on_draw))
            .collect::<Result<Vec<_>>>()?;
        Ok(BidEstimate { per_unobs_type })
    }

    /// Estimate a batch of bids in parallel; failures are reported per bid
    pub fn estimate_all(&self, bids: &[Bid]) -> Vec<Result<BidEstimate>> {
        bids.par_iter()
            .enumerate()
            .map(|(index, bid)| {
                let mut rng = task_rng(self.config.base_seed, index);
                self.estimate_bid(bid, &mut rng)
            })
            .collect()
    }

    /// Same as `estimate_all`, one bid after another
    pub fn estimate_all_sequential(&self, bids: &[Bid]) -> Vec<Result<BidEstimate>> {
        bids.iter()
            .enumerate()
            .map(|(index, bid)| {
                let mut rng = task_rng(self.config.base_seed, index);
                self.estimate_bid(bid, &mut rng)
            })
            .collect()
    }
}

/// Batch-level counts and averages for logging
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationSummary {
    pub total_bids: usize,
    pub simulated_bids: usize,
    pub sentinel_bids: usize,
    pub failed_bids: usize,
    /// Mean implied cost over simulated bids, per unobserved auction type
    pub mean_implied_cost: Vec<f64>,
}

impl EstimationSummary {
    pub fn new(results: &[Result<BidEstimate>], num_unobs_auc_types: usize) -> Self {
        let mut sums = vec![0.0; num_unobs_auc_types];
        let mut simulated_bids = 0;
        let mut sentinel_bids = 0;
        let mut failed_bids = 0;
        for result in results {
            match result {
                Ok(estimate) if estimate.is_sentinel() => sentinel_bids += 1,
                Ok(estimate) => {
                    simulated_bids += 1;
                    for (sum, cost) in sums.iter_mut().zip(&estimate.per_unobs_type) {
                        *sum += cost.implied_cost;
                    }
                }
                Err(_) => failed_bids += 1,
            }
        }
        let mean_implied_cost = sums
            .iter()
            .map(|sum| if simulated_bids > 0 { sum / simulated_bids as f64 } else { 0.0 })
            .collect();
        Self {
            total_bids: results.len(),
            simulated_bids,
            sentinel_bids,
            failed_bids,
            mean_implied_cost,
        }
    }
}
