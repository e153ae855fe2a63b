//! Empirical competitor model
//!
//! Competitor bids are drawn from what was recorded in the market, one cell per
//! `(bidder type, observed auction type, unobserved auction type)`. Two representations
//! are supported behind the `CompetitorSource` trait:
//! - Inverse-CDF tables: a quantile grid of bid amounts, sampled by a uniform quantile index
//! - Sample pools: full recorded bids, sampled by a uniform pool index
//!
//! The bidder type of each competitor is uniform unless a per-observed-type cumulative
//! distribution is supplied. The same holds for the number of competitors.

use rand::rngs::StdRng;
use rand::Rng;
use crate::errors::{EstimationError, Result};
use crate::tensor::CellTensor;
use crate::types::{AuctionContext, AuctionTraits, Bid};
use crate::utils::DEFAULT_NUM_COMPETITORS;

/// Tolerance on the last value of a cumulative distribution
const CUMULATIVE_TOLERANCE: f64 = 1e-6;

/// Source of single competitor bids for a given cell
pub trait CompetitorSource: Send + Sync {
    /// Draw one competitor of `bidder_type` for the auction described by `context`
    /// and the unobserved auction type `unobs_auc_type`
    fn draw(&self, bidder_type: usize, context: &AuctionContext, unobs_auc_type: usize, rng: &mut StdRng) -> Result<Bid>;

    /// Whether the underlying table was built for these cardinalities
    fn matches(&self, traits: &AuctionTraits) -> bool;

    /// Short name for logging
    fn source_name(&self) -> &'static str;
}

/// Quantile tables of competitor bid amounts
pub struct InverseCdfTable {
    pub table: CellTensor<f64>,
}

impl InverseCdfTable {
    pub fn new(table: CellTensor<f64>) -> Self {
        Self { table }
    }
}

impl CompetitorSource for InverseCdfTable {
    fn draw(&self, bidder_type: usize, context: &AuctionContext, unobs_auc_type: usize, rng: &mut StdRng) -> Result<Bid> {
        let quantiles = self.table.cell(bidder_type, context.obs_auc_type, unobs_auc_type)?;
        let amount = quantiles[rng.gen_range(0..quantiles.len())];
        Ok(Bid::new(amount, bidder_type, context.clone()))
    }

    fn matches(&self, traits: &AuctionTraits) -> bool {
        self.table.matches(traits)
    }

    fn source_name(&self) -> &'static str {
        "inverse-CDF"
    }
}

/// Pools of previously recorded competitor bids
pub struct SampleBidPool {
    pub pool: CellTensor<Bid>,
}

impl SampleBidPool {
    pub fn new(pool: CellTensor<Bid>) -> Self {
        Self { pool }
    }
}

impl CompetitorSource for SampleBidPool {
    fn draw(&self, bidder_type: usize, context: &AuctionContext, unobs_auc_type: usize, rng: &mut StdRng) -> Result<Bid> {
        let samples = self.pool.cell(bidder_type, context.obs_auc_type, unobs_auc_type)?;
        let sample = &samples[rng.gen_range(0..samples.len())];
        // The offer comes from the pool, the auction it is placed into is the focal one
        let mut competitor = sample.in_context(context);
        competitor.bidder_type = bidder_type;
        Ok(competitor)
    }

    fn matches(&self, traits: &AuctionTraits) -> bool {
        self.pool.matches(traits)
    }

    fn source_name(&self) -> &'static str {
        "sample-pool"
    }
}

/// Discrete distribution stored as cumulative probabilities, sampled by inverse transform
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeDistribution {
    cumulative: Vec<f64>,
}

impl CumulativeDistribution {
    /// Build from per-bin probabilities
    pub fn from_probabilities(probabilities: &[f64]) -> Result<Self> {
        let mut running = 0.0;
        let cumulative: Vec<f64> = probabilities
            .iter()
            .map(|p| {
                running += p;
                running
            })
            .collect();
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(EstimationError::Configuration(format!("invalid bin probability {}", bad)));
        }
        Self::from_cumulative(cumulative)
    }

    /// Build from cumulative probabilities; the last value is normalised to exactly 1
    pub fn from_cumulative(mut cumulative: Vec<f64>) -> Result<Self> {
        let last = match cumulative.last() {
            Some(last) => *last,
            None => return Err(EstimationError::Configuration("empty distribution".to_string())),
        };
        if cumulative.iter().any(|c| !c.is_finite()) {
            return Err(EstimationError::Configuration("distribution holds non-finite values".to_string()));
        }
        if cumulative.windows(2).any(|w| w[1] < w[0]) || cumulative[0] < 0.0 {
            return Err(EstimationError::Configuration("cumulative distribution is not non-decreasing".to_string()));
        }
        if (last - 1.0).abs() > CUMULATIVE_TOLERANCE {
            return Err(EstimationError::Configuration(format!(
                "cumulative distribution ends at {} instead of 1",
                last
            )));
        }
        for value in cumulative.iter_mut() {
            *value = (*value / last).min(1.0);
        }
        if let Some(tail) = cumulative.last_mut() {
            *tail = 1.0;
        }
        Ok(Self { cumulative })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    /// Bin holding the uniform draw `u` in [0, 1)
    pub fn bin_for(&self, u: f64) -> usize {
        self.cumulative.partition_point(|&c| c <= u).min(self.cumulative.len() - 1)
    }

    pub fn sample(&self, rng: &mut StdRng) -> usize {
        self.bin_for(rng.gen::<f64>())
    }
}

/// Competitor draws for simulated auctions
pub struct CompetitorModel {
    pub traits: AuctionTraits,
    source: Box<dyn CompetitorSource>,
    /// Per observed auction type, over bidder types
    bidder_type_dist: Option<Vec<CumulativeDistribution>>,
    /// Per observed auction type, bin `k` means `k` competitors beside the focal bid
    num_bid_dist: Option<Vec<CumulativeDistribution>>,
    num_competitors: usize,
}

impl CompetitorModel {
    pub fn new(traits: AuctionTraits, source: Box<dyn CompetitorSource>) -> Result<Self> {
        if !source.matches(&traits) {
            return Err(EstimationError::Configuration(format!(
                "{} table does not match discovered traits {:?}",
                source.source_name(),
                traits
            )));
        }
        Ok(Self {
            traits,
            source,
            bidder_type_dist: None,
            num_bid_dist: None,
            num_competitors: DEFAULT_NUM_COMPETITORS,
        })
    }

    /// Fixed number of competitors used when no bid-count distribution is set
    pub fn with_num_competitors(mut self, num_competitors: usize) -> Self {
        self.num_competitors = num_competitors;
        self
    }

    pub fn with_bidder_type_distribution(mut self, dists: Vec<CumulativeDistribution>) -> Result<Self> {
        if dists.len() != self.traits.num_obs_auc_types {
            return Err(EstimationError::Configuration(format!(
                "bidder type distribution has {} rows for {} observed auction types",
                dists.len(),
                self.traits.num_obs_auc_types
            )));
        }
        if let Some(bad) = dists.iter().find(|d| d.len() != self.traits.num_bidder_types) {
            return Err(EstimationError::Configuration(format!(
                "bidder type distribution row has {} bins for {} bidder types",
                bad.len(),
                self.traits.num_bidder_types
            )));
        }
        self.bidder_type_dist = Some(dists);
        Ok(self)
    }

    pub fn with_num_bid_distribution(mut self, dists: Vec<CumulativeDistribution>) -> Result<Self> {
        if dists.len() != self.traits.num_obs_auc_types {
            return Err(EstimationError::Configuration(format!(
                "bid count distribution has {} rows for {} observed auction types",
                dists.len(),
                self.traits.num_obs_auc_types
            )));
        }
        self.num_bid_dist = Some(dists);
        Ok(self)
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    fn check_obs_auc_type(&self, obs_auc_type: usize) -> Result<()> {
        if obs_auc_type >= self.traits.num_obs_auc_types {
            return Err(EstimationError::CellOutOfRange {
                bidder_type: 0,
                obs_auc_type,
                unobs_auc_type: 0,
                dims: [
                    self.traits.num_bidder_types,
                    self.traits.num_obs_auc_types,
                    self.traits.num_unobs_auc_types,
                ],
            });
        }
        Ok(())
    }

    /// Bidder type of one competitor in an auction of the given observed type
    pub fn draw_bidder_type(&self, obs_auc_type: usize, rng: &mut StdRng) -> Result<usize> {
        self.check_obs_auc_type(obs_auc_type)?;
        Ok(match &self.bidder_type_dist {
            Some(dists) => dists[obs_auc_type].sample(rng),
            None => rng.gen_range(0..self.traits.num_bidder_types),
        })
    }

    /// Number of competitors beside the focal bid
    pub fn draw_competitor_count(&self, obs_auc_type: usize, rng: &mut StdRng) -> Result<usize> {
        self.check_obs_auc_type(obs_auc_type)?;
        Ok(match &self.num_bid_dist {
            Some(dists) => dists[obs_auc_type].sample(rng),
            None => self.num_competitors,
        })
    }

    /// Draw `num_competitors` competitors for the focal bid's auction under `unobs_auc_type`
    pub fn draw_competitors(&self, focal: &Bid, unobs_auc_type: usize, num_competitors: usize, rng: &mut StdRng) -> Result<Vec<Bid>> {
        let mut competitors = Vec::with_capacity(num_competitors);
        for _ in 0..num_competitors {
            let bidder_type = self.draw_bidder_type(focal.context.obs_auc_type, rng)?;
            competitors.push(self.source.draw(bidder_type, &focal.context, unobs_auc_type, rng)?);
        }
        Ok(competitors)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::types::tests::sample_context;
    use crate::types::Financing;
    use rand::SeedableRng;

    /// Inverse-CDF table where every amount encodes its cell: 100*b + 10*o + u + q/1000
    pub fn encoded_quantile_model(traits: AuctionTraits, grid: usize) -> CompetitorModel {
        let table = CellTensor::from_fn(&traits, grid, |b, o, u| {
            Ok((0..grid).map(|q| (100 * b + 10 * o + u) as f64 + q as f64 / 1000.0).collect())
        })
        .unwrap();
        CompetitorModel::new(traits, Box::new(InverseCdfTable::new(table))).unwrap()
    }

    #[test]
    fn test_quantile_draws_come_from_cell() {
        let traits = AuctionTraits::new(3, 2, 2).unwrap();
        let model = encoded_quantile_model(traits, 50);
        let mut focal = Bid::new(250.0, 1, sample_context());
        focal.context.obs_auc_type = 1;
        let mut rng = StdRng::seed_from_u64(5);
        let competitors = model.draw_competitors(&focal, 1, 200, &mut rng).unwrap();
        assert_eq!(competitors.len(), 200);
        for competitor in &competitors {
            let cell = (competitor.amount.floor()) as usize;
            assert_eq!(cell, 100 * competitor.bidder_type + 10 + 1);
            assert!(competitor.bidder_type < 3);
            assert_eq!(competitor.context, focal.context);
        }
        // Uniform type mix should hit every bidder type
        for bidder_type in 0..3 {
            assert!(competitors.iter().any(|c| c.bidder_type == bidder_type));
        }
    }

    #[test]
    fn test_out_of_range_cells_fail() {
        let traits = AuctionTraits::new(2, 1, 1).unwrap();
        let model = encoded_quantile_model(traits, 10);
        let mut rng = StdRng::seed_from_u64(1);
        let focal = Bid::new(250.0, 0, sample_context());
        assert!(matches!(
            model.draw_competitors(&focal, 1, 3, &mut rng),
            Err(EstimationError::CellOutOfRange { .. })
        ));
        let mut foreign = focal.clone();
        foreign.context.obs_auc_type = 4;
        assert!(matches!(
            model.draw_competitors(&foreign, 0, 3, &mut rng),
            Err(EstimationError::CellOutOfRange { .. })
        ));
    }

    #[test]
    fn test_sample_pool_copies_auction_context() {
        let traits = AuctionTraits::new(2, 1, 1).unwrap();
        let mut pool_context = sample_context();
        pool_context.num_reps = 99;
        pool_context.sum_rep = 50;
        let pool = CellTensor::from_fn(&traits, 4, |b, _, _| {
            Ok((0..4)
                .map(|i| {
                    let mut bid = Bid::new(200.0 + i as f64, 7, pool_context.clone());
                    bid.financing = Some(Financing {
                        loan_offered: i % 2 == 0,
                        us_panel: b == 0,
                        chinese_panel: b == 1,
                        loan_rate: 0.04,
                        relative_system_size: 1.0,
                    });
                    bid
                })
                .collect())
        })
        .unwrap();
        let model = CompetitorModel::new(traits, Box::new(SampleBidPool::new(pool))).unwrap();
        let focal = Bid::new(250.0, 1, sample_context());
        let mut rng = StdRng::seed_from_u64(9);
        let competitors = model.draw_competitors(&focal, 0, 20, &mut rng).unwrap();
        for competitor in &competitors {
            assert_eq!(competitor.context, focal.context);
            assert!(competitor.bidder_type < 2);
            let financing = competitor.financing.as_ref().unwrap();
            assert_eq!(financing.us_panel, competitor.bidder_type == 0);
            assert!((200.0..204.0).contains(&competitor.amount));
        }
        assert_eq!(focal.context, sample_context());
    }

    #[test]
    fn test_cumulative_bins() {
        let dist = CumulativeDistribution::from_probabilities(&[0.25, 0.0, 0.5, 0.25]).unwrap();
        assert_eq!(dist.bin_for(0.0), 0);
        assert_eq!(dist.bin_for(0.2499), 0);
        assert_eq!(dist.bin_for(0.25), 2);
        assert_eq!(dist.bin_for(0.7499), 2);
        assert_eq!(dist.bin_for(0.75), 3);
        assert_eq!(dist.bin_for(0.999999), 3);
    }

    #[test]
    fn test_cumulative_validation() {
        assert!(CumulativeDistribution::from_probabilities(&[]).is_err());
        assert!(CumulativeDistribution::from_probabilities(&[0.5, 0.4]).is_err());
        assert!(CumulativeDistribution::from_probabilities(&[0.5, -0.1, 0.6]).is_err());
        assert!(CumulativeDistribution::from_cumulative(vec![0.5, 0.4, 1.0]).is_err());
        assert!(CumulativeDistribution::from_cumulative(vec![0.5, 1.0 + 1e-9]).is_ok());
    }

    #[test]
    fn test_bidder_type_distribution_used() {
        let traits = AuctionTraits::new(3, 2, 1).unwrap();
        let dists = vec![
            CumulativeDistribution::from_probabilities(&[0.0, 0.0, 1.0]).unwrap(),
            CumulativeDistribution::from_probabilities(&[1.0, 0.0, 0.0]).unwrap(),
        ];
        let model = encoded_quantile_model(traits, 10).with_bidder_type_distribution(dists).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert_eq!(model.draw_bidder_type(0, &mut rng).unwrap(), 2);
            assert_eq!(model.draw_bidder_type(1, &mut rng).unwrap(), 0);
        }
    }

    #[test]
    fn test_distribution_shape_checked() {
        let traits = AuctionTraits::new(3, 2, 1).unwrap();
        let one_row = vec![CumulativeDistribution::from_probabilities(&[0.5, 0.5, 0.0]).unwrap()];
        assert!(encoded_quantile_model(traits, 10).with_bidder_type_distribution(one_row.clone()).is_err());
        assert!(encoded_quantile_model(traits, 10).with_num_bid_distribution(one_row).is_err());
        let wrong_bins = vec![
            CumulativeDistribution::from_probabilities(&[0.5, 0.5]).unwrap(),
            CumulativeDistribution::from_probabilities(&[0.5, 0.5]).unwrap(),
        ];
        assert!(encoded_quantile_model(traits, 10).with_bidder_type_distribution(wrong_bins).is_err());
    }

    #[test]
    fn test_competitor_count() {
        let traits = AuctionTraits::new(2, 1, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let fixed = encoded_quantile_model(traits, 10).with_num_competitors(4);
        assert_eq!(fixed.draw_competitor_count(0, &mut rng).unwrap(), 4);
        let drawn = encoded_quantile_model(traits, 10)
            .with_num_bid_distribution(vec![CumulativeDistribution::from_probabilities(&[0.0, 0.0, 0.5, 0.5]).unwrap()])
            .unwrap();
        for _ in 0..50 {
            let count = drawn.draw_competitor_count(0, &mut rng).unwrap();
            assert!(count == 2 || count == 3);
        }
    }

    #[test]
    fn test_mismatched_table_rejected() {
        let traits = AuctionTraits::new(2, 1, 1).unwrap();
        let other = AuctionTraits::new(3, 1, 1).unwrap();
        let table = CellTensor::from_fn(&other, 2, |_, _, _| Ok(vec![1.0, 2.0])).unwrap();
        assert!(CompetitorModel::new(traits, Box::new(InverseCdfTable::new(table))).is_err());
    }
}
