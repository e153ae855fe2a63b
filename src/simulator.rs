use rand::rngs::StdRng;
use crate::competitors::CompetitorModel;
use crate::errors::Result;
use crate::types::{Bid, BidSelectionParams};
use crate::utility::{selection_probability, SelectionOutcome};

/// One simulated auction around a focal bid
#[derive(Debug, Clone)]
pub struct SimulatedAuction {
    pub competitors: Vec<Bid>,
    pub outcome: SelectionOutcome,
}

impl SimulatedAuction {
    /// CSV row for draw-level logging: unobserved type, draw index, outcome, then amount:type per competitor
    pub fn csv_row(&self, unobs_auc_type: usize, draw: usize) -> String {
        let mut fields = vec![
            format!("{}", unobs_auc_type),
            format!("{}", draw),
            format!("{:.6e}", self.outcome.probability),
            format!("{:.6e}", self.outcome.derivative),
        ];
        for competitor in &self.competitors {
            fields.push(format!("{:.4}:{}", competitor.amount, competitor.bidder_type));
        }
        fields.join(",")
    }
}

/// Runs single auctions against drawn competitors.
///
/// Holds only shared references; all randomness comes from the generator passed in,
/// so one simulator can serve any number of independent tasks.
pub struct AuctionSimulator<'a> {
    pub model: &'a CompetitorModel,
    pub params: &'a BidSelectionParams,
}

impl<'a> AuctionSimulator<'a> {
    pub fn new(model: &'a CompetitorModel, params: &'a BidSelectionParams) -> Self {
        Self { model, params }
    }

    /// Simulate one auction with the competitor count taken from the model
    pub fn simulate(&self, focal: &Bid, unobs_auc_type: usize, rng: &mut StdRng) -> Result<SimulatedAuction> {
        let num_competitors = self.model.draw_competitor_count(focal.context.obs_auc_type, rng)?;
        self.simulate_with_competitors(focal, unobs_auc_type, num_competitors, rng)
    }

    /// Simulate one auction with exactly `num_competitors` competitors beside the focal bid
    pub fn simulate_with_competitors(&self, focal: &Bid, unobs_auc_type: usize, num_competitors: usize, rng: &mut StdRng) -> Result<SimulatedAuction> {
        let competitors = self.model.draw_competitors(focal, unobs_auc_type, num_competitors, rng)?;
        let outcome = selection_probability(focal, &competitors, self.params)?;
        Ok(SimulatedAuction { competitors, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::competitors::tests::encoded_quantile_model;
    use crate::competitors::CumulativeDistribution;
    use crate::errors::EstimationError;
    use crate::types::tests::{sample_context, sample_params};
    use crate::types::AuctionTraits;
    use rand::SeedableRng;

    #[test]
    fn test_default_auction_has_ten_bids() {
        let model = encoded_quantile_model(AuctionTraits::new(3, 1, 2).unwrap(), 100);
        let params = sample_params();
        let simulator = AuctionSimulator::new(&model, &params);
        let focal = Bid::new(150.0, 2, sample_context());
        let mut rng = StdRng::seed_from_u64(4);
        let auction = simulator.simulate(&focal, 1, &mut rng).unwrap();
        assert_eq!(auction.competitors.len(), 9);
        assert!(auction.outcome.probability > 0.0 && auction.outcome.probability < 1.0);
        // Focal bid is untouched by the draws
        assert_eq!(focal, Bid::new(150.0, 2, sample_context()));
    }

    #[test]
    fn test_same_seed_same_draw() {
        let model = encoded_quantile_model(AuctionTraits::new(3, 1, 2).unwrap(), 100);
        let params = sample_params();
        let simulator = AuctionSimulator::new(&model, &params);
        let focal = Bid::new(150.0, 2, sample_context());
        let a = simulator.simulate(&focal, 0, &mut StdRng::seed_from_u64(77)).unwrap();
        let b = simulator.simulate(&focal, 0, &mut StdRng::seed_from_u64(77)).unwrap();
        assert_eq!(a.competitors, b.competitors);
        assert_eq!(a.outcome, b.outcome);
    }

    #[test]
    fn test_outcome_matches_utility_model() {
        let model = encoded_quantile_model(AuctionTraits::new(2, 1, 1).unwrap(), 30);
        let params = sample_params();
        let simulator = AuctionSimulator::new(&model, &params);
        let focal = Bid::new(50.0, 1, sample_context());
        let mut rng = StdRng::seed_from_u64(8);
        let auction = simulator.simulate_with_competitors(&focal, 0, 5, &mut rng).unwrap();
        let direct = selection_probability(&focal, &auction.competitors, &params).unwrap();
        assert_eq!(auction.outcome, direct);
    }

    #[test]
    fn test_competitor_count_from_distribution() {
        let model = encoded_quantile_model(AuctionTraits::new(2, 1, 1).unwrap(), 30)
            .with_num_bid_distribution(vec![CumulativeDistribution::from_probabilities(&[0.0, 0.0, 0.0, 1.0]).unwrap()])
            .unwrap();
        let params = sample_params();
        let simulator = AuctionSimulator::new(&model, &params);
        let focal = Bid::new(50.0, 1, sample_context());
        let mut rng = StdRng::seed_from_u64(8);
        assert_eq!(simulator.simulate(&focal, 0, &mut rng).unwrap().competitors.len(), 3);
    }

    #[test]
    fn test_unknown_unobserved_type_fails() {
        let model = encoded_quantile_model(AuctionTraits::new(2, 1, 1).unwrap(), 30);
        let params = sample_params();
        let simulator = AuctionSimulator::new(&model, &params);
        let focal = Bid::new(50.0, 1, sample_context());
        let mut rng = StdRng::seed_from_u64(8);
        assert!(matches!(
            simulator.simulate(&focal, 3, &mut rng),
            Err(EstimationError::CellOutOfRange { .. })
        ));
    }

    #[test]
    fn test_csv_row() {
        let model = encoded_quantile_model(AuctionTraits::new(2, 1, 1).unwrap(), 30);
        let params = sample_params();
        let simulator = AuctionSimulator::new(&model, &params);
        let focal = Bid::new(50.0, 1, sample_context());
        let mut rng = StdRng::seed_from_u64(8);
        let auction = simulator.simulate_with_competitors(&focal, 0, 2, &mut rng).unwrap();
        let row = auction.csv_row(0, 12);
        assert_eq!(row.split(',').count(), 6);
        assert!(row.starts_with("0,12,"));
    }
}
