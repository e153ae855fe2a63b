use crate::errors::{EstimationError, Result};

/// Part of a bid record that describes the auction rather than the seller's offer.
/// Every bid in one auction carries the same context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuctionContext {
    /// Observed auction segment (0-based)
    pub obs_auc_type: usize,
    pub sum_rep: u32,
    pub num_reps: u32,
    pub previous_auctions: u32,
    pub previous_cancels: u32,
}

impl AuctionContext {
    /// Buyer reputation ratio, 0 when the buyer has no ratings
    pub fn buyer_reputation(&self) -> f64 {
        if self.num_reps > 0 {
            self.sum_rep as f64 / self.num_reps as f64
        } else {
            0.0
        }
    }

    pub fn ln_num_reps(&self) -> f64 {
        (self.num_reps as f64 + 1.0).ln()
    }

    pub fn ln_previous_cancels(&self) -> f64 {
        (self.previous_cancels as f64 + 1.0).ln()
    }
}

/// Financing terms recorded with sample-pool bids
#[derive(Debug, Clone, PartialEq)]
pub struct Financing {
    pub loan_offered: bool,
    pub us_panel: bool,
    pub chinese_panel: bool,
    pub loan_rate: f64,
    pub relative_system_size: f64,
}

/// How a bid record takes part in estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidRole {
    Participating,
    /// Buyer chose none of the offers
    OutsideOption,
    /// Header or zero-amount row kept only to preserve output alignment
    Placeholder,
}

/// One observed or simulated offer
#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    pub amount: f64,
    /// Seller type (0-based)
    pub bidder_type: usize,
    pub context: AuctionContext,
    pub financing: Option<Financing>,
    pub role: BidRole,
}

impl Bid {
    /// Participating bid with no financing covariates
    pub fn new(amount: f64, bidder_type: usize, context: AuctionContext) -> Self {
        Self {
            amount,
            bidder_type,
            context,
            financing: None,
            role: BidRole::Participating,
        }
    }

    /// Whether this record should be run through the auction simulation
    pub fn is_simulated(&self) -> bool {
        self.role == BidRole::Participating
    }

    /// Copy of this bid placed into another auction's context
    pub fn in_context(&self, context: &AuctionContext) -> Bid {
        Bid {
            context: context.clone(),
            ..self.clone()
        }
    }
}

/// Cardinalities discovered from the data catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuctionTraits {
    pub num_bidder_types: usize,
    pub num_obs_auc_types: usize,
    pub num_unobs_auc_types: usize,
}

impl AuctionTraits {
    /// Build traits, refusing any zero cardinality
    pub fn new(num_bidder_types: usize, num_obs_auc_types: usize, num_unobs_auc_types: usize) -> Result<Self> {
        if num_bidder_types == 0 || num_obs_auc_types == 0 || num_unobs_auc_types == 0 {
            return Err(EstimationError::Configuration(format!(
                "zero bidder or auction types (bidder types: {}, observed auction types: {}, unobserved auction types: {})",
                num_bidder_types, num_obs_auc_types, num_unobs_auc_types
            )));
        }
        Ok(Self {
            num_bidder_types,
            num_obs_auc_types,
            num_unobs_auc_types,
        })
    }
}

/// Fitted nested-logit coefficients of the bid selection model
#[derive(Debug, Clone, PartialEq)]
pub struct BidSelectionParams {
    pub bid_amount_coeff: f64,
    pub sell_rep_coeff: f64,
    pub nest_constant: f64,
    pub lnnumreps_coeff: f64,
    pub buyrep_coeff: f64,
    pub lnprevcancel_coeff: f64,
    /// Nest dissimilarity parameter, must lie in (0, 1]
    pub nest_corr: f64,
}

impl BidSelectionParams {
    /// Check that the coefficients define a usable model
    pub fn validate(&self) -> Result<()> {
        let coefficients = [
            ("bid_amount_coeff", self.bid_amount_coeff),
            ("sell_rep_coeff", self.sell_rep_coeff),
            ("nest_constant", self.nest_constant),
            ("lnnumreps_coeff", self.lnnumreps_coeff),
            ("buyrep_coeff", self.buyrep_coeff),
            ("lnprevcancel_coeff", self.lnprevcancel_coeff),
            ("nest_corr", self.nest_corr),
        ];
        for (name, value) in coefficients {
            if !value.is_finite() {
                return Err(EstimationError::ModelDegeneracy(format!("{} is not finite ({})", name, value)));
            }
        }
        if self.nest_corr <= 0.0 || self.nest_corr > 1.0 {
            return Err(EstimationError::ModelDegeneracy(format!(
                "nest_corr {} outside (0, 1]",
                self.nest_corr
            )));
        }
        Ok(())
    }

    /// Upper-nest utility of choosing any offer, from the focal auction's covariates
    pub fn nest_utility(&self, context: &AuctionContext) -> f64 {
        self.nest_constant
            + self.lnnumreps_coeff * context.ln_num_reps()
            + self.buyrep_coeff * context.buyer_reputation()
            + self.lnprevcancel_coeff * context.ln_previous_cancels()
    }

    /// Lower-nest utility of one offer, scaled by the nest parameter
    pub fn offer_utility(&self, amount: f64, bidder_type: usize) -> f64 {
        (self.bid_amount_coeff * amount + self.sell_rep_coeff * bidder_type as f64) / self.nest_corr
    }
}
