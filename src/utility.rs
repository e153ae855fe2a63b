//! Nested logit model of bid selection
//!
//! The buyer first decides whether to pick any offer at all (upper nest, against the outside
//! option) and then which offer to pick (lower nest). For the focal bid at index 0:
//!
//! - u_i = (bid_amount_coeff * amount_i + sell_rep_coeff * bidder_type_i) / nest_corr
//! - v   = upper-nest utility from the focal auction's buyer covariates
//! - IV  = ln(sum_i exp(u_i))
//! - A = exp(v + nest_corr * IV), B = exp(u_0), C = sum_i exp(u_i)
//! - P  = A/(1+A) * B/C
//! - dP/d(amount_0) = P * bid_amount_coeff * (B/(C*(1+A)) + (1/nest_corr) * (1 - B/C))
//!
//! B/C is evaluated with the largest utility subtracted and A/(1+A) as a logistic function,
//! which keeps both finite for utilities far beyond the range of exp().

use crate::errors::{EstimationError, Result};
use crate::types::{Bid, BidSelectionParams};

/// Selection probability of the focal bid and its slope in the focal amount
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionOutcome {
    pub probability: f64,
    pub derivative: f64,
    /// B/C: chance the focal bid wins given that some offer is chosen
    pub within_nest_share: f64,
    /// A/(1+A): chance that some offer is chosen at all
    pub inclusion_probability: f64,
}

/// Numerically stable logistic function 1 / (1 + exp(-x))
fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// ln(sum exp(u_i)) with the maximum factored out; also returns the maximum
pub fn inclusive_value(utilities: &[f64]) -> (f64, f64) {
    let max_utility = utilities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scaled_sum: f64 = utilities.iter().map(|u| (u - max_utility).exp()).sum();
    (max_utility + scaled_sum.ln(), max_utility)
}

/// Selection probability of `focal` against `competitors`
pub fn selection_probability(focal: &Bid, competitors: &[Bid], params: &BidSelectionParams) -> Result<SelectionOutcome> {
    let utilities: Vec<f64> = std::iter::once(focal)
        .chain(competitors.iter())
        .map(|bid| params.offer_utility(bid.amount, bid.bidder_type))
        .collect();
    selection_from_utilities(&utilities, params.nest_utility(&focal.context), params)
}

/// Selection probability from lower-nest utilities (focal first) and the upper-nest utility
pub fn selection_from_utilities(utilities: &[f64], nest_utility: f64, params: &BidSelectionParams) -> Result<SelectionOutcome> {
    if utilities.is_empty() {
        return Err(EstimationError::ModelDegeneracy("no offers in auction".to_string()));
    }
    let (incl_value, max_utility) = inclusive_value(utilities);
    let scaled_sum: f64 = utilities.iter().map(|u| (u - max_utility).exp()).sum();

    let within_nest_share = (utilities[0] - max_utility).exp() / scaled_sum;
    let inclusion_probability = logistic(nest_utility + params.nest_corr * incl_value);
    let exclusion_probability = logistic(-(nest_utility + params.nest_corr * incl_value));

    let probability = inclusion_probability * within_nest_share;
    let derivative = probability
        * params.bid_amount_coeff
        * (within_nest_share * exclusion_probability + (1.0 - within_nest_share) / params.nest_corr);

    if !probability.is_finite() || !derivative.is_finite() {
        return Err(EstimationError::ModelDegeneracy(format!(
            "non-finite selection outcome (probability {}, derivative {})",
            probability, derivative
        )));
    }
    Ok(SelectionOutcome {
        probability,
        derivative,
        within_nest_share,
        inclusion_probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::{sample_context, sample_params};

    const COMPETITOR_AMOUNTS: [f64; 9] = [246.528, 218.8331, 261.0508, 250.574, 257.6782, 200.9693, 264.1822, 261.9003, 185.5633];
    const COMPETITOR_TYPES: [usize; 9] = [2, 0, 2, 0, 1, 1, 2, 2, 0];

    fn fixed_draw() -> (Bid, Vec<Bid>) {
        let focal = Bid::new(250.0, 2, sample_context());
        let competitors = COMPETITOR_AMOUNTS
            .iter()
            .zip(COMPETITOR_TYPES.iter())
            .map(|(&amount, &bidder_type)| Bid::new(amount, bidder_type, sample_context()))
            .collect();
        (focal, competitors)
    }

    /// Direct transcription without any overflow protection
    fn naive_outcome(utilities: &[f64], nest_utility: f64, params: &BidSelectionParams) -> (f64, f64) {
        let c: f64 = utilities.iter().map(|u| u.exp()).sum();
        let incl_value = c.ln();
        let a = (nest_utility + params.nest_corr * incl_value).exp();
        let b = utilities[0].exp();
        let p = a / (1.0 + a) * b / c;
        let d = p * params.bid_amount_coeff * (b / (c * (1.0 + a)) + 1.0 / params.nest_corr * (1.0 - b / c));
        (p, d)
    }

    #[test]
    fn test_fixed_draw_is_deterministic() {
        let params = sample_params();
        let (focal, competitors) = fixed_draw();
        let first = selection_probability(&focal, &competitors, &params).unwrap();
        let second = selection_probability(&focal, &competitors, &params).unwrap();
        assert_eq!(first.probability.to_bits(), second.probability.to_bits());
        assert_eq!(first.derivative.to_bits(), second.derivative.to_bits());
        assert!(first.probability > 0.0 && first.probability < 1.0);
        assert!(first.derivative > 0.0);
    }

    #[test]
    fn test_fixed_draw_matches_closed_form() {
        let params = sample_params();
        let (focal, competitors) = fixed_draw();
        let outcome = selection_probability(&focal, &competitors, &params).unwrap();

        let mut utilities = vec![(0.01 * 250.0 + 0.2 * 2.0) / 0.5];
        for (amount, bidder_type) in COMPETITOR_AMOUNTS.iter().zip(COMPETITOR_TYPES.iter()) {
            utilities.push((0.01 * amount + 0.2 * *bidder_type as f64) / 0.5);
        }
        let nest_utility = -1.0 + 0.1 * 11f64.ln() + 0.05 * 0.8 - 0.2 * 2f64.ln();
        let (p, d) = naive_outcome(&utilities, nest_utility, &params);
        assert!((outcome.probability - p).abs() < 1e-12, "{} vs {}", outcome.probability, p);
        assert!((outcome.derivative - d).abs() < 1e-12, "{} vs {}", outcome.derivative, d);
    }

    #[test]
    fn test_stabilized_matches_naive_in_moderate_range() {
        let params = sample_params();
        for shift in [-40.0, -5.0, 0.0, 3.0, 25.0] {
            let utilities: Vec<f64> = (0..10).map(|i| shift + 0.37 * i as f64 - 1.1).collect();
            for nest_utility in [-2.0, 0.0, 1.5] {
                let outcome = selection_from_utilities(&utilities, nest_utility, &params).unwrap();
                let (p, d) = naive_outcome(&utilities, nest_utility, &params);
                assert!((outcome.probability - p).abs() < 1e-9);
                assert!((outcome.derivative - d).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_stabilized_survives_large_utilities() {
        let mut params = sample_params();
        params.nest_corr = 1.0;
        for magnitude in [1e3, -1e3] {
            let utilities: Vec<f64> = (0..10).map(|i| magnitude + i as f64 * 0.5).collect();
            let (naive_p, _) = naive_outcome(&utilities, 0.0, &params);
            let outcome = selection_from_utilities(&utilities, 0.0, &params).unwrap();
            assert!(outcome.probability.is_finite());
            assert!(outcome.derivative.is_finite());
            assert!(outcome.within_nest_share > 0.0 && outcome.within_nest_share < 1.0);
            if magnitude > 0.0 {
                assert!(naive_p.is_nan());
            }
        }
    }

    #[test]
    fn test_probability_in_unit_interval() {
        let (focal, competitors) = fixed_draw();
        for nest_corr in [0.05, 0.3, 0.5, 0.99, 1.0] {
            for bid_amount_coeff in [-0.05, -0.001, 0.001, 0.02] {
                let mut params = sample_params();
                params.nest_corr = nest_corr;
                params.bid_amount_coeff = bid_amount_coeff;
                let outcome = selection_probability(&focal, &competitors, &params).unwrap();
                assert!(outcome.probability > 0.0 && outcome.probability < 1.0, "{:?}", outcome);
            }
        }
    }

    #[test]
    fn test_symmetric_auction() {
        let params = sample_params();
        let focal = Bid::new(240.0, 1, sample_context());
        let competitors = vec![focal.clone(); 9];
        let outcome = selection_probability(&focal, &competitors, &params).unwrap();
        assert!((outcome.within_nest_share - 0.1).abs() < 1e-15);
        assert!((outcome.probability - outcome.inclusion_probability / 10.0).abs() < 1e-15);
    }

    #[test]
    fn test_monotone_in_focal_amount() {
        let (focal, competitors) = fixed_draw();
        for bid_amount_coeff in [0.01, -0.01] {
            let mut params = sample_params();
            params.bid_amount_coeff = bid_amount_coeff;
            let mut previous: Option<f64> = None;
            for step in 0..20 {
                let mut moved = focal.clone();
                moved.amount = 180.0 + 5.0 * step as f64;
                let outcome = selection_probability(&moved, &competitors, &params).unwrap();
                assert_eq!(outcome.derivative.signum(), bid_amount_coeff.signum());
                if let Some(prev) = previous {
                    if bid_amount_coeff > 0.0 {
                        assert!(outcome.probability > prev);
                    } else {
                        assert!(outcome.probability < prev);
                    }
                }
                previous = Some(outcome.probability);
            }
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let mut params = sample_params();
        params.bid_amount_coeff = -0.03;
        let (focal, competitors) = fixed_draw();
        let h = 1e-5;
        let mut up = focal.clone();
        up.amount += h;
        let mut down = focal.clone();
        down.amount -= h;
        let p_up = selection_probability(&up, &competitors, &params).unwrap().probability;
        let p_down = selection_probability(&down, &competitors, &params).unwrap().probability;
        let numeric = (p_up - p_down) / (2.0 * h);
        let analytic = selection_probability(&focal, &competitors, &params).unwrap().derivative;
        assert!((numeric - analytic).abs() < 1e-7, "{} vs {}", numeric, analytic);
    }

    #[test]
    fn test_lone_bid() {
        let params = sample_params();
        let focal = Bid::new(250.0, 0, sample_context());
        let outcome = selection_probability(&focal, &[], &params).unwrap();
        assert_eq!(outcome.within_nest_share, 1.0);
        assert!((outcome.probability - outcome.inclusion_probability).abs() < 1e-15);
    }

    #[test]
    fn test_empty_utilities_rejected() {
        assert!(matches!(
            selection_from_utilities(&[], 0.0, &sample_params()),
            Err(EstimationError::ModelDegeneracy(_))
        ));
    }
}
