//! Kelly-criterion stake sizing with phase-dependent risk divisors
//!
//! The raw Kelly fraction is divided by a per-phase risk divisor (constant
//! or formula-driven, always clamped), capped globally, and converted into a
//! bounded dollar stake. Portfolio allocation greedily funds the best
//! expected-growth opportunities against the remaining bankroll under a
//! global exposure cap.

use crate::config::{RiskDivisorConfig, StakingConfig};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::debug;

/// One candidate bet for portfolio allocation.
#[derive(Debug, Clone)]
pub struct StakeOpportunity {
    /// Caller-side handle, echoed back in the allocation
    pub reference: String,
    pub win_probability: f64,
    pub decimal_odds: f64,
    /// Per-opportunity risk tag (a phase name, or "unknown")
    pub risk_tag: String,
}

/// An accepted opportunity with its stake attached.
#[derive(Debug, Clone)]
pub struct AllocatedStake {
    pub reference: String,
    pub win_probability: f64,
    pub decimal_odds: f64,
    pub expected_growth: f64,
    pub stake: Decimal,
}

/// Stake sizing engine. Divisor configuration and sizing limits are
/// injected at construction.
pub struct StakingEngine {
    divisors: RiskDivisorConfig,
    config: StakingConfig,
}

impl StakingEngine {
    pub fn new(divisors: RiskDivisorConfig, config: StakingConfig) -> Self {
        Self { divisors, config }
    }

    /// Bankroll fraction to stake, in [0, max_bet_fraction].
    ///
    /// Raw Kelly `f = (p*b - q) / b` with `b = odds - 1`; non-positive edge
    /// returns 0. The clamped phase divisor then scales the fraction down,
    /// and the global cap applies last.
    pub fn kelly_fraction(
        &self,
        win_probability: f64,
        decimal_odds: f64,
        risk_tag: &str,
        performance_rate: Option<f64>,
    ) -> f64 {
        if !(0.0..=1.0).contains(&win_probability) || !decimal_odds.is_finite() {
            return 0.0;
        }

        let b = decimal_odds - 1.0;
        if b <= 0.0 {
            return 0.0;
        }

        let q = 1.0 - win_probability;
        let raw = (win_probability * b - q) / b;
        if raw <= 0.0 {
            return 0.0;
        }

        let divisor = self.divisors.divisor(risk_tag, performance_rate);
        let adjusted = raw / divisor;

        adjusted.min(self.config.max_bet_fraction)
    }

    /// Dollar stake for one bet, rounded to cents. Stakes below the minimum
    /// are not placed and come back as zero.
    pub fn stake(
        &self,
        bankroll: Decimal,
        win_probability: f64,
        decimal_odds: f64,
        risk_tag: &str,
        performance_rate: Option<f64>,
    ) -> Decimal {
        if bankroll <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let fraction = self.kelly_fraction(win_probability, decimal_odds, risk_tag, performance_rate);
        if fraction <= 0.0 {
            return Decimal::ZERO;
        }

        let fraction = Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO);
        let stake = (bankroll * fraction).round_dp(2);

        if stake < self.config.min_stake {
            return Decimal::ZERO;
        }
        stake
    }

    /// Allocate stakes across a set of opportunities.
    ///
    /// Opportunities are ranked by expected growth rate
    /// `kelly_fraction * (p * odds - 1)` descending and accepted greedily,
    /// each stake recomputed against the bankroll remaining after earlier
    /// picks. Allocation stops at `max_count` or once cumulative stake
    /// reaches the exposure cap (25% of the starting bankroll by default).
    pub fn allocate_portfolio(
        &self,
        bankroll: Decimal,
        opportunities: Vec<StakeOpportunity>,
        performance_rate: Option<f64>,
        max_count: usize,
    ) -> Vec<AllocatedStake> {
        let exposure_cap = (bankroll
            * Decimal::from_f64(self.config.max_exposure_fraction).unwrap_or(Decimal::ZERO))
        .round_dp(2);

        let mut ranked: Vec<(f64, StakeOpportunity)> = opportunities
            .into_iter()
            .map(|opp| {
                let fraction = self.kelly_fraction(
                    opp.win_probability,
                    opp.decimal_odds,
                    &opp.risk_tag,
                    performance_rate,
                );
                let growth = fraction * (opp.win_probability * opp.decimal_odds - 1.0);
                (growth, opp)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut selected = Vec::new();
        let mut allocated = Decimal::ZERO;

        for (growth, opp) in ranked {
            if selected.len() >= max_count {
                break;
            }
            if growth <= 0.0 {
                continue;
            }

            let remaining = bankroll - allocated;
            let stake = self.stake(
                remaining,
                opp.win_probability,
                opp.decimal_odds,
                &opp.risk_tag,
                performance_rate,
            );
            if stake.is_zero() {
                continue;
            }

            // Never let the final pick push total exposure past the cap
            let stake = stake.min(exposure_cap - allocated);
            if stake < self.config.min_stake {
                continue;
            }

            debug!(
                "[Staking] accepted {} at ${} (growth {:.4})",
                opp.reference, stake, growth
            );
            allocated += stake;
            selected.push(AllocatedStake {
                reference: opp.reference,
                win_probability: opp.win_probability,
                decimal_odds: opp.decimal_odds,
                expected_growth: growth,
                stake,
            });

            if allocated >= exposure_cap {
                break;
            }
        }

        selected
    }
}
