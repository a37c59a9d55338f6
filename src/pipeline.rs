//! End-to-end batch generation
//!
//! Wires the components together for one daily run: raw propositions are
//! anonymized, their confidences adjusted by the subject's phase modifier,
//! slips constructed and staked, and the batch checked against the guard
//! rail. Components are injected so tests can run the whole path against
//! temporary stores.

use crate::config::Config;
use crate::errors::EngineError;
use crate::guardrail::GuardRail;
use crate::identity::IdentityResolver;
use crate::phase::PhaseTracker;
use crate::slips::{RejectionCounts, SlipBuilder};
use crate::staking::{StakeOpportunity, StakingEngine};
use crate::store::JsonStore;
use crate::types::{GuardRailResult, Odds, Proposition, Side, Slip, SlipArchetype};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

/// A proposition as it arrives from upstream, still carrying the raw
/// subject name.
#[derive(Debug, Clone)]
pub struct RawProposition {
    pub subject: String,
    pub prop_type: String,
    pub line: f64,
    pub side: Side,
    pub odds: Odds,
    pub confidence: f64,
    pub edge: Option<f64>,
}

/// Knobs for one generation run.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub target_date: NaiveDate,
    pub bypass_guard_rail: bool,
    /// Historical win rate, enables dynamic divisor formulas when configured
    pub win_rate: Option<f64>,
    /// Cap on slips funded by the staking engine
    pub max_slips: usize,
}

/// One accepted daily batch.
#[derive(Debug, Clone)]
pub struct DailyBatch {
    pub date: NaiveDate,
    pub slips: Vec<Slip>,
    pub rejections: RejectionCounts,
    pub eligible_count: usize,
    pub guard_rail: GuardRailResult,
    pub total_stake: Decimal,
    pub bankroll: Decimal,
}

pub struct Pipeline {
    resolver: IdentityResolver,
    tracker: PhaseTracker,
    builder: SlipBuilder,
    staking: StakingEngine,
    guard: GuardRail,
    bankroll: Decimal,
}

impl Pipeline {
    pub fn new(
        resolver: IdentityResolver,
        tracker: PhaseTracker,
        builder: SlipBuilder,
        staking: StakingEngine,
        guard: GuardRail,
        bankroll: Decimal,
    ) -> Self {
        Self {
            resolver,
            tracker,
            builder,
            staking,
            guard,
            bankroll,
        }
    }

    /// Build a pipeline from loaded configuration, opening both stores and
    /// reading the three table files (with defaults on any problem).
    pub fn from_config(config: &Config) -> Self {
        let resolver = IdentityResolver::open(JsonStore::new(&config.identity_store_path));
        let tracker = PhaseTracker::open(
            JsonStore::new(&config.phase_store_path),
            crate::config::PhaseModifierConfig::load(&config.phase_modifier_path),
        );
        let builder = SlipBuilder::new(
            crate::config::PayoutTables::load(&config.payout_tables_path),
            config.slip.clone(),
        );
        let staking = StakingEngine::new(
            crate::config::RiskDivisorConfig::load(&config.risk_divisor_path),
            config.staking.clone(),
        );
        let guard = GuardRail::new(config.minimum_slips);

        Self::new(resolver, tracker, builder, staking, guard, config.bankroll)
    }

    pub fn resolver_mut(&mut self) -> &mut IdentityResolver {
        &mut self.resolver
    }

    pub fn tracker_mut(&mut self) -> &mut PhaseTracker {
        &mut self.tracker
    }

    /// Both mutable handles at once, for ingest paths that resolve names
    /// while writing observations.
    pub fn tracker_and_resolver_mut(&mut self) -> (&mut PhaseTracker, &mut IdentityResolver) {
        (&mut self.tracker, &mut self.resolver)
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn tracker(&self) -> &PhaseTracker {
        &self.tracker
    }

    /// Run one full generation pass.
    pub fn generate(
        &mut self,
        raw: Vec<RawProposition>,
        options: &GenerateOptions,
    ) -> Result<DailyBatch, EngineError> {
        let propositions = self.resolve_and_adjust(raw, options.target_date)?;
        let outcome = self.builder.build(&propositions);

        let mut slips = outcome.slips;
        self.fund_slips(&mut slips, options);

        let (slips, guard_rail) = self.guard.enforce(slips, options.bypass_guard_rail)?;
        let total_stake: Decimal = slips.iter().map(|s| s.stake).sum();

        info!(
            "[Pipeline] batch for {}: {} slip(s), ${} staked of ${} bankroll",
            options.target_date,
            slips.len(),
            total_stake,
            self.bankroll
        );

        Ok(DailyBatch {
            date: options.target_date,
            slips,
            rejections: outcome.rejections,
            eligible_count: outcome.eligible_count,
            guard_rail,
            total_stake,
            bankroll: self.bankroll,
        })
    }

    /// Anonymize subjects and fold the phase modifier into each leg's
    /// confidence, clamped back into [0, 1].
    fn resolve_and_adjust(
        &mut self,
        raw: Vec<RawProposition>,
        target_date: NaiveDate,
    ) -> Result<Vec<Proposition>, EngineError> {
        let mut propositions = Vec::with_capacity(raw.len());

        for input in raw {
            let subject_id = self.resolver.resolve(&input.subject)?;
            let modifier =
                self.tracker
                    .get_modifier(subject_id, target_date, Some(&input.prop_type));
            let adjusted = (input.confidence * modifier).clamp(0.0, 1.0);

            if (modifier - 1.0).abs() > f64::EPSILON {
                debug!(
                    "[Pipeline] {} {} confidence {:.3} -> {:.3} (modifier {:.3})",
                    subject_id, input.prop_type, input.confidence, adjusted, modifier
                );
            }

            propositions.push(Proposition {
                subject_id,
                subject_ref: input.subject,
                prop_type: input.prop_type,
                line: input.line,
                side: input.side,
                odds: input.odds,
                confidence: adjusted,
                edge: input.edge,
            });
        }

        Ok(propositions)
    }

    /// Size stakes for a batch of slips in place. Slips the portfolio does
    /// not fund keep a zero stake but stay in the batch.
    fn fund_slips(&self, slips: &mut [Slip], options: &GenerateOptions) {
        let opportunities: Vec<StakeOpportunity> = slips
            .iter()
            .filter_map(|slip| {
                let decimal_odds = Self::payout_odds(slip)?;
                Some(StakeOpportunity {
                    reference: slip.slip_id.clone(),
                    win_probability: slip.aggregate_confidence,
                    decimal_odds,
                    risk_tag: self.slip_risk_tag(slip, options.target_date),
                })
            })
            .collect();

        let allocations = self.staking.allocate_portfolio(
            self.bankroll,
            opportunities,
            options.win_rate,
            options.max_slips,
        );

        let by_id: HashMap<&str, Decimal> = allocations
            .iter()
            .map(|a| (a.reference.as_str(), a.stake))
            .collect();
        for slip in slips {
            if let Some(stake) = by_id.get(slip.slip_id.as_str()) {
                slip.stake = *stake;
            }
        }
    }

    /// Effective decimal odds a slip is staked against: the combined odds
    /// for all-or-nothing, the top payout tier for partial-credit.
    fn payout_odds(slip: &Slip) -> Option<f64> {
        match slip.archetype {
            SlipArchetype::AllOrNothing => slip.combined_odds,
            SlipArchetype::PartialCredit => slip
                .payout_table
                .as_ref()
                .and_then(|table| table.iter().next_back())
                .map(|(_, multiplier)| *multiplier),
        }
    }

    /// Risk tag for a slip: the shared current phase of its subjects when
    /// they agree, otherwise the conservative `unknown` bucket.
    fn slip_risk_tag(&self, slip: &Slip, target_date: NaiveDate) -> String {
        let mut phases = slip
            .legs
            .iter()
            .map(|leg| self.tracker.latest_phase(leg.subject_id, target_date));

        let first = phases.next().flatten();
        match first {
            Some(phase) if phases.all(|p| p == Some(phase)) => phase.as_str().to_string(),
            _ => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        PayoutTables, PhaseModifierConfig, RiskDivisorConfig, SlipConfig, StakingConfig,
    };
    use crate::phase::{ObservationInput, SubjectRef};
    use crate::types::{ObservationSource, Phase};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn pipeline(dir: &TempDir, minimum: usize) -> Pipeline {
        Pipeline::new(
            IdentityResolver::open(JsonStore::new(dir.path().join("ids.json"))),
            PhaseTracker::open(
                JsonStore::new(dir.path().join("phase.json")),
                PhaseModifierConfig::default(),
            ),
            SlipBuilder::new(PayoutTables::default(), SlipConfig::default()),
            StakingEngine::new(RiskDivisorConfig::default(), StakingConfig::default()),
            GuardRail::new(minimum),
            dec!(1000),
        )
    }

    fn raw(name: &str, prop_type: &str, confidence: f64) -> RawProposition {
        RawProposition {
            subject: name.to_string(),
            prop_type: prop_type.to_string(),
            line: 18.5,
            side: Side::Over,
            odds: Odds::Decimal(1.9),
            confidence,
            edge: None,
        }
    }

    fn options(d: &str) -> GenerateOptions {
        GenerateOptions {
            target_date: date(d),
            bypass_guard_rail: false,
            win_rate: None,
            max_slips: 10,
        }
    }

    #[test]
    fn test_end_to_end_batch() {
        let dir = TempDir::new().unwrap();
        let mut p = pipeline(&dir, 2);

        let raw_props: Vec<RawProposition> = (0..10)
            .map(|i| raw(&format!("Player Number{i}"), "points", 0.85))
            .collect();

        let batch = p.generate(raw_props, &options("2025-07-08")).unwrap();
        assert!(batch.slips.len() >= 2);
        assert!(batch.total_stake > Decimal::ZERO);
        // 25% exposure cap on a $1000 bankroll
        assert!(batch.total_stake <= dec!(250.00));
        assert!(!batch.guard_rail.bypassed);

        // Every leg was anonymized
        for slip in &batch.slips {
            for leg in &slip.legs {
                assert_ne!(leg.subject_id, Uuid::nil());
            }
        }
    }

    #[test]
    fn test_guard_rail_rejection_propagates() {
        let dir = TempDir::new().unwrap();
        let mut p = pipeline(&dir, 5);

        let raw_props = vec![
            raw("Lone Player", "points", 0.9),
            raw("Other Player", "rebounds", 0.9),
        ];

        let err = p.generate(raw_props, &options("2025-07-08")).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientSlips { .. }));
    }

    #[test]
    fn test_bypass_accepts_short_batch() {
        let dir = TempDir::new().unwrap();
        let mut p = pipeline(&dir, 5);

        let raw_props = vec![
            raw("Lone Player", "points", 0.9),
            raw("Other Player", "rebounds", 0.9),
        ];

        let mut opts = options("2025-07-08");
        opts.bypass_guard_rail = true;
        let batch = p.generate(raw_props, &opts).unwrap();
        assert!(batch.guard_rail.bypassed);
    }

    #[test]
    fn test_phase_modifier_lifts_borderline_confidence() {
        let dir = TempDir::new().unwrap();
        let mut p = pipeline(&dir, 1);

        // Ovulatory boost (points: 1.08) lifts 0.72 above the 0.75 threshold
        let names = ["Boosted One", "Boosted Two", "Boosted Three"];
        let inputs: Vec<ObservationInput> = names
            .iter()
            .map(|n| ObservationInput {
                subject: SubjectRef::Name(n.to_string()),
                date: date("2025-07-05"),
                phase: Phase::Ovulatory,
                cycle_day: None,
                confidence: 1.0,
                source: ObservationSource::UserInput,
            })
            .collect();
        {
            let (tracker, resolver) = (&mut p.tracker, &mut p.resolver);
            tracker.ingest(inputs, resolver).unwrap();
        }

        let raw_props: Vec<RawProposition> =
            names.iter().map(|n| raw(n, "points", 0.72)).collect();

        let batch = p.generate(raw_props, &options("2025-07-08")).unwrap();
        assert_eq!(batch.eligible_count, 3);
        assert!(!batch.slips.is_empty());

        // Without the phase data the same pool dies at the threshold
        let dir2 = TempDir::new().unwrap();
        let mut cold = pipeline(&dir2, 1);
        let raw_props: Vec<RawProposition> =
            names.iter().map(|n| raw(n, "points", 0.72)).collect();
        let err = cold.generate(raw_props, &options("2025-07-08")).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientSlips { .. }));
    }

    #[test]
    fn test_adjusted_confidence_clamped_to_one() {
        let dir = TempDir::new().unwrap();
        let mut p = pipeline(&dir, 1);

        {
            let (tracker, resolver) = (&mut p.tracker, &mut p.resolver);
            tracker
                .ingest(
                    vec![ObservationInput {
                        subject: SubjectRef::Name("Peak Player".to_string()),
                        date: date("2025-07-07"),
                        phase: Phase::Ovulatory,
                        cycle_day: None,
                        confidence: 1.0,
                        source: ObservationSource::UserInput,
                    }],
                    resolver,
                )
                .unwrap();
        }

        let raw_props = vec![
            raw("Peak Player", "points", 0.98),
            raw("Floor Player", "rebounds", 0.85),
        ];

        let mut opts = options("2025-07-08");
        opts.bypass_guard_rail = true;
        let batch = p.generate(raw_props, &opts).unwrap();
        for slip in &batch.slips {
            for leg in &slip.legs {
                assert!(leg.confidence <= 1.0);
            }
        }
    }
}
