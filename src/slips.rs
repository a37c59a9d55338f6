//! Slip construction
//!
//! Filters a raw proposition pool (counting every rejection reason), then
//! groups survivors into the two wager archetypes with a bounded beam
//! search. All-or-nothing slips multiply leg odds and leg confidences;
//! partial-credit slips pay per a leg-count-indexed table with a
//! Poisson-binomial estimate over independent leg confidences. Only
//! positive-EV slips are emitted, ranked by expected value descending.

use crate::config::{PayoutTables, SlipConfig};
use crate::types::{Proposition, Slip, SlipArchetype};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

/// Hard bounds on slip sizes per archetype; the payout tables can narrow
/// these but never widen them.
const AON_LEGS: (usize, usize) = (2, 3);
const PC_LEGS: (usize, usize) = (2, 6);

/// Lines outside this magnitude are treated as data glitches.
const MAX_PLAUSIBLE_LINE: f64 = 250.0;

/// Identifier markers that flag synthetic or fixture rows.
const SYNTHETIC_MARKERS: [&str; 3] = ["test", "demo", "sample"];

/// Per-reason rejection counters, kept for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub below_confidence: usize,
    pub below_edge: usize,
    pub edge_case: usize,
    pub duplicate: usize,
    pub invalid: usize,
}

impl RejectionCounts {
    pub fn total(&self) -> usize {
        self.below_confidence + self.below_edge + self.edge_case + self.duplicate + self.invalid
    }
}

/// Result of one construction run.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub slips: Vec<Slip>,
    pub rejections: RejectionCounts,
    /// Propositions that survived filtering, whether or not they were used
    pub eligible_count: usize,
}

/// Builds slips from a filtered proposition pool.
pub struct SlipBuilder {
    payouts: PayoutTables,
    config: SlipConfig,
}

impl SlipBuilder {
    pub fn new(payouts: PayoutTables, config: SlipConfig) -> Self {
        Self { payouts, config }
    }

    /// Run the full filter + construction pipeline.
    pub fn build(&self, propositions: &[Proposition]) -> BuildOutcome {
        let mut rejections = RejectionCounts::default();
        let mut seen: HashSet<(Uuid, String, i64)> = HashSet::new();
        let mut eligible: Vec<&Proposition> = Vec::new();

        for prop in propositions {
            if prop.confidence < self.config.confidence_threshold {
                rejections.below_confidence += 1;
                continue;
            }
            if let Some(edge) = prop.edge {
                if edge < self.config.min_edge {
                    rejections.below_edge += 1;
                    continue;
                }
            }
            if Self::is_edge_case(prop) {
                rejections.edge_case += 1;
                continue;
            }
            if !seen.insert(prop.signature()) {
                rejections.duplicate += 1;
                continue;
            }
            if !Self::is_structurally_valid(prop) {
                rejections.invalid += 1;
                continue;
            }
            eligible.push(prop);
        }

        debug!(
            "[Slips] {} eligible of {} ({} below confidence, {} below edge, {} edge cases, \
             {} duplicates, {} invalid)",
            eligible.len(),
            propositions.len(),
            rejections.below_confidence,
            rejections.below_edge,
            rejections.edge_case,
            rejections.duplicate,
            rejections.invalid,
        );

        // Most confident first so the beam explores strong combinations early
        eligible.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let eligible_count = eligible.len();
        let mut subject_usage: HashMap<Uuid, usize> = HashMap::new();
        let mut slips = Vec::new();

        for archetype in [SlipArchetype::AllOrNothing, SlipArchetype::PartialCredit] {
            slips.extend(self.build_archetype(archetype, &eligible, &mut subject_usage));
        }

        slips.sort_by(|a, b| {
            b.expected_value
                .partial_cmp(&a.expected_value)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(
            "[Slips] constructed {} slip(s) from {} eligible propositions",
            slips.len(),
            eligible_count
        );

        BuildOutcome {
            slips,
            rejections,
            eligible_count,
        }
    }

    /// Implausible magnitudes and synthetic/fixture markers.
    fn is_edge_case(prop: &Proposition) -> bool {
        if !prop.line.is_finite() || prop.line <= 0.0 || prop.line > MAX_PLAUSIBLE_LINE {
            return true;
        }
        SYNTHETIC_MARKERS.iter().any(|marker| {
            contains_word(&prop.prop_type, marker) || contains_word(&prop.subject_ref, marker)
        })
    }

    fn is_structurally_valid(prop: &Proposition) -> bool {
        if prop.prop_type.trim().is_empty() || prop.subject_ref.trim().is_empty() {
            return false;
        }
        let odds = prop.odds.to_decimal();
        if !odds.is_finite() || odds <= 1.0 {
            return false;
        }
        prop.confidence.is_finite() && (0.0..=1.0).contains(&prop.confidence)
    }

    /// Leg counts an archetype may use: the payout-table keys intersected
    /// with the archetype's hard bounds.
    fn allowed_sizes(&self, archetype: SlipArchetype) -> Vec<usize> {
        let (lo, hi) = match archetype {
            SlipArchetype::AllOrNothing => AON_LEGS,
            SlipArchetype::PartialCredit => PC_LEGS,
        };
        let keys: Vec<usize> = match archetype {
            SlipArchetype::AllOrNothing => {
                self.payouts.all_or_nothing.keys().map(|k| *k as usize).collect()
            }
            SlipArchetype::PartialCredit => {
                self.payouts.partial_credit.keys().map(|k| *k as usize).collect()
            }
        };
        keys.into_iter().filter(|n| (lo..=hi).contains(n)).collect()
    }

    /// Repeatedly extract the best positive-EV slip for one archetype.
    /// Each proposition is used at most once per archetype, and the batch
    /// subject-exposure cap spans both archetypes.
    fn build_archetype(
        &self,
        archetype: SlipArchetype,
        eligible: &[&Proposition],
        subject_usage: &mut HashMap<Uuid, usize>,
    ) -> Vec<Slip> {
        let sizes = self.allowed_sizes(archetype);
        let Some(&max_size) = sizes.iter().max() else {
            return Vec::new();
        };
        let Some(&min_size) = sizes.iter().min() else {
            return Vec::new();
        };

        let mut used: HashSet<usize> = HashSet::new();
        let mut slips = Vec::new();

        loop {
            let available: Vec<usize> = (0..eligible.len())
                .filter(|i| !used.contains(i))
                .filter(|i| {
                    subject_usage
                        .get(&eligible[*i].subject_id)
                        .copied()
                        .unwrap_or(0)
                        < self.config.max_subject_exposure
                })
                .collect();
            if available.len() < min_size {
                break;
            }

            let Some(legs) =
                self.beam_search(archetype, eligible, &available, &sizes, max_size, subject_usage)
            else {
                break;
            };

            for &i in &legs {
                used.insert(i);
                *subject_usage.entry(eligible[i].subject_id).or_insert(0) += 1;
            }

            let props: Vec<Proposition> = legs.iter().map(|&i| eligible[i].clone()).collect();
            slips.push(self.assemble(archetype, props));
        }

        slips
    }

    /// Beam search over index combinations. Returns the best positive-EV
    /// leg set, or None when nothing positive remains.
    fn beam_search(
        &self,
        archetype: SlipArchetype,
        eligible: &[&Proposition],
        available: &[usize],
        sizes: &[usize],
        max_size: usize,
        subject_usage: &HashMap<Uuid, usize>,
    ) -> Option<Vec<usize>> {
        #[derive(Clone)]
        struct State {
            legs: Vec<usize>,
            score: f64,
        }

        let mut beam = vec![State {
            legs: Vec::new(),
            score: 0.0,
        }];
        let mut best: Option<(Vec<usize>, f64)> = None;

        for size in 1..=max_size {
            let mut next: Vec<State> = Vec::new();

            for state in &beam {
                let last = state.legs.last().copied();
                for &idx in available {
                    // Combinations, not permutations
                    if let Some(last) = last {
                        if idx <= last {
                            continue;
                        }
                    }

                    let subject = eligible[idx].subject_id;
                    let in_state = state
                        .legs
                        .iter()
                        .filter(|&&i| eligible[i].subject_id == subject)
                        .count();
                    if in_state >= self.config.max_legs_per_subject {
                        continue;
                    }
                    if subject_usage.get(&subject).copied().unwrap_or(0) + in_state
                        >= self.config.max_subject_exposure
                    {
                        continue;
                    }

                    let mut legs = state.legs.clone();
                    legs.push(idx);

                    let score = if sizes.contains(&size) {
                        let props: Vec<&Proposition> =
                            legs.iter().map(|&i| eligible[i]).collect();
                        self.expected_value(archetype, &props)
                    } else {
                        // Partial state: rank by joint confidence
                        legs.iter().map(|&i| eligible[i].confidence).product()
                    };

                    next.push(State { legs, score });
                }
            }

            next.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            next.truncate(self.config.beam_width);

            if sizes.contains(&size) {
                for state in &next {
                    if state.score > 0.0
                        && best.as_ref().map(|(_, ev)| state.score > *ev).unwrap_or(true)
                    {
                        best = Some((state.legs.clone(), state.score));
                    }
                }
            }

            if next.is_empty() {
                break;
            }
            beam = next;
        }

        best.map(|(legs, _)| legs)
    }

    fn expected_value(&self, archetype: SlipArchetype, legs: &[&Proposition]) -> f64 {
        match archetype {
            SlipArchetype::AllOrNothing => {
                let odds: f64 = legs.iter().map(|p| p.odds.to_decimal()).product();
                let confidence: f64 = legs.iter().map(|p| p.confidence).product();
                confidence * odds - 1.0
            }
            SlipArchetype::PartialCredit => {
                let Some(table) = self.payouts.partial_credit.get(&(legs.len() as u8)) else {
                    return f64::NEG_INFINITY;
                };
                let probs: Vec<f64> = legs.iter().map(|p| p.confidence).collect();
                let dist = exact_hit_distribution(&probs);
                table
                    .iter()
                    .map(|(&correct, &multiplier)| {
                        dist.get(correct as usize).copied().unwrap_or(0.0) * multiplier
                    })
                    .sum::<f64>()
                    - 1.0
            }
        }
    }

    fn assemble(&self, archetype: SlipArchetype, legs: Vec<Proposition>) -> Slip {
        let leg_refs: Vec<&Proposition> = legs.iter().collect();
        let expected_value = self.expected_value(archetype, &leg_refs);

        let (combined_odds, payout_table, aggregate_confidence) = match archetype {
            SlipArchetype::AllOrNothing => {
                let odds: f64 = legs.iter().map(|p| p.odds.to_decimal()).product();
                let confidence: f64 = legs.iter().map(|p| p.confidence).product();
                (Some(odds), None, confidence)
            }
            SlipArchetype::PartialCredit => {
                let table: Option<BTreeMap<u8, f64>> = self
                    .payouts
                    .partial_credit
                    .get(&(legs.len() as u8))
                    .cloned();
                let mean =
                    legs.iter().map(|p| p.confidence).sum::<f64>() / legs.len() as f64;
                (None, table, mean)
            }
        };

        let prefix = match archetype {
            SlipArchetype::AllOrNothing => "AON",
            SlipArchetype::PartialCredit => "PC",
        };
        let slip_id = format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8]);

        Slip {
            slip_id,
            archetype,
            legs,
            combined_odds,
            payout_table,
            aggregate_confidence,
            expected_value,
            stake: Decimal::ZERO,
        }
    }
}

/// Probability of exactly k hits over independent legs, by the standard
/// Poisson-binomial recurrence. `result[k]` = P(exactly k correct).
fn exact_hit_distribution(probs: &[f64]) -> Vec<f64> {
    let mut dist = vec![1.0];
    for &p in probs {
        let mut next = vec![0.0; dist.len() + 1];
        for (k, &mass) in dist.iter().enumerate() {
            next[k] += mass * (1.0 - p);
            next[k + 1] += mass * p;
        }
        dist = next;
    }
    dist
}

/// Word-boundary contains, so "Contest" does not match "test".
fn contains_word(text: &str, word: &str) -> bool {
    let text = text.to_lowercase();
    let word = word.to_lowercase();

    for (i, _) in text.match_indices(&word) {
        let before_ok = i == 0
            || !text[..i].chars().next_back().map(|c| c.is_alphanumeric()).unwrap_or(false);
        let after_end = i + word.len();
        let after_ok = after_end >= text.len()
            || !text[after_end..].chars().next().map(|c| c.is_alphanumeric()).unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Odds, Side};

    fn prop(name: &str, prop_type: &str, line: f64, confidence: f64) -> Proposition {
        // Deterministic subject id per name keeps tests readable
        let subject_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        Proposition {
            subject_id,
            subject_ref: name.to_string(),
            prop_type: prop_type.to_string(),
            line,
            side: Side::Over,
            odds: Odds::Decimal(1.9),
            confidence,
            edge: None,
        }
    }

    fn builder() -> SlipBuilder {
        SlipBuilder::new(PayoutTables::default(), SlipConfig::default())
    }

    #[test]
    fn test_confidence_threshold_filter() {
        let confidences = [0.9, 0.85, 0.8, 0.75, 0.7, 0.65];
        let props: Vec<Proposition> = confidences
            .iter()
            .enumerate()
            .map(|(i, &c)| prop(&format!("player {i}"), "points", 18.5, c))
            .collect();

        let outcome = builder().build(&props);
        assert_eq!(outcome.eligible_count, 4);
        assert_eq!(outcome.rejections.below_confidence, 2);
    }

    #[test]
    fn test_edge_case_and_invalid_filters() {
        let props = vec![
            prop("real player", "points", 18.5, 0.9),
            prop("real player", "points", -3.0, 0.9),       // implausible line
            prop("real player", "points", 9999.0, 0.9),     // implausible line
            prop("test player", "rebounds", 8.5, 0.9),      // synthetic marker
            prop("other player", "sample assists", 4.5, 0.9), // synthetic marker
            prop("contest winner", "steals", 1.5, 0.9),     // "contest" is not "test"
        ];

        let outcome = builder().build(&props);
        assert_eq!(outcome.rejections.edge_case, 4);
        assert_eq!(outcome.eligible_count, 2);
    }

    #[test]
    fn test_duplicate_signature_dropped() {
        let mut dup = prop("a player", "points", 18.5, 0.9);
        dup.side = Side::Under; // same signature regardless of side
        let props = vec![
            prop("a player", "points", 18.5, 0.95),
            dup,
            prop("a player", "points", 20.5, 0.9), // different line survives
        ];

        let outcome = builder().build(&props);
        assert_eq!(outcome.rejections.duplicate, 1);
        assert_eq!(outcome.eligible_count, 2);
    }

    #[test]
    fn test_invalid_propositions_dropped() {
        let mut no_type = prop("a player", "", 18.5, 0.9);
        no_type.prop_type = "".to_string();
        let mut bad_odds = prop("b player", "points", 18.5, 0.9);
        bad_odds.odds = Odds::Decimal(1.0);
        let mut bad_conf = prop("c player", "points", 18.5, 0.9);
        bad_conf.confidence = f64::NAN;

        let outcome = builder().build(&[no_type, bad_odds, bad_conf]);
        assert_eq!(outcome.rejections.invalid, 3);
        assert_eq!(outcome.eligible_count, 0);
        assert!(outcome.slips.is_empty());
    }

    #[test]
    fn test_no_slip_repeats_a_leg_signature() {
        let props: Vec<Proposition> = (0..12)
            .map(|i| prop(&format!("player {i}"), "points", 15.5 + i as f64, 0.88))
            .collect();

        let outcome = builder().build(&props);
        assert!(!outcome.slips.is_empty());

        for slip in &outcome.slips {
            let signatures: HashSet<_> = slip.legs.iter().map(|l| l.signature()).collect();
            assert_eq!(signatures.len(), slip.legs.len(), "slip {} repeats a leg", slip.slip_id);
        }
    }

    #[test]
    fn test_per_subject_cap_within_slip() {
        // Many props for one subject: default cap of 1 leg per subject per
        // slip means no slip may use two of them
        let props: Vec<Proposition> = (0..4)
            .map(|i| prop("same player", &format!("type{i}"), 10.5, 0.9))
            .chain((0..4).map(|i| prop(&format!("other {i}"), "points", 12.5, 0.85)))
            .collect();

        let outcome = builder().build(&props);
        for slip in &outcome.slips {
            let mut counts: HashMap<Uuid, usize> = HashMap::new();
            for leg in &slip.legs {
                *counts.entry(leg.subject_id).or_insert(0) += 1;
            }
            assert!(counts.values().all(|&c| c <= 1));
        }
    }

    #[test]
    fn test_batch_subject_exposure_cap() {
        let props: Vec<Proposition> = (0..10)
            .map(|i| prop(&format!("player {i}"), "points", 15.5, 0.9))
            .collect();

        let outcome = builder().build(&props);
        let mut usage: HashMap<Uuid, usize> = HashMap::new();
        for slip in &outcome.slips {
            for leg in &slip.legs {
                *usage.entry(leg.subject_id).or_insert(0) += 1;
            }
        }
        assert!(usage.values().all(|&c| c <= SlipConfig::default().max_subject_exposure));
    }

    #[test]
    fn test_all_or_nothing_math() {
        let b = builder();
        let p1 = prop("a player", "points", 18.5, 0.9);
        let p2 = prop("b player", "rebounds", 8.5, 0.8);
        let slip = b.assemble(SlipArchetype::AllOrNothing, vec![p1, p2]);

        assert!((slip.combined_odds.unwrap() - 1.9 * 1.9).abs() < 1e-9);
        assert!((slip.aggregate_confidence - 0.72).abs() < 1e-9);
        assert!((slip.expected_value - (0.72 * 3.61 - 1.0)).abs() < 1e-9);
        assert!(slip.payout_table.is_none());
    }

    #[test]
    fn test_partial_credit_math() {
        let b = builder();
        let legs = vec![
            prop("a player", "points", 18.5, 0.6),
            prop("b player", "rebounds", 8.5, 0.6),
            prop("c player", "assists", 4.5, 0.6),
        ];
        let slip = b.assemble(SlipArchetype::PartialCredit, legs);

        // Mean confidence, not product
        assert!((slip.aggregate_confidence - 0.6).abs() < 1e-9);
        // Default 3-leg table pays 5.0 only for 3/3: EV = 5 * 0.216 - 1
        assert!((slip.expected_value - (5.0 * 0.216 - 1.0)).abs() < 1e-9);
        assert!(slip.combined_odds.is_none());
        assert_eq!(slip.payout_table.unwrap().get(&3), Some(&5.0));
    }

    #[test]
    fn test_hit_distribution() {
        let dist = exact_hit_distribution(&[0.5, 0.5]);
        assert!((dist[0] - 0.25).abs() < 1e-9);
        assert!((dist[1] - 0.5).abs() < 1e-9);
        assert!((dist[2] - 0.25).abs() < 1e-9);

        // 4-leg mixed case sums to 1
        let dist = exact_hit_distribution(&[0.9, 0.8, 0.7, 0.6]);
        assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_slips_ranked_by_ev_desc() {
        let props: Vec<Proposition> = (0..12)
            .map(|i| prop(&format!("player {i}"), "points", 15.5, 0.78 + (i as f64) * 0.01))
            .collect();

        let outcome = builder().build(&props);
        for pair in outcome.slips.windows(2) {
            assert!(pair[0].expected_value >= pair[1].expected_value);
        }
        for slip in &outcome.slips {
            assert!(slip.expected_value > 0.0);
        }
    }

    #[test]
    fn test_too_few_eligible_yields_no_slips() {
        let props = vec![prop("only player", "points", 18.5, 0.9)];
        let outcome = builder().build(&props);
        assert_eq!(outcome.eligible_count, 1);
        assert!(outcome.slips.is_empty());
    }
}
