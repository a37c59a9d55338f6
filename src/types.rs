//! Core types for the slip engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Physiological cycle phase attached to an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Follicular,
    Ovulatory,
    Luteal,
    Menstrual,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Follicular,
        Phase::Ovulatory,
        Phase::Luteal,
        Phase::Menstrual,
    ];

    /// Config-key / risk-tag spelling of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Follicular => "follicular",
            Phase::Ovulatory => "ovulatory",
            Phase::Luteal => "luteal",
            Phase::Menstrual => "menstrual",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a phase observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    UserInput,
    Predicted,
    Imported,
    TestFixture,
}

/// Which side of the line a proposition takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Over,
    Under,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Over => write!(f, "OVER"),
            Side::Under => write!(f, "UNDER"),
        }
    }
}

/// Payout odds, either decimal (2.50) or American (-110 / +150).
///
/// American quotes are always at least 100 in magnitude, so a plain integer
/// below that floor (`"odds": 2`) is read as decimal odds rather than a
/// nonsense +2 American line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Odds {
    American(i32),
    Decimal(f64),
}

impl<'de> Deserialize<'de> for Odds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => match i32::try_from(n) {
                Ok(a) if a.abs() >= 100 => Ok(Odds::American(a)),
                _ => Ok(Odds::Decimal(n as f64)),
            },
            Raw::Float(f) => Ok(Odds::Decimal(f)),
        }
    }
}

impl Odds {
    /// Convert to decimal odds. American odds of 0 map to 1.0 (no payout).
    pub fn to_decimal(&self) -> f64 {
        match *self {
            Odds::Decimal(d) => d,
            Odds::American(a) if a > 0 => 1.0 + a as f64 / 100.0,
            Odds::American(a) if a < 0 => 1.0 + 100.0 / a.abs() as f64,
            Odds::American(_) => 1.0,
        }
    }
}

/// One independently-gradeable betting proposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposition {
    /// Anonymous subject identifier (resolved at the ingestion boundary)
    pub subject_id: Uuid,
    /// Raw subject reference as it arrived; kept for display and
    /// synthetic-marker detection only
    pub subject_ref: String,
    pub prop_type: String,
    pub line: f64,
    pub side: Side,
    pub odds: Odds,
    /// Win probability in [0, 1]
    pub confidence: f64,
    pub edge: Option<f64>,
}

impl Proposition {
    /// Signature used for duplicate detection and the no-repeated-legs
    /// invariant: same subject + prop type + line.
    pub fn signature(&self) -> (Uuid, String, i64) {
        // Lines are half-point granular in practice; key on tenths so the
        // signature stays hashable.
        (
            self.subject_id,
            self.prop_type.to_lowercase(),
            (self.line * 10.0).round() as i64,
        )
    }
}

/// Wager archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlipArchetype {
    /// Every leg must hit; payout is the product of leg odds
    AllOrNothing,
    /// Reduced payout for partially-correct outcomes per a leg-count table
    PartialCredit,
}

impl fmt::Display for SlipArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlipArchetype::AllOrNothing => write!(f, "ALL-OR-NOTHING"),
            SlipArchetype::PartialCredit => write!(f, "PARTIAL-CREDIT"),
        }
    }
}

/// A multi-leg wager bundling several propositions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slip {
    pub slip_id: String,
    pub archetype: SlipArchetype,
    /// 2..=3 legs (all-or-nothing) or 2..=6 legs (partial-credit),
    /// pairwise distinct by signature
    pub legs: Vec<Proposition>,
    /// Product of leg decimal odds; all-or-nothing only
    pub combined_odds: Option<f64>,
    /// correct-leg count -> payout multiplier; partial-credit only
    pub payout_table: Option<BTreeMap<u8, f64>>,
    pub aggregate_confidence: f64,
    pub expected_value: f64,
    /// Attached by the staking engine; zero until then
    pub stake: Decimal,
}

impl Slip {
    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }
}

/// Outcome of a guard-rail check; ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRailResult {
    pub requested_minimum: usize,
    pub produced_count: usize,
    pub bypassed: bool,
}
