//! Configuration for the slip engine
//!
//! Scalar settings come from environment variables (with a `.env` file
//! honored via dotenvy). The three table configs — risk divisors, payout
//! tables, phase modifiers — are JSON files at configured paths. A missing
//! or malformed table file logs a warning and falls back to the documented
//! defaults; configuration problems are never propagated to callers.

use crate::expr::Expr;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Divisor clamp bounds. The clamp keeps a misconfigured formula from
/// producing degenerate sizing in either direction.
pub const DIVISOR_MIN: f64 = 2.0;
pub const DIVISOR_MAX: f64 = 20.0;

/// Engine configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the identity store JSON file
    pub identity_store_path: String,

    /// Path to the phase-observation store JSON file
    pub phase_store_path: String,

    /// Path to the risk-divisor table JSON file
    pub risk_divisor_path: String,

    /// Path to the payout table JSON file
    pub payout_tables_path: String,

    /// Path to the phase-modifier table JSON file
    pub phase_modifier_path: String,

    /// Bankroll in dollars
    pub bankroll: Decimal,

    /// Guard-rail minimum slips per batch
    pub minimum_slips: usize,

    /// Slip construction settings
    pub slip: SlipConfig,

    /// Stake sizing settings
    pub staking: StakingConfig,
}

#[derive(Debug, Clone)]
pub struct SlipConfig {
    /// Minimum leg confidence (default: 0.75)
    pub confidence_threshold: f64,
    /// Minimum edge for propositions that declare one (default: 0.0)
    pub min_edge: f64,
    /// Max legs referencing one subject within a single slip (default: 1)
    pub max_legs_per_subject: usize,
    /// Max legs referencing one subject across the whole batch (default: 3)
    pub max_subject_exposure: usize,
    /// Beam width bounding combinatorial search (default: 50)
    pub beam_width: usize,
}

impl Default for SlipConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            min_edge: 0.0,
            max_legs_per_subject: 1,
            max_subject_exposure: 3,
            beam_width: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StakingConfig {
    /// Global cap on the Kelly fraction (default: 0.05 = 5% of bankroll)
    pub max_bet_fraction: f64,
    /// Minimum absolute stake; below this the bet is not placed (default: $5)
    pub min_stake: Decimal,
    /// Portfolio-wide exposure cap as a fraction of bankroll (default: 0.25)
    pub max_exposure_fraction: f64,
    /// Maximum opportunities accepted into one portfolio (default: 10)
    pub max_portfolio_size: usize,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            max_bet_fraction: 0.05,
            min_stake: Decimal::from(5),
            max_exposure_fraction: 0.25,
            max_portfolio_size: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let identity_store_path = env::var("IDENTITY_STORE_PATH")
            .unwrap_or_else(|_| "data/identities.json".to_string());
        let phase_store_path = env::var("PHASE_STORE_PATH")
            .unwrap_or_else(|_| "data/phase_observations.json".to_string());
        let risk_divisor_path = env::var("RISK_DIVISOR_CONFIG")
            .unwrap_or_else(|_| "config/risk_divisors.json".to_string());
        let payout_tables_path = env::var("PAYOUT_TABLES_CONFIG")
            .unwrap_or_else(|_| "config/payout_tables.json".to_string());
        let phase_modifier_path = env::var("PHASE_MODIFIER_CONFIG")
            .unwrap_or_else(|_| "config/phase_modifiers.json".to_string());

        let bankroll = env::var("BANKROLL")
            .ok()
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or_else(|| Decimal::from(1000));

        let minimum_slips = env::var("MINIMUM_SLIPS_PER_DAY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let mut slip = SlipConfig::default();
        if let Some(t) = env::var("SLIP_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            slip.confidence_threshold = t;
        }
        if let Some(e) = env::var("SLIP_MIN_EDGE").ok().and_then(|v| v.parse().ok()) {
            slip.min_edge = e;
        }

        Self {
            identity_store_path,
            phase_store_path,
            risk_divisor_path,
            payout_tables_path,
            phase_modifier_path,
            bankroll,
            minimum_slips,
            slip,
            staking: StakingConfig::default(),
        }
    }
}

// ==================== RISK DIVISORS ====================

/// Per-phase Kelly risk divisors, with an `unknown` bucket for
/// unrecognized tags. Formulas are compiled at load time; a phase may carry
/// both a static constant (the fallback) and a formula.
#[derive(Debug, Clone)]
pub struct RiskDivisorConfig {
    static_divisors: HashMap<String, f64>,
    formulas: HashMap<String, Expr>,
    dynamic: bool,
}

#[derive(Debug, Deserialize)]
struct RawDivisorConfig {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    static_divisors: HashMap<String, f64>,
    #[serde(default)]
    dynamic_formulas: HashMap<String, String>,
}

impl Default for RiskDivisorConfig {
    fn default() -> Self {
        let static_divisors = [
            ("menstrual", 8.0),
            ("follicular", 6.0),
            ("ovulatory", 4.0),
            ("luteal", 5.0),
            ("unknown", 5.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            static_divisors,
            formulas: HashMap::new(),
            dynamic: false,
        }
    }
}

impl RiskDivisorConfig {
    /// Load from a JSON file, falling back to defaults on any problem.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw: RawDivisorConfig = match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[Config] divisor config {:?} unusable ({}), using defaults", path, e);
                return Self::default();
            }
        };

        let mut config = Self::default();
        for (phase, value) in raw.static_divisors {
            if value > 0.0 && value.is_finite() {
                config.static_divisors.insert(phase.to_lowercase(), value);
            } else {
                warn!("[Config] ignoring invalid static divisor for {}: {}", phase, value);
            }
        }

        config.dynamic = raw.mode.as_deref() == Some("dynamic");
        for (phase, formula) in raw.dynamic_formulas {
            match Expr::parse(&formula) {
                Ok(expr) => {
                    config.formulas.insert(phase.to_lowercase(), expr);
                }
                Err(e) => {
                    warn!("[Config] rejecting divisor formula for {}: {}", phase, e);
                }
            }
        }

        config
    }

    /// Resolve and clamp the divisor for a risk tag. Formula results are
    /// used only in dynamic mode with a win rate available; everything else
    /// falls back to the static constant for the tag (or the `unknown`
    /// bucket).
    pub fn divisor(&self, risk_tag: &str, win_rate: Option<f64>) -> f64 {
        let tag = risk_tag.to_lowercase();
        let key = if self.static_divisors.contains_key(&tag) || self.formulas.contains_key(&tag) {
            tag
        } else {
            "unknown".to_string()
        };

        let fallback = self
            .static_divisors
            .get(&key)
            .or_else(|| self.static_divisors.get("unknown"))
            .copied()
            .unwrap_or(5.0);

        let raw = match (self.dynamic, win_rate, self.formulas.get(&key)) {
            (true, Some(rate), Some(expr)) => {
                let value = expr.eval(rate);
                if value.is_finite() {
                    value
                } else {
                    warn!("[Config] divisor formula for {} produced non-finite value", key);
                    fallback
                }
            }
            _ => fallback,
        };

        raw.clamp(DIVISOR_MIN, DIVISOR_MAX)
    }
}

// ==================== PAYOUT TABLES ====================

/// Payout multipliers for both archetypes, keyed by leg count. The key sets
/// double as the allowed leg counts per archetype.
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutTables {
    /// leg count -> multiplier paid when every leg hits
    pub all_or_nothing: BTreeMap<u8, f64>,
    /// leg count -> (correct count -> multiplier)
    pub partial_credit: BTreeMap<u8, BTreeMap<u8, f64>>,
}

impl Default for PayoutTables {
    fn default() -> Self {
        let all_or_nothing = BTreeMap::from([(2, 3.0), (3, 6.0)]);

        let partial_credit = BTreeMap::from([
            (2, BTreeMap::from([(2, 3.0)])),
            (3, BTreeMap::from([(3, 5.0)])),
            (4, BTreeMap::from([(4, 10.0), (3, 2.5)])),
            (5, BTreeMap::from([(5, 20.0), (4, 4.0)])),
            (6, BTreeMap::from([(6, 40.0), (5, 10.0)])),
        ]);

        Self {
            all_or_nothing,
            partial_credit,
        }
    }
}

impl PayoutTables {
    /// Load from a JSON file, falling back to defaults on any problem.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<PayoutTables>(&s).map_err(|e| e.to_string()))
        {
            Ok(tables) if !tables.all_or_nothing.is_empty() && !tables.partial_credit.is_empty() => {
                tables
            }
            Ok(_) => {
                warn!("[Config] payout tables at {:?} are empty, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("[Config] payout tables {:?} unusable ({}), using defaults", path, e);
                Self::default()
            }
        }
    }
}

// ==================== PHASE MODIFIERS ====================

/// One phase's projection multipliers: a base plus optional per-prop-type
/// overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseModifierEntry {
    pub base: f64,
    #[serde(default)]
    pub props: HashMap<String, f64>,
}

/// Modifier table for all four phases.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct PhaseModifierConfig {
    entries: HashMap<String, PhaseModifierEntry>,
}

impl Default for PhaseModifierConfig {
    fn default() -> Self {
        fn entry(base: f64, props: &[(&str, f64)]) -> PhaseModifierEntry {
            PhaseModifierEntry {
                base,
                props: props.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            }
        }

        let entries = HashMap::from([
            (
                "follicular".to_string(),
                entry(1.05, &[("points", 1.03), ("rebounds", 1.05), ("assists", 1.04)]),
            ),
            (
                "ovulatory".to_string(),
                entry(1.10, &[("points", 1.08), ("rebounds", 1.10), ("assists", 1.12)]),
            ),
            (
                "luteal".to_string(),
                entry(0.95, &[("points", 0.96), ("rebounds", 0.94), ("assists", 0.95)]),
            ),
            (
                "menstrual".to_string(),
                entry(0.90, &[("points", 0.92), ("rebounds", 0.88), ("assists", 0.90)]),
            ),
        ]);

        Self { entries }
    }
}

impl PhaseModifierConfig {
    /// Load from a JSON file, falling back to defaults on any problem.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<PhaseModifierConfig>(&s).map_err(|e| e.to_string()))
        {
            Ok(config) if !config.entries.is_empty() => config,
            Ok(_) => {
                warn!("[Config] phase modifiers at {:?} are empty, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("[Config] phase modifiers {:?} unusable ({}), using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Base multiplier for a phase, optionally narrowed to a prop type.
    /// Missing entries are neutral.
    pub fn base_modifier(&self, phase: &str, prop_type: Option<&str>) -> f64 {
        let Some(entry) = self.entries.get(&phase.to_lowercase()) else {
            return 1.0;
        };
        if let Some(prop) = prop_type {
            if let Some(m) = entry.props.get(&prop.to_lowercase()) {
                return *m;
            }
        }
        entry.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisor_defaults_and_unknown_bucket() {
        let config = RiskDivisorConfig::default();
        assert!((config.divisor("ovulatory", None) - 4.0).abs() < 1e-9);
        assert!((config.divisor("MENSTRUAL", None) - 8.0).abs() < 1e-9);
        assert!((config.divisor("something_else", None) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_dynamic_divisor_clamped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("divisors.json");
        std::fs::write(
            &path,
            r#"{
                "mode": "dynamic",
                "static_divisors": {"ovulatory": 4.0},
                "dynamic_formulas": {
                    "ovulatory": "6 - (win_rate - 0.55) * 12",
                    "luteal": "1000 * win_rate",
                    "menstrual": "not a formula !!"
                }
            }"#,
        )
        .unwrap();

        let config = RiskDivisorConfig::load(&path);
        // Formula applies when a win rate is supplied
        assert!((config.divisor("ovulatory", Some(0.55)) - 6.0).abs() < 1e-9);
        // No win rate -> static fallback
        assert!((config.divisor("ovulatory", None) - 4.0).abs() < 1e-9);
        // Runaway formula clamps to the upper bound
        assert!((config.divisor("luteal", Some(0.6)) - DIVISOR_MAX).abs() < 1e-9);
        // Unparseable formula was rejected at load; static default applies
        assert!((config.divisor("menstrual", Some(0.6)) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_config_files_fall_back() {
        let divisors = RiskDivisorConfig::load("does/not/exist.json");
        assert!((divisors.divisor("luteal", None) - 5.0).abs() < 1e-9);

        let payouts = PayoutTables::load("does/not/exist.json");
        assert_eq!(payouts.all_or_nothing.get(&2), Some(&3.0));

        let modifiers = PhaseModifierConfig::load("does/not/exist.json");
        assert!((modifiers.base_modifier("ovulatory", None) - 1.10).abs() < 1e-9);
    }

    #[test]
    fn test_phase_modifier_prop_fallback() {
        let config = PhaseModifierConfig::default();
        assert!((config.base_modifier("ovulatory", Some("assists")) - 1.12).abs() < 1e-9);
        // Unlisted prop type falls back to the phase base
        assert!((config.base_modifier("ovulatory", Some("turnovers")) - 1.10).abs() < 1e-9);
        // Unknown phase is neutral
        assert!((config.base_modifier("equinox", None) - 1.0).abs() < 1e-9);
    }
}
