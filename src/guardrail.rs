//! Daily-minimum guard rail
//!
//! Every generated batch starts Pending and is either Accepted (enough
//! slips, or an explicit bypass) or Rejected. A rejected batch surfaces as
//! a hard error so nothing downstream can act on it.

use crate::errors::EngineError;
use crate::types::{GuardRailResult, Slip};
use tracing::{debug, info, warn};

/// Batch verdict. A batch is Pending until `enforce` runs exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Enforces the minimum-slips-per-batch rule.
pub struct GuardRail {
    minimum: usize,
}

impl GuardRail {
    pub fn new(minimum: usize) -> Self {
        Self { minimum }
    }

    pub fn minimum(&self) -> usize {
        self.minimum
    }

    /// Check a batch against the minimum. Bypassing always accepts but is
    /// logged loudly; a rejection returns the batch count in the error so
    /// operators see how far short it fell.
    pub fn enforce(
        &self,
        slips: Vec<Slip>,
        bypass: bool,
    ) -> Result<(Vec<Slip>, GuardRailResult), EngineError> {
        let produced = slips.len();
        let status = if produced >= self.minimum {
            BatchStatus::Accepted
        } else if bypass {
            warn!(
                "[GuardRail] bypassing minimum: {} slip(s) produced, {} required",
                produced, self.minimum
            );
            BatchStatus::Accepted
        } else {
            BatchStatus::Rejected
        };
        debug!(
            "[GuardRail] {:?} -> {:?} ({} of {})",
            BatchStatus::Pending,
            status,
            produced,
            self.minimum
        );

        match status {
            BatchStatus::Accepted => {
                info!(
                    "[GuardRail] batch accepted with {} slip(s) (minimum {})",
                    produced, self.minimum
                );
                Ok((
                    slips,
                    GuardRailResult {
                        requested_minimum: self.minimum,
                        produced_count: produced,
                        bypassed: bypass && produced < self.minimum,
                    },
                ))
            }
            _ => Err(EngineError::InsufficientSlips {
                actual_count: produced,
                minimum_required: self.minimum,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SlipArchetype;
    use rust_decimal::Decimal;

    fn slip(n: usize) -> Slip {
        Slip {
            slip_id: format!("AON-{n:08x}"),
            archetype: SlipArchetype::AllOrNothing,
            legs: Vec::new(),
            combined_odds: Some(3.61),
            payout_table: None,
            aggregate_confidence: 0.7,
            expected_value: 0.5,
            stake: Decimal::ZERO,
        }
    }

    #[test]
    fn test_enough_slips_accepted() {
        let rail = GuardRail::new(5);
        let (slips, result) = rail.enforce((0..5).map(slip).collect(), false).unwrap();
        assert_eq!(slips.len(), 5);
        assert_eq!(result.produced_count, 5);
        assert!(!result.bypassed);
    }

    #[test]
    fn test_short_batch_rejected() {
        let rail = GuardRail::new(5);
        let err = rail.enforce((0..3).map(slip).collect(), false).unwrap_err();
        match err {
            EngineError::InsufficientSlips {
                actual_count,
                minimum_required,
            } => {
                assert_eq!(actual_count, 3);
                assert_eq!(minimum_required, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bypass_accepts_short_batch() {
        let rail = GuardRail::new(5);
        let (slips, result) = rail.enforce((0..2).map(slip).collect(), true).unwrap();
        assert_eq!(slips.len(), 2);
        assert!(result.bypassed);
    }

    #[test]
    fn test_bypass_flag_on_full_batch_not_marked() {
        let rail = GuardRail::new(2);
        let (_, result) = rail.enforce((0..4).map(slip).collect(), true).unwrap();
        assert!(!result.bypassed);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let rail = GuardRail::new(5);
        assert!(rail.enforce(Vec::new(), false).is_err());
    }
}
