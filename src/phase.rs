//! Phase tracking and confidence-weighted performance modifiers
//!
//! Stores time-stamped phase observations per anonymous subject and turns
//! them into a projection modifier for a target date. Sparse or stale data
//! degrades toward the neutral modifier 1.0, never toward a stronger bet.

use crate::config::PhaseModifierConfig;
use crate::errors::EngineError;
use crate::identity::IdentityResolver;
use crate::store::JsonStore;
use crate::types::{ObservationSource, Phase};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

/// Observations older than this relative to the query date are stale and
/// contribute nothing.
pub const STALE_AFTER_DAYS: i64 = 35;

/// Persisted phase observation. Field names are contractual store keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseObservation {
    pub id: Uuid,
    pub player_id: Uuid,
    pub date: NaiveDate,
    pub cycle_phase: Phase,
    pub cycle_day: Option<u8>,
    pub confidence_score: f64,
    pub source: ObservationSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How an incoming observation references its subject.
#[derive(Debug, Clone)]
pub enum SubjectRef {
    Id(Uuid),
    Name(String),
}

/// One observation as presented to `ingest`, before identity resolution.
#[derive(Debug, Clone)]
pub struct ObservationInput {
    pub subject: SubjectRef,
    pub date: NaiveDate,
    pub phase: Phase,
    pub cycle_day: Option<u8>,
    pub confidence: f64,
    pub source: ObservationSource,
}

/// Tracks phase observations and computes per-date modifiers.
pub struct PhaseTracker {
    store: JsonStore,
    observations: HashMap<String, PhaseObservation>,
    modifiers: PhaseModifierConfig,
}

impl PhaseTracker {
    /// Open a tracker over the given store handle and modifier table.
    pub fn open(store: JsonStore, modifiers: PhaseModifierConfig) -> Self {
        let observations: HashMap<String, PhaseObservation> = store.load();
        if !observations.is_empty() {
            debug!(
                "[Phase] loaded {} observations from {:?}",
                observations.len(),
                store.path()
            );
        }
        Self {
            store,
            observations,
            modifiers,
        }
    }

    fn key(subject_id: Uuid, date: NaiveDate) -> String {
        format!("{}_{}", subject_id, date)
    }

    /// Ingest a batch of observations, resolving raw names through the
    /// identity resolver. Per `(subject, date)` the higher-confidence entry
    /// wins; lower-confidence duplicates are skipped. Returns the number of
    /// distinct keys this batch ended up owning.
    pub fn ingest(
        &mut self,
        inputs: Vec<ObservationInput>,
        resolver: &mut IdentityResolver,
    ) -> Result<usize, EngineError> {
        let mut won_keys: HashSet<String> = HashSet::new();
        let mut skipped = 0usize;

        for input in inputs {
            if !(0.0..=1.0).contains(&input.confidence) || !input.confidence.is_finite() {
                debug!("[Phase] skipping observation with invalid confidence {}", input.confidence);
                skipped += 1;
                continue;
            }

            let subject_id = match input.subject {
                SubjectRef::Id(id) => id,
                SubjectRef::Name(ref name) => resolver.resolve(name)?,
            };

            let key = Self::key(subject_id, input.date);
            let now = Utc::now();

            match self.observations.get_mut(&key) {
                Some(existing) if existing.confidence_score >= input.confidence => {
                    debug!(
                        "[Phase] skipping duplicate for {} on {} (confidence {} <= {})",
                        subject_id, input.date, input.confidence, existing.confidence_score
                    );
                    skipped += 1;
                }
                Some(existing) => {
                    existing.cycle_phase = input.phase;
                    existing.cycle_day = input.cycle_day;
                    existing.confidence_score = input.confidence;
                    existing.source = input.source;
                    existing.updated_at = now;
                    won_keys.insert(key);
                }
                None => {
                    self.observations.insert(
                        key.clone(),
                        PhaseObservation {
                            id: Uuid::new_v4(),
                            player_id: subject_id,
                            date: input.date,
                            cycle_phase: input.phase,
                            cycle_day: input.cycle_day,
                            confidence_score: input.confidence,
                            source: input.source,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    won_keys.insert(key);
                }
            }
        }

        self.store.save(&self.observations)?;
        info!(
            "[Phase] ingested {} observation(s), skipped {} duplicate/invalid",
            won_keys.len(),
            skipped
        );
        Ok(won_keys.len())
    }

    /// Most recent observation for a subject on or before the target date.
    fn latest_observation(
        &self,
        subject_id: Uuid,
        target_date: NaiveDate,
    ) -> Option<&PhaseObservation> {
        self.observations
            .values()
            .filter(|o| o.player_id == subject_id && o.date <= target_date)
            .max_by_key(|o| o.date)
    }

    /// Confidence-weighted performance modifier for a subject on a date.
    ///
    /// No observation, or an observation older than 35 days, yields the
    /// neutral 1.0. Otherwise the configured base modifier is blended toward
    /// neutral by the observation's confidence:
    /// `1.0 + (base - 1.0) * confidence`.
    pub fn get_modifier(
        &self,
        subject_id: Uuid,
        target_date: NaiveDate,
        prop_type: Option<&str>,
    ) -> f64 {
        let Some(obs) = self.latest_observation(subject_id, target_date) else {
            return 1.0;
        };

        let age_days = (target_date - obs.date).num_days();
        if age_days > STALE_AFTER_DAYS {
            debug!(
                "[Phase] observation for {} is {} days old, treating as stale",
                subject_id, age_days
            );
            return 1.0;
        }

        let base = self
            .modifiers
            .base_modifier(obs.cycle_phase.as_str(), prop_type);
        1.0 + (base - 1.0) * obs.confidence_score
    }

    /// Phase of the freshest non-stale observation, used by the pipeline to
    /// pick the staking risk tag.
    pub fn latest_phase(&self, subject_id: Uuid, target_date: NaiveDate) -> Option<Phase> {
        self.latest_observation(subject_id, target_date)
            .filter(|o| (target_date - o.date).num_days() <= STALE_AFTER_DAYS)
            .map(|o| o.cycle_phase)
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }
}
