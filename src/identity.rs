//! Identity anonymization
//!
//! Maps free-text subject names to stable anonymous UUIDs. Any two raw names
//! that normalize identically resolve to the same identifier, created once
//! and immutable thereafter. The full table is persisted through the atomic
//! store on every touch.

use crate::errors::EngineError;
use crate::store::JsonStore;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Persisted identity record. Field names are contractual store keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectIdentity {
    pub uuid: Uuid,
    pub original_name: String,
    pub normalized_name: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Summary counts over the identity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityStats {
    pub total_subjects: usize,
    pub unique_ids: usize,
}

/// Resolves raw names to anonymous identifiers, backed by a durable store.
pub struct IdentityResolver {
    store: JsonStore,
    mappings: HashMap<String, SubjectIdentity>,
}

impl IdentityResolver {
    /// Open a resolver over the given store handle, loading any existing
    /// table. A corrupt or missing store starts empty.
    pub fn open(store: JsonStore) -> Self {
        let mappings: HashMap<String, SubjectIdentity> = store.load();
        if !mappings.is_empty() {
            debug!("[Identity] loaded {} mappings from {:?}", mappings.len(), store.path());
        }
        Self { store, mappings }
    }

    /// Resolve a raw name to its anonymous id, creating a new identity on
    /// first sight. Every call bumps `last_accessed` and persists the table.
    pub fn resolve(&mut self, raw_name: &str) -> Result<Uuid, EngineError> {
        let key = normalize_name(raw_name);
        let now = Utc::now();

        let id = match self.mappings.get_mut(&key) {
            Some(identity) => {
                identity.last_accessed = now;
                identity.uuid
            }
            None => {
                let id = Uuid::new_v4();
                info!("[Identity] new subject registered under {}", id);
                self.mappings.insert(
                    key.clone(),
                    SubjectIdentity {
                        uuid: id,
                        original_name: raw_name.to_string(),
                        normalized_name: key,
                        created_at: now,
                        last_accessed: now,
                    },
                );
                id
            }
        };

        self.store.save(&self.mappings)?;
        Ok(id)
    }

    /// Reverse lookup by anonymous id.
    pub fn reverse_lookup(&self, id: Uuid) -> Option<&SubjectIdentity> {
        self.mappings.values().find(|m| m.uuid == id)
    }

    pub fn stats(&self) -> IdentityStats {
        let unique: std::collections::HashSet<Uuid> =
            self.mappings.values().map(|m| m.uuid).collect();
        IdentityStats {
            total_subjects: self.mappings.len(),
            unique_ids: unique.len(),
        }
    }
}

/// Normalize a raw name into its lookup key: fold diacritics, lowercase,
/// drop everything but alphanumerics and spaces, collapse whitespace.
/// Pure function; the whole identity contract hangs off its stability.
pub fn normalize_name(raw: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let folded: String = raw.chars().map(fold_diacritic).collect();
    let cleaned: String = folded
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect();
    spaces.replace_all(cleaned.trim(), " ").into_owned()
}

/// Map common Latin accented characters onto their base letter. Anything
/// outside the table passes through and is handled by the alphanumeric
/// filter above.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' => 'A',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' => 'E',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' => 'I',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' => 'O',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' => 'U',
        'ç' | 'ć' | 'č' => 'c',
        'Ç' | 'Ć' | 'Č' => 'C',
        'ñ' | 'ń' => 'n',
        'Ñ' | 'Ń' => 'N',
        'š' | 'ś' => 's',
        'Š' | 'Ś' => 'S',
        'ž' | 'ź' | 'ż' => 'z',
        'Ž' | 'Ź' | 'Ż' => 'Z',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        other => other,
    }
}
