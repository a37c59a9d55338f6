//! Error taxonomy for the slip engine
//!
//! Only two conditions surface to callers: a batch failing the guard rail,
//! and a durable store that stays unwritable after retries. Everything else
//! degrades to conservative defaults inside the component that hit it.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The only batch-level hard failure: fewer slips than the guard rail
    /// requires and no bypass.
    #[error(
        "insufficient slips generated: {actual_count} found, minimum {minimum_required} \
         required (use --bypass-guard-rail to override)"
    )]
    InsufficientSlips {
        actual_count: usize,
        minimum_required: usize,
    },

    /// Durable store could not be written after the retry budget.
    #[error("store {path:?} unwritable after {attempts} attempts")]
    StoreUnwritable {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}
