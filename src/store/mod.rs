//! Keyed record stores.
//!
//! Each trait is one persisted collection:
//! - `RegimeStore`: regime records, unique on `(date, preset)`
//! - `OutcomeStore`: outcomes, unique on `(idx, horizon, preset)`
//! - `ConstitutionStore`: one constitution per preset plus its history
//! - `VersionStore`: append-only governance versions per preset
//!
//! Writes are upserts, so any batch can be retried after a failure without
//! deduplication. `VersionStore::commit_transition` is the only
//! read-modify-write and must be atomic per preset.

pub mod memory;

use std::io;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::constitution::{Constitution, SaveOutcome, StoredConstitution};
use crate::data::{Outcome, RegimeRecord};
use crate::governance::{ConstitutionVersion, GovernanceStatus, MetricsSnapshot};

pub use memory::{InMemoryStore, StoreSnapshot};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Version {hash} of {preset} is {found}, expected {expected}")]
    Conflict {
        preset: String,
        hash: String,
        expected: GovernanceStatus,
        found: GovernanceStatus,
    },

    #[error("Version {hash} of {preset} not found")]
    MissingVersion { preset: String, hash: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Rows written by one bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

pub trait RegimeStore: Send + Sync {
    fn upsert_regimes(&self, records: Vec<RegimeRecord>) -> StoreResult<UpsertSummary>;

    /// All records of a preset in `idx` order.
    fn regimes(&self, preset: &str) -> StoreResult<Vec<RegimeRecord>>;

    /// Records with `from <= date <= to`, in date order.
    fn regimes_between(
        &self,
        preset: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<RegimeRecord>>;

    fn latest_regime(&self, preset: &str) -> StoreResult<Option<RegimeRecord>>;

    fn count_regimes_computed_since(&self, preset: &str, since: DateTime<Utc>)
        -> StoreResult<usize>;
}

pub trait OutcomeStore: Send + Sync {
    fn upsert_outcomes(&self, outcomes: Vec<Outcome>) -> StoreResult<UpsertSummary>;

    /// All outcomes of a preset in `(idx, horizon)` order.
    fn outcomes(&self, preset: &str) -> StoreResult<Vec<Outcome>>;

    fn outcomes_computed_since(&self, preset: &str, since: DateTime<Utc>)
        -> StoreResult<Vec<Outcome>>;
}

pub trait ConstitutionStore: Send + Sync {
    /// Replace the preset's constitution, appending the old one to history.
    fn save_constitution(&self, constitution: Constitution) -> StoreResult<SaveOutcome>;

    fn constitution(&self, preset: &str) -> StoreResult<Option<StoredConstitution>>;
}

/// Compare-and-set of a version's status.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub preset: String,
    pub hash: String,
    /// Status the caller validated against; the commit fails if it moved.
    pub expected: GovernanceStatus,
    pub target: GovernanceStatus,
    pub actor: String,
    pub details: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub version: ConstitutionVersion,
    /// Hashes demoted from APPLIED to ROLLED_BACK by this commit.
    pub demoted: Vec<String>,
}

pub trait VersionStore: Send + Sync {
    /// Insert unless `(preset, hash)` exists. Returns whether it was inserted.
    fn insert_version(&self, version: ConstitutionVersion) -> StoreResult<bool>;

    /// Versions of a preset by creation time.
    fn versions(&self, preset: &str) -> StoreResult<Vec<ConstitutionVersion>>;

    fn version(&self, preset: &str, hash: &str) -> StoreResult<Option<ConstitutionVersion>>;

    fn versions_with_status(
        &self,
        preset: &str,
        status: GovernanceStatus,
    ) -> StoreResult<Vec<ConstitutionVersion>>;

    /// Atomically move a version to `target`. When the target is APPLIED every
    /// other APPLIED version of the preset is demoted to ROLLED_BACK first.
    fn commit_transition(&self, commit: TransitionCommit) -> StoreResult<CommitOutcome>;

    fn attach_metrics(
        &self,
        preset: &str,
        hash: &str,
        snapshot: MetricsSnapshot,
        actor: &str,
    ) -> StoreResult<ConstitutionVersion>;
}

/// Everything the engine persists.
pub trait Store: RegimeStore + OutcomeStore + ConstitutionStore + VersionStore {}

impl<T: RegimeStore + OutcomeStore + ConstitutionStore + VersionStore> Store for T {}
