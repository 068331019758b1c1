//! In-memory store with JSON snapshot persistence.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    CommitOutcome, ConstitutionStore, OutcomeStore, RegimeStore, StoreError, StoreResult,
    TransitionCommit, UpsertSummary, VersionStore,
};
use crate::constitution::{Constitution, SaveOutcome, StoredConstitution};
use crate::data::{Horizon, Outcome, RegimeRecord};
use crate::governance::{ConstitutionVersion, GovernanceStatus, MetricsSnapshot};

type RegimeMap = HashMap<String, BTreeMap<NaiveDate, RegimeRecord>>;
type OutcomeMap = HashMap<String, BTreeMap<(usize, Horizon), Outcome>>;

/// Flat serialized form of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub regimes: Vec<RegimeRecord>,
    pub outcomes: Vec<Outcome>,
    pub constitutions: Vec<StoredConstitution>,
    pub versions: Vec<ConstitutionVersion>,
}

/// Store keeping every collection in `RwLock`-guarded maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    regimes: RwLock<RegimeMap>,
    outcomes: RwLock<OutcomeMap>,
    constitutions: RwLock<HashMap<String, StoredConstitution>>,
    versions: RwLock<HashMap<String, Vec<ConstitutionVersion>>>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the backing store; every call fails until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn available(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut regimes = store.regimes.write();
            for record in snapshot.regimes {
                regimes
                    .entry(record.preset.clone())
                    .or_default()
                    .insert(record.date, record);
            }
        }
        {
            let mut outcomes = store.outcomes.write();
            for outcome in snapshot.outcomes {
                outcomes
                    .entry(outcome.preset.clone())
                    .or_default()
                    .insert((outcome.idx, outcome.horizon), outcome);
            }
        }
        {
            let mut constitutions = store.constitutions.write();
            for stored in snapshot.constitutions {
                constitutions.insert(stored.current.preset.clone(), stored);
            }
        }
        {
            let mut versions = store.versions.write();
            for version in snapshot.versions {
                versions.entry(version.preset.clone()).or_default().push(version);
            }
            for list in versions.values_mut() {
                list.sort_by_key(|v| v.created_at);
            }
        }
        store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let mut constitutions: Vec<StoredConstitution> =
            self.constitutions.read().values().cloned().collect();
        constitutions.sort_by(|a, b| a.current.preset.cmp(&b.current.preset));

        let mut versions: Vec<ConstitutionVersion> =
            self.versions.read().values().flatten().cloned().collect();
        versions.sort_by(|a, b| (&a.preset, a.created_at).cmp(&(&b.preset, b.created_at)));

        StoreSnapshot {
            regimes: self.regimes.read().values().flat_map(|m| m.values().cloned()).collect(),
            outcomes: self.outcomes.read().values().flat_map(|m| m.values().cloned()).collect(),
            constitutions,
            versions,
        }
    }

    /// Load a snapshot file; a missing file yields an empty store.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            debug!("No state file at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let snapshot: StoreSnapshot = serde_json::from_reader(reader)?;
        info!(
            "Loaded state {}: {} regimes, {} outcomes, {} versions",
            path.display(),
            snapshot.regimes.len(),
            snapshot.outcomes.len(),
            snapshot.versions.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        self.available()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &self.snapshot())?;
        debug!("Saved state to {}", path.display());
        Ok(())
    }
}

impl RegimeStore for InMemoryStore {
    fn upsert_regimes(&self, records: Vec<RegimeRecord>) -> StoreResult<UpsertSummary> {
        self.available()?;
        let mut summary = UpsertSummary::default();
        let mut regimes = self.regimes.write();
        for record in records {
            let by_date = regimes.entry(record.preset.clone()).or_default();
            match by_date.insert(record.date, record) {
                Some(_) => summary.updated += 1,
                None => summary.inserted += 1,
            }
        }
        Ok(summary)
    }

    fn regimes(&self, preset: &str) -> StoreResult<Vec<RegimeRecord>> {
        self.available()?;
        let mut records: Vec<RegimeRecord> = self
            .regimes
            .read()
            .get(preset)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.idx);
        Ok(records)
    }

    fn regimes_between(
        &self,
        preset: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<RegimeRecord>> {
        self.available()?;
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .regimes
            .read()
            .get(preset)
            .map(|m| m.range(from..=to).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    fn latest_regime(&self, preset: &str) -> StoreResult<Option<RegimeRecord>> {
        self.available()?;
        Ok(self
            .regimes
            .read()
            .get(preset)
            .and_then(|m| m.values().next_back().cloned()))
    }

    fn count_regimes_computed_since(
        &self,
        preset: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.available()?;
        Ok(self
            .regimes
            .read()
            .get(preset)
            .map(|m| m.values().filter(|r| r.computed_at >= since).count())
            .unwrap_or(0))
    }
}

impl OutcomeStore for InMemoryStore {
    fn upsert_outcomes(&self, outcomes: Vec<Outcome>) -> StoreResult<UpsertSummary> {
        self.available()?;
        let mut summary = UpsertSummary::default();
        let mut stored = self.outcomes.write();
        for outcome in outcomes {
            let by_key = stored.entry(outcome.preset.clone()).or_default();
            match by_key.insert((outcome.idx, outcome.horizon), outcome) {
                Some(_) => summary.updated += 1,
                None => summary.inserted += 1,
            }
        }
        Ok(summary)
    }

    fn outcomes(&self, preset: &str) -> StoreResult<Vec<Outcome>> {
        self.available()?;
        Ok(self
            .outcomes
            .read()
            .get(preset)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn outcomes_computed_since(
        &self,
        preset: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Outcome>> {
        self.available()?;
        Ok(self
            .outcomes
            .read()
            .get(preset)
            .map(|m| {
                m.values()
                    .filter(|o| o.computed_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl ConstitutionStore for InMemoryStore {
    fn save_constitution(&self, constitution: Constitution) -> StoreResult<SaveOutcome> {
        self.available()?;
        let mut constitutions = self.constitutions.write();
        let preset = constitution.preset.clone();
        let (next, outcome) = match constitutions.get(&preset) {
            Some(stored) => stored.replaced_by(constitution),
            None => (StoredConstitution::new(constitution), SaveOutcome::Created),
        };
        if outcome != SaveOutcome::Unchanged {
            constitutions.insert(preset, next);
        }
        Ok(outcome)
    }

    fn constitution(&self, preset: &str) -> StoreResult<Option<StoredConstitution>> {
        self.available()?;
        Ok(self.constitutions.read().get(preset).cloned())
    }
}

impl VersionStore for InMemoryStore {
    fn insert_version(&self, version: ConstitutionVersion) -> StoreResult<bool> {
        self.available()?;
        let mut versions = self.versions.write();
        let list = versions.entry(version.preset.clone()).or_default();
        if list.iter().any(|v| v.hash == version.hash) {
            return Ok(false);
        }
        list.push(version);
        list.sort_by_key(|v| v.created_at);
        Ok(true)
    }

    fn versions(&self, preset: &str) -> StoreResult<Vec<ConstitutionVersion>> {
        self.available()?;
        Ok(self.versions.read().get(preset).cloned().unwrap_or_default())
    }

    fn version(&self, preset: &str, hash: &str) -> StoreResult<Option<ConstitutionVersion>> {
        self.available()?;
        Ok(self
            .versions
            .read()
            .get(preset)
            .and_then(|list| list.iter().find(|v| v.hash == hash).cloned()))
    }

    fn versions_with_status(
        &self,
        preset: &str,
        status: GovernanceStatus,
    ) -> StoreResult<Vec<ConstitutionVersion>> {
        self.available()?;
        Ok(self
            .versions
            .read()
            .get(preset)
            .map(|list| list.iter().filter(|v| v.status == status).cloned().collect())
            .unwrap_or_default())
    }

    fn commit_transition(&self, commit: TransitionCommit) -> StoreResult<CommitOutcome> {
        self.available()?;
        // One write lock covers the check, the demotions and the promotion.
        let mut versions = self.versions.write();
        let missing = || StoreError::MissingVersion {
            preset: commit.preset.clone(),
            hash: commit.hash.clone(),
        };
        let list = versions.get_mut(&commit.preset).ok_or_else(missing)?;
        let position = list
            .iter()
            .position(|v| v.hash == commit.hash)
            .ok_or_else(missing)?;

        let found = list[position].status;
        if found != commit.expected {
            return Err(StoreError::Conflict {
                preset: commit.preset.clone(),
                hash: commit.hash.clone(),
                expected: commit.expected,
                found,
            });
        }

        let mut demoted = Vec::new();
        if commit.target == GovernanceStatus::Applied {
            for (i, version) in list.iter_mut().enumerate() {
                if i != position && version.status == GovernanceStatus::Applied {
                    *version = version.superseded(&commit.hash, &commit.actor, commit.at);
                    demoted.push(version.hash.clone());
                }
            }
        }

        let next = list[position].transitioned(
            commit.target,
            &commit.actor,
            &commit.details,
            commit.at,
        );
        list[position] = next.clone();

        Ok(CommitOutcome {
            version: next,
            demoted,
        })
    }

    fn attach_metrics(
        &self,
        preset: &str,
        hash: &str,
        snapshot: MetricsSnapshot,
        actor: &str,
    ) -> StoreResult<ConstitutionVersion> {
        self.available()?;
        let mut versions = self.versions.write();
        let version = versions
            .get_mut(preset)
            .and_then(|list| list.iter_mut().find(|v| v.hash == hash))
            .ok_or_else(|| StoreError::MissingVersion {
                preset: preset.to_string(),
                hash: hash.to_string(),
            })?;
        *version = version.with_metrics(snapshot, actor);
        Ok(version.clone())
    }
}
