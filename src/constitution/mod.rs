//! Regime constitution: per-regime policies built from skill evidence.

pub mod builder;
pub mod policy;

pub use builder::{
    constitution_hash, version_id, Constitution, ConstitutionBuilder, ConstitutionHistoryEntry,
    ConstitutionSummary, FilterCounts, PolicyChange, SaveOutcome, StoredConstitution,
};
pub use policy::{
    calculate_size_cap, determine_filter, determine_status, FilterPolicy, PolicyConfig,
    PolicyStatus, RegimeEvidence, RegimePolicy,
};
