//! Constitution governance.
//!
//! Lifecycle: GENERATED -> DRY_RUN -> PROPOSED -> APPLIED -> ROLLED_BACK,
//! with the back-edges in `status::TRANSITIONS`. Applying is gated and keeps
//! at most one APPLIED version per preset.

pub mod gates;
pub mod manager;
pub mod status;
pub mod version;

pub use gates::{
    drift_gate, evaluate_gates, live_sample_gate, stability_gate, ApplyGateReport, GateCheck,
    GateConfig, GateKind,
};
pub use manager::{GovernanceManager, TransitionResult};
pub use status::{can_transition, GovernanceStatus, UnknownStatus, TRANSITIONS};
pub use version::{AuditAction, AuditEntry, ConstitutionVersion, MetricsSnapshot};
