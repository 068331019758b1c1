//! Governance lifecycle states and the transition table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceStatus {
    Generated,
    DryRun,
    Proposed,
    Applied,
    RolledBack,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown governance status: {0}")]
pub struct UnknownStatus(pub String);

/// Every permitted `(from, to)` edge. Anything else is rejected.
pub const TRANSITIONS: &[(GovernanceStatus, GovernanceStatus)] = &[
    (GovernanceStatus::Generated, GovernanceStatus::DryRun),
    (GovernanceStatus::DryRun, GovernanceStatus::Proposed),
    (GovernanceStatus::DryRun, GovernanceStatus::Generated),
    (GovernanceStatus::Proposed, GovernanceStatus::Applied),
    (GovernanceStatus::Proposed, GovernanceStatus::DryRun),
    (GovernanceStatus::Applied, GovernanceStatus::RolledBack),
    (GovernanceStatus::RolledBack, GovernanceStatus::DryRun),
];

pub fn can_transition(from: GovernanceStatus, to: GovernanceStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

impl GovernanceStatus {
    pub const ALL: [GovernanceStatus; 5] = [
        Self::Generated,
        Self::DryRun,
        Self::Proposed,
        Self::Applied,
        Self::RolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "GENERATED",
            Self::DryRun => "DRY_RUN",
            Self::Proposed => "PROPOSED",
            Self::Applied => "APPLIED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn allowed_targets(&self) -> Vec<GovernanceStatus> {
        TRANSITIONS
            .iter()
            .filter(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .collect()
    }
}

impl fmt::Display for GovernanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GovernanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_documented_edges_are_allowed() {
        let mut allowed = 0;
        for from in GovernanceStatus::ALL {
            for to in GovernanceStatus::ALL {
                if can_transition(from, to) {
                    allowed += 1;
                }
            }
        }
        assert_eq!(allowed, TRANSITIONS.len());
        for status in GovernanceStatus::ALL {
            assert!(!can_transition(status, status));
        }
    }

    #[test]
    fn test_specific_edges() {
        use GovernanceStatus::*;
        assert!(can_transition(Proposed, Applied));
        assert!(can_transition(RolledBack, DryRun));
        assert!(!can_transition(Generated, Applied));
        assert!(!can_transition(Applied, DryRun));
        assert!(!can_transition(RolledBack, Applied));
        assert_eq!(DryRun.allowed_targets(), vec![Proposed, Generated]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("dry-run".parse::<GovernanceStatus>(), Ok(GovernanceStatus::DryRun));
        assert_eq!("APPLIED".parse::<GovernanceStatus>(), Ok(GovernanceStatus::Applied));
        assert!("LIVE".parse::<GovernanceStatus>().is_err());
    }
}
