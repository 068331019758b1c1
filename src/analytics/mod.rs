//! Skill analytics module.
//!
//! Provides:
//! - Regime-conditioned skill matrix (index join, legacy date join)
//! - Decade stability grading of the matrix cells

pub mod skill_matrix;
pub mod stability;

pub use skill_matrix::{
    CellCounts, Confidence, ConfidenceTiers, JoinStrategy, SkillCell, SkillConfig, SkillMatrix,
    SkillMatrixBuilder,
};
pub use stability::{
    DecadeCell, GradeRule, StabilityAnalyzer, StabilityConfig, StabilityGrade, StabilityReport,
    StabilityScore,
};
