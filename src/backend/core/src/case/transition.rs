//! Stage transition and status value policies.
//!
//! Both policies are checked before anything is persisted. They are kept
//! apart from parsing and authorization so either can be tightened without
//! touching the lifecycle service.

use crate::case::model::InvestigationStage;
use crate::error::{AegisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which stage changes are allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any stage may follow any stage.
    #[default]
    Permissive,
    /// A case may stay in its stage or move to a later one.
    Forward,
}

impl TransitionPolicy {
    /// Check if moving from `from` to `to` is valid.
    pub fn can_transition(&self, from: InvestigationStage, to: InvestigationStage) -> bool {
        use InvestigationStage::*;
        match self {
            Self::Permissive => true,
            Self::Forward => {
                from == to
                    || matches!(
                        (from, to),
                        (Analysis, Research)
                            | (Analysis, Evaluation)
                            | (Analysis, Finalization)
                            | (Research, Evaluation)
                            | (Research, Finalization)
                            | (Evaluation, Finalization)
                    )
            }
        }
    }

    /// Whether checking this policy needs the case's current stage.
    pub fn needs_current_stage(&self) -> bool {
        matches!(self, Self::Forward)
    }

    /// Validate a change. An unknown current stage always passes.
    pub fn check(&self, current: Option<InvestigationStage>, to: InvestigationStage) -> Result<()> {
        match current {
            Some(from) if !self.can_transition(from, to) => {
                Err(AegisError::invalid_stage_transition(from, to))
            }
            _ => Ok(()),
        }
    }
}

/// Which status values are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    allowed: Option<BTreeSet<String>>,
}

impl StatusPolicy {
    /// Accept any status string.
    pub fn free_form() -> Self {
        Self::default()
    }

    /// Accept only the listed values. An empty list means free-form.
    pub fn closed_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        Self {
            allowed: (!allowed.is_empty()).then_some(allowed),
        }
    }

    pub fn is_free_form(&self) -> bool {
        self.allowed.is_none()
    }

    pub fn check(&self, status: &str) -> Result<()> {
        match &self.allowed {
            Some(allowed) if !allowed.contains(status) => Err(AegisError::invalid_status(status)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use InvestigationStage::*;

    #[test]
    fn test_permissive_allows_everything() {
        let policy = TransitionPolicy::Permissive;
        for from in InvestigationStage::ALL {
            for to in InvestigationStage::ALL {
                assert!(policy.can_transition(from, to));
            }
        }
        assert!(!policy.needs_current_stage());
    }

    #[test]
    fn test_forward_policy() {
        let policy = TransitionPolicy::Forward;
        assert!(policy.can_transition(Analysis, Finalization));
        assert!(policy.can_transition(Research, Research));
        assert!(!policy.can_transition(Finalization, Analysis));
        assert!(!policy.can_transition(Evaluation, Research));

        let err = policy.check(Some(Finalization), Analysis).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageTransition);
        assert!(policy.check(None, Analysis).is_ok());
    }

    #[test]
    fn test_forward_table_matches_ordering() {
        let policy = TransitionPolicy::Forward;
        for from in InvestigationStage::ALL {
            for to in InvestigationStage::ALL {
                assert_eq!(policy.can_transition(from, to), from <= to);
            }
        }
    }

    #[test]
    fn test_status_policy() {
        assert!(StatusPolicy::free_form().check("anything at all").is_ok());
        assert!(StatusPolicy::closed_set(Vec::<String>::new()).is_free_form());

        let policy = StatusPolicy::closed_set(["open", "closed"]);
        assert!(policy.check("open").is_ok());
        assert_eq!(policy.check("Open").unwrap_err().code(), ErrorCode::InvalidStatus);
    }

    #[test]
    fn test_policy_serde() {
        let policy: TransitionPolicy = serde_json::from_str("\"forward\"").unwrap();
        assert_eq!(policy, TransitionPolicy::Forward);
    }
}
