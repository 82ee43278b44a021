//! Case persistence contract and an in-memory implementation.

use crate::case::model::{CaseId, InvestigationStage};
use crate::error::{AegisError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistence operations the lifecycle service depends on.
///
/// Writes are last-write-wins; implementations provide no compare-and-swap.
#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn case_exists(&self, id: Uuid) -> Result<bool>;

    async fn update_stage(&self, id: &CaseId, stage: InvestigationStage) -> Result<()>;

    async fn update_status(&self, id: &CaseId, status: &str) -> Result<()>;

    /// Current stage, when the store tracks it. Only ordered transition
    /// policies consult this.
    async fn current_stage(&self, _id: &CaseId) -> Result<Option<InvestigationStage>> {
        Ok(None)
    }
}

/// Persisted lifecycle fields of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub stage: Option<InvestigationStage>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl CaseRecord {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            stage: None,
            status: status.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_stage(mut self, stage: InvestigationStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Process-local repository for tests and tooling.
///
/// Updates to an unknown case fail with `CaseNotFound`, as an `UPDATE` that
/// matches no row does in the PostgreSQL repository.
#[derive(Debug, Default)]
pub struct InMemoryCaseRepository {
    cases: DashMap<Uuid, CaseRecord>,
}

impl InMemoryCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: CaseId, record: CaseRecord) {
        self.cases.insert(id.0, record);
    }

    pub fn get(&self, id: &CaseId) -> Option<CaseRecord> {
        self.cases.get(&id.0).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[async_trait]
impl CaseRepository for InMemoryCaseRepository {
    async fn case_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.cases.contains_key(&id))
    }

    async fn update_stage(&self, id: &CaseId, stage: InvestigationStage) -> Result<()> {
        let mut record = self
            .cases
            .get_mut(&id.0)
            .ok_or_else(|| AegisError::case_not_found(id))?;
        record.stage = Some(stage);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(&self, id: &CaseId, status: &str) -> Result<()> {
        let mut record = self
            .cases
            .get_mut(&id.0)
            .ok_or_else(|| AegisError::case_not_found(id))?;
        record.status = status.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn current_stage(&self, id: &CaseId) -> Result<Option<InvestigationStage>> {
        Ok(self.cases.get(&id.0).and_then(|r| r.stage))
    }
}
