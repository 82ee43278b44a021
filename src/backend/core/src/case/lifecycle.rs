//! Case lifecycle service: stage and status updates.
//!
//! Each operation validates in a fixed order and stops at the first failure.
//! Cache invalidation runs only after the repository write returned Ok, and
//! never turns a committed write into an error.
//!
//! Stage update:
//! 1. stage is one of the investigation stages
//! 2. case id is a UUID
//! 3. the case exists
//! 4. the transition policy allows the change
//! 5. the repository persists the stage
//!
//! Status update:
//! 1. the caller's role may update status (before any input is examined, so
//!    the error reveals nothing about the case)
//! 2. case id is a UUID
//! 3. the status policy accepts the value
//! 4. the repository persists the status

use crate::cache::invalidation::{CacheInvalidator, InvalidationEvent};
use crate::case::audit::{AuditAction, AuditOutcome, AuditRecord, AuditSink, TracingAuditSink};
use crate::case::model::{CaseId, Caller, InvestigationStage, Role, UpdateCaseStatusRequest};
use crate::case::repository::CaseRepository;
use crate::case::transition::{StatusPolicy, TransitionPolicy};
use crate::config::LifecycleSettings;
use crate::error::{AegisError, Result};
use crate::telemetry::LifecycleTimer;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime policy of the lifecycle service.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Role names allowed to update status, matched exactly
    pub status_update_roles: Vec<String>,

    pub status_policy: StatusPolicy,

    pub transition_policy: TransitionPolicy,

    /// Upper bound on each repository call
    pub repository_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            status_update_roles: vec![Role::Admin.to_string()],
            status_policy: StatusPolicy::free_form(),
            transition_policy: TransitionPolicy::Permissive,
            repository_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&LifecycleSettings> for LifecycleConfig {
    fn from(settings: &LifecycleSettings) -> Self {
        Self {
            status_update_roles: settings.status_update_roles.clone(),
            status_policy: StatusPolicy::closed_set(settings.allowed_statuses.iter().cloned()),
            transition_policy: settings.transition_policy,
            repository_timeout: settings.repository_timeout,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Applies stage and status changes to cases.
pub struct CaseLifecycleService {
    repo: Arc<dyn CaseRepository>,
    invalidator: Arc<CacheInvalidator>,
    audit: Arc<dyn AuditSink>,
    config: LifecycleConfig,
}

impl CaseLifecycleService {
    pub fn new(
        repo: Arc<dyn CaseRepository>,
        invalidator: Arc<CacheInvalidator>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            repo,
            invalidator,
            audit: Arc::new(TracingAuditSink),
            config,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Move a case to a new investigation stage.
    ///
    /// Setting the stage a case is already in succeeds.
    #[instrument(skip(self, caller), fields(tenant = %caller.tenant, role = %caller.role))]
    pub async fn update_case_stage(&self, caller: &Caller, case_id: &str, stage: &str) -> Result<()> {
        let timer = LifecycleTimer::start("update_stage");
        let result = self.apply_stage(caller, case_id, stage).await;
        self.finish(caller, AuditAction::UpdateStage, case_id, stage, &result, timer);
        result
    }

    /// Set a case's status. Restricted to the configured roles.
    #[instrument(skip(self, caller, request), fields(tenant = %caller.tenant, role = %caller.role))]
    pub async fn update_case_status(&self, caller: &Caller, request: &UpdateCaseStatusRequest) -> Result<()> {
        let timer = LifecycleTimer::start("update_status");
        let result = self.apply_status(caller, request).await;
        self.finish(
            caller,
            AuditAction::UpdateStatus,
            &request.case_id,
            &request.status,
            &result,
            timer,
        );
        result
    }

    async fn apply_stage(&self, caller: &Caller, raw_case_id: &str, raw_stage: &str) -> Result<()> {
        let stage = InvestigationStage::parse(raw_stage)?;
        let case_id = CaseId::parse(raw_case_id)?;

        let exists = self
            .repo_call("check case existence", self.repo.case_exists(case_id.0))
            .await?;
        if !exists {
            return Err(AegisError::case_not_found(case_id));
        }

        if self.config.transition_policy.needs_current_stage() {
            let current = self
                .repo_call("load current stage", self.repo.current_stage(&case_id))
                .await?;
            self.config.transition_policy.check(current, stage)?;
        }

        self.repo_call("update case stage", self.repo.update_stage(&case_id, stage))
            .await?;
        info!(case_id = %case_id, stage = %stage, "Case stage updated");

        self.invalidate(
            caller,
            raw_case_id,
            InvalidationEvent::StageChanged {
                tenant: caller.tenant.clone(),
                case_id: case_id.to_string(),
                users: caller.user_id.iter().cloned().collect(),
            },
        )
        .await;
        Ok(())
    }

    async fn apply_status(&self, caller: &Caller, request: &UpdateCaseStatusRequest) -> Result<()> {
        if !self.may_update_status(&caller.role) {
            return Err(AegisError::unauthorized("update case status"));
        }

        let case_id = CaseId::parse(&request.case_id)?;
        self.config.status_policy.check(&request.status)?;

        self.repo_call("update case status", self.repo.update_status(&case_id, &request.status))
            .await?;
        info!(case_id = %case_id, status = %request.status, "Case status updated");

        self.invalidate(
            caller,
            &request.case_id,
            InvalidationEvent::StatusChanged {
                tenant: caller.tenant.clone(),
                case_id: case_id.to_string(),
                users: caller.user_id.iter().cloned().collect(),
            },
        )
        .await;
        Ok(())
    }

    fn may_update_status(&self, role: &Role) -> bool {
        self.config
            .status_update_roles
            .iter()
            .any(|allowed| allowed == role.as_str())
    }

    /// Run a repository call under the configured timeout, classifying failures
    /// as persistence errors.
    async fn repo_call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.repository_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into_persistence(operation)),
            Err(_) => Err(AegisError::persistence(
                operation,
                format!("timed out after {:?}", self.config.repository_timeout),
            )),
        }
    }

    /// Invalidate after a committed write. Also clears the header key under the
    /// id exactly as the caller spelled it, when that differs from the
    /// canonical form.
    async fn invalidate(&self, caller: &Caller, raw_case_id: &str, event: InvalidationEvent) {
        let mut report = self.invalidator.apply(&event).await;

        let canonical = match &event {
            InvalidationEvent::StageChanged { case_id, .. }
            | InvalidationEvent::StatusChanged { case_id, .. } => Some(case_id.as_str()),
            _ => None,
        };
        if canonical.is_some_and(|c| c != raw_case_id) {
            report.merge(
                self.invalidator
                    .invalidate_case_header(&caller.tenant, raw_case_id)
                    .await,
            );
        }

        if report.is_clean() {
            debug!(removed = report.removed, "Cache invalidated after lifecycle update");
        } else {
            warn!(
                failures = report.failures.len(),
                "Cache invalidation incomplete; stale list entries expire with their TTL"
            );
        }
    }

    fn finish(
        &self,
        caller: &Caller,
        action: AuditAction,
        case_id: &str,
        value: &str,
        result: &Result<()>,
        timer: LifecycleTimer,
    ) {
        let (outcome, error_code) = match result {
            Ok(()) => (AuditOutcome::Success, None),
            Err(e) => {
                e.log();
                (AuditOutcome::from_error(e.code()), Some(e.code()))
            }
        };

        self.audit.record(AuditRecord {
            timestamp: Utc::now(),
            tenant: caller.tenant.to_string(),
            actor: caller.user_id.clone(),
            role: caller.role.clone(),
            action,
            case_id: Some(case_id.to_string()),
            value: Some(value.to_string()),
            outcome,
            error_code,
        });

        let label = error_code.map(|c| c.to_string()).unwrap_or_else(|| "ok".to_string());
        timer.finish(&label);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
