//! Cache invalidation after case and evidence mutations.
//!
//! Direct keys (header, collaborators, evidence item/tags, evidence count) are
//! deleted by exact key. List-scoped keys embed a query digest, so they are
//! located by sweeping the prefix that every digest for a `(tenant, scope)`,
//! `(tenant, user)` or `(tenant, case)` shares. List entries also carry short
//! TTLs, which bound staleness when a sweep fails.
//!
//! Invalidation is best effort. Store failures are logged, counted in the
//! returned [`InvalidationReport`] and never surface as errors: by the time the
//! invalidator runs the mutation has already committed.

use crate::cache::backend::CacheBackend;
use crate::cache::key::{CacheKey, KeyPrefix, TenantId};
use crate::error::{AegisError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Upper bound on one prefix sweep. A sweep issues many store commands, each
/// already bounded by the store's own command timeout.
pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════════════
// Invalidation Events
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain mutations that make cached data stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// A case was created; lists and dashboards gain an entry.
    CaseCreated {
        tenant: TenantId,
        #[serde(default)]
        users: Vec<String>,
    },

    /// Header fields of a case changed.
    CaseUpdated {
        tenant: TenantId,
        case_id: String,
        #[serde(default)]
        users: Vec<String>,
    },

    StageChanged {
        tenant: TenantId,
        case_id: String,
        #[serde(default)]
        users: Vec<String>,
    },

    StatusChanged {
        tenant: TenantId,
        case_id: String,
        #[serde(default)]
        users: Vec<String>,
    },

    /// Collaborators were added or removed. `users` are the affected users,
    /// whose personal lists gain or lose the case.
    CollaboratorsChanged {
        tenant: TenantId,
        case_id: String,
        #[serde(default)]
        users: Vec<String>,
    },

    /// Evidence was added, edited or removed on a case.
    EvidenceChanged {
        tenant: TenantId,
        case_id: String,
        evidence_id: Option<String>,
    },

    EvidenceTagsChanged {
        tenant: TenantId,
        evidence_id: String,
    },
}

impl InvalidationEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CaseCreated { .. } => "case_created",
            Self::CaseUpdated { .. } => "case_updated",
            Self::StageChanged { .. } => "stage_changed",
            Self::StatusChanged { .. } => "status_changed",
            Self::CollaboratorsChanged { .. } => "collaborators_changed",
            Self::EvidenceChanged { .. } => "evidence_changed",
            Self::EvidenceTagsChanged { .. } => "evidence_tags_changed",
        }
    }

    pub fn tenant(&self) -> &TenantId {
        match self {
            Self::CaseCreated { tenant, .. }
            | Self::CaseUpdated { tenant, .. }
            | Self::StageChanged { tenant, .. }
            | Self::StatusChanged { tenant, .. }
            | Self::CollaboratorsChanged { tenant, .. }
            | Self::EvidenceChanged { tenant, .. }
            | Self::EvidenceTagsChanged { tenant, .. } => tenant,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Invalidation Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// Exact keys a delete was issued for
    pub keys: Vec<String>,

    /// Prefixes swept
    pub prefixes: Vec<String>,

    /// Entries the store reported as removed
    pub removed: u64,

    /// Store failures, one message per failed key or prefix
    pub failures: Vec<String>,
}

impl InvalidationReport {
    /// True when every delete and sweep reached the store.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: InvalidationReport) {
        self.keys.extend(other.keys);
        self.prefixes.extend(other.prefixes);
        self.removed += other.removed;
        self.failures.extend(other.failures);
    }
}

/// Invalidation log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationLogEntry {
    /// Operation or event name
    pub operation: String,

    /// Tenant the pass was scoped to
    pub tenant: String,

    /// Entries removed
    pub removed: u64,

    /// Failures encountered
    pub failures: usize,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Duration in milliseconds
    pub duration_ms: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Invalidator
// ═══════════════════════════════════════════════════════════════════════════════

/// Removes cache entries made stale by a committed mutation.
pub struct CacheInvalidator {
    backend: Arc<dyn CacheBackend>,
    command_timeout: Duration,
    sweep_timeout: Duration,
    evidence_count_ttl: Duration,
    log: Mutex<VecDeque<InvalidationLogEntry>>,
    log_capacity: usize,
}

impl CacheInvalidator {
    /// Create an invalidator over a store, bounding each single-key call by
    /// `command_timeout` and each prefix sweep by [`DEFAULT_SWEEP_TIMEOUT`].
    pub fn new(backend: Arc<dyn CacheBackend>, command_timeout: Duration) -> Self {
        Self {
            backend,
            command_timeout,
            sweep_timeout: DEFAULT_SWEEP_TIMEOUT,
            evidence_count_ttl: crate::cache::key::KeyType::EvidenceCount.default_ttl(),
            log: Mutex::new(VecDeque::new()),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// TTL used when [`Self::refresh_evidence_count`] is given none.
    pub fn with_evidence_count_ttl(mut self, ttl: Duration) -> Self {
        self.evidence_count_ttl = ttl;
        self
    }

    pub fn with_sweep_timeout(mut self, timeout: Duration) -> Self {
        self.sweep_timeout = timeout;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    // ───────────────────────────────────────────────────────────────────────
    // Event dispatch
    // ───────────────────────────────────────────────────────────────────────

    /// Invalidate everything a domain event could have made stale.
    #[instrument(skip(self), fields(event = event.event_type(), tenant = %event.tenant()))]
    pub async fn apply(&self, event: &InvalidationEvent) -> InvalidationReport {
        let start = Instant::now();
        let mut report = InvalidationReport::default();

        match event {
            InvalidationEvent::CaseCreated { tenant, users } => {
                report.merge(self.invalidate_tenant_lists(tenant).await);
                report.merge(self.invalidate_user_lists(tenant, users).await);
                report.merge(self.invalidate_dashboard_totals_tenant(tenant).await);
            }
            InvalidationEvent::CaseUpdated { tenant, case_id, users }
            | InvalidationEvent::StageChanged { tenant, case_id, users }
            | InvalidationEvent::StatusChanged { tenant, case_id, users } => {
                report.merge(self.invalidate_case_header(tenant, case_id).await);
                report.merge(self.invalidate_tenant_lists(tenant).await);
                report.merge(self.invalidate_user_lists(tenant, users).await);
                report.merge(self.invalidate_dashboard_totals_tenant(tenant).await);
            }
            InvalidationEvent::CollaboratorsChanged { tenant, case_id, users } => {
                report.merge(self.invalidate_case_collabs(tenant, case_id).await);
                report.merge(self.invalidate_case_header(tenant, case_id).await);
                report.merge(self.invalidate_user_lists(tenant, users).await);
                report.merge(self.invalidate_dashboard_totals(tenant, users).await);
            }
            InvalidationEvent::EvidenceChanged { tenant, case_id, evidence_id } => {
                match evidence_id {
                    Some(evidence_id) => {
                        report.merge(self.invalidate_evidence_all(tenant, case_id, evidence_id).await)
                    }
                    None => report.merge(self.invalidate_evidence_lists_for_case(tenant, case_id).await),
                }
                report.merge(self.invalidate_evidence_count(tenant).await);
                report.merge(self.invalidate_dashboard_totals_tenant(tenant).await);
            }
            InvalidationEvent::EvidenceTagsChanged { tenant, evidence_id } => {
                report.merge(self.invalidate_evidence_tags(tenant, evidence_id).await);
                report.merge(self.invalidate_evidence_item(tenant, evidence_id).await);
            }
        }

        counter!("cache_invalidations_total", "event" => event.event_type()).increment(1);
        if !report.is_clean() {
            counter!("cache_invalidation_failures_total", "event" => event.event_type())
                .increment(report.failures.len() as u64);
        }
        self.record(event.event_type(), event.tenant(), &report, start.elapsed());

        debug!(
            removed = report.removed,
            failures = report.failures.len(),
            "Applied cache invalidation"
        );
        report
    }

    // ───────────────────────────────────────────────────────────────────────
    // Case lists and headers
    // ───────────────────────────────────────────────────────────────────────

    /// Sweep every list scope of a tenant.
    pub async fn invalidate_tenant_lists(&self, tenant: &TenantId) -> InvalidationReport {
        self.sweep_all(KeyPrefix::tenant_lists(tenant)).await
    }

    /// Sweep the personal case lists of the given users.
    pub async fn invalidate_user_lists(&self, tenant: &TenantId, users: &[String]) -> InvalidationReport {
        let prefixes = users
            .iter()
            .filter(|u| !u.is_empty())
            .map(|user| KeyPrefix::list_by_user(tenant, user))
            .collect();
        self.sweep_all(prefixes).await
    }

    pub async fn invalidate_case_header(&self, tenant: &TenantId, case_id: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.delete_key(&mut report, &CacheKey::case_header(tenant, case_id)).await;
        report
    }

    pub async fn invalidate_case_collabs(&self, tenant: &TenantId, case_id: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.delete_key(&mut report, &CacheKey::case_collabs(tenant, case_id)).await;
        report
    }

    // ───────────────────────────────────────────────────────────────────────
    // Dashboards
    // ───────────────────────────────────────────────────────────────────────

    /// Sweep dashboard totals of specific users.
    pub async fn invalidate_dashboard_totals(&self, tenant: &TenantId, users: &[String]) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for user in users.iter().filter(|u| !u.is_empty()) {
            self.sweep(&mut report, &KeyPrefix::dashboard_user(tenant, user)).await;
        }
        report
    }

    /// Sweep dashboard totals of every user in a tenant.
    pub async fn invalidate_dashboard_totals_tenant(&self, tenant: &TenantId) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.sweep(&mut report, &KeyPrefix::dashboard_tenant(tenant)).await;
        report
    }

    // ───────────────────────────────────────────────────────────────────────
    // Evidence
    // ───────────────────────────────────────────────────────────────────────

    /// Item, tags and the case's evidence lists.
    pub async fn invalidate_evidence_all(
        &self,
        tenant: &TenantId,
        case_id: &str,
        evidence_id: &str,
    ) -> InvalidationReport {
        let mut report = self.invalidate_evidence_item(tenant, evidence_id).await;
        report.merge(self.invalidate_evidence_tags(tenant, evidence_id).await);
        report.merge(self.invalidate_evidence_lists_for_case(tenant, case_id).await);
        report
    }

    pub async fn invalidate_evidence_item(&self, tenant: &TenantId, evidence_id: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.delete_key(&mut report, &CacheKey::evidence_item(tenant, evidence_id)).await;
        report
    }

    pub async fn invalidate_evidence_tags(&self, tenant: &TenantId, evidence_id: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.delete_key(&mut report, &CacheKey::evidence_tags(tenant, evidence_id)).await;
        report
    }

    pub async fn invalidate_evidence_lists_for_case(
        &self,
        tenant: &TenantId,
        case_id: &str,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.sweep(&mut report, &KeyPrefix::evidence_lists(tenant, case_id)).await;
        report
    }

    pub async fn invalidate_evidence_count(&self, tenant: &TenantId) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        self.delete_key(&mut report, &CacheKey::evidence_count(tenant)).await;
        report
    }

    /// Recompute the tenant's evidence count and store it as `{"count":n}`.
    ///
    /// When the loader fails the cached count is deleted instead, so readers
    /// fall through to the source of truth.
    #[instrument(skip(self, loader), fields(tenant = %tenant))]
    pub async fn refresh_evidence_count<F>(
        &self,
        tenant: &TenantId,
        loader: F,
        ttl: Option<Duration>,
    ) -> InvalidationReport
    where
        F: Future<Output = Result<i64>> + Send,
    {
        let key = CacheKey::evidence_count(tenant);
        let mut report = InvalidationReport::default();

        let count = match loader.await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Evidence count loader failed, dropping cached count");
                self.delete_key(&mut report, &key).await;
                return report;
            }
        };

        let payload = serde_json::json!({ "count": count }).to_string();
        let ttl = ttl.unwrap_or(self.evidence_count_ttl);
        let stored = self
            .bounded(self.backend.set(key.as_str(), payload.as_bytes(), ttl))
            .await;

        if let Err(e) = stored {
            warn!(key = %key, error = %e, "Failed to store refreshed evidence count");
            report.failures.push(format!("{}: {}", key, e));
        }
        report
    }

    // ───────────────────────────────────────────────────────────────────────
    // Log
    // ───────────────────────────────────────────────────────────────────────

    /// Get recent invalidation log entries, newest first.
    pub fn get_recent_invalidations(&self, limit: usize) -> Vec<InvalidationLogEntry> {
        self.log.lock().iter().rev().take(limit).cloned().collect()
    }

    fn record(&self, operation: &str, tenant: &TenantId, report: &InvalidationReport, elapsed: Duration) {
        let entry = InvalidationLogEntry {
            operation: operation.to_string(),
            tenant: tenant.to_string(),
            removed: report.removed,
            failures: report.failures.len(),
            timestamp: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
        };

        let mut log = self.log.lock();
        log.push_back(entry);
        while log.len() > self.log_capacity {
            log.pop_front();
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Store access
    // ───────────────────────────────────────────────────────────────────────

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        Self::within(self.command_timeout, fut).await
    }

    async fn within<T, F>(limit: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(AegisError::from(elapsed)),
        }
    }

    async fn delete_key(&self, report: &mut InvalidationReport, key: &CacheKey) {
        report.keys.push(key.to_string());
        match self.bounded(self.backend.delete(key.as_str())).await {
            Ok(existed) => report.removed += u64::from(existed),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache invalidation failed");
                report.failures.push(format!("{}: {}", key, e));
            }
        }
    }

    /// Sweep several prefixes concurrently.
    async fn sweep_all(&self, prefixes: Vec<KeyPrefix>) -> InvalidationReport {
        let sweeps = prefixes.iter().map(|prefix| async move {
            let mut report = InvalidationReport::default();
            self.sweep(&mut report, prefix).await;
            report
        });

        let mut report = InvalidationReport::default();
        for partial in join_all(sweeps).await {
            report.merge(partial);
        }
        report
    }

    async fn sweep(&self, report: &mut InvalidationReport, prefix: &KeyPrefix) {
        report.prefixes.push(prefix.to_string());
        let sweep = self.backend.delete_by_prefix(prefix.as_str());
        match Self::within(self.sweep_timeout, sweep).await {
            Ok(removed) => report.removed += removed,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Cache prefix sweep failed");
                report.failures.push(format!("{}: {}", prefix, e));
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
