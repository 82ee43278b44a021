//! Audit records for lifecycle mutations.
//!
//! Audit storage lives outside this crate. Sinks receive one record per
//! attempted stage or status change, successful or not, and must not fail the
//! operation that produced it.

use crate::case::model::Role;
use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UpdateStage,
    UpdateStatus,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateStage => "update_stage",
            Self::UpdateStatus => "update_status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Rejected,
    Failed,
}

impl AuditOutcome {
    /// Classify a failed operation by its error code.
    pub fn from_error(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Unauthorized => Self::Denied,
            code if code.is_client_error() => Self::Rejected,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// One audited lifecycle attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub tenant: String,
    pub actor: Option<String>,
    pub role: Role,
    pub action: AuditAction,
    /// Case id exactly as supplied by the caller
    pub case_id: Option<String>,
    /// New stage or status value
    pub value: Option<String>,
    pub outcome: AuditOutcome,
    pub error_code: Option<ErrorCode>,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes audit records as `tracing` events under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let error_code = record.error_code.map(|c| c.to_string());
        match record.outcome {
            AuditOutcome::Success => info!(
                target: "audit",
                tenant = %record.tenant,
                actor = record.actor.as_deref().unwrap_or("-"),
                role = %record.role,
                action = record.action.as_str(),
                case_id = record.case_id.as_deref().unwrap_or("-"),
                value = record.value.as_deref().unwrap_or("-"),
                outcome = record.outcome.as_str(),
                "AUDIT"
            ),
            _ => warn!(
                target: "audit",
                tenant = %record.tenant,
                actor = record.actor.as_deref().unwrap_or("-"),
                role = %record.role,
                action = record.action.as_str(),
                case_id = record.case_id.as_deref().unwrap_or("-"),
                outcome = record.outcome.as_str(),
                error_code = error_code.as_deref().unwrap_or("-"),
                "AUDIT"
            ),
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: AuditOutcome) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            tenant: "t1".into(),
            actor: Some("u1".into()),
            role: Role::Admin,
            action: AuditAction::UpdateStatus,
            case_id: None,
            value: Some("closed".into()),
            outcome,
            error_code: None,
        }
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(AuditOutcome::from_error(ErrorCode::Unauthorized), AuditOutcome::Denied);
        assert_eq!(AuditOutcome::from_error(ErrorCode::InvalidCaseId), AuditOutcome::Rejected);
        assert_eq!(AuditOutcome::from_error(ErrorCode::PersistenceError), AuditOutcome::Failed);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingAuditSink.record(record(AuditOutcome::Success));
        TracingAuditSink.record(record(AuditOutcome::Denied));
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingAuditSink::new();
        sink.record(record(AuditOutcome::Success));
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].action, AuditAction::UpdateStatus);
    }
}
