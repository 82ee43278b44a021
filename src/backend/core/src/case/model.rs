//! Case domain types.

use crate::cache::key::TenantId;
use crate::error::{AegisError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Case Identifier
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a case id from request input.
    ///
    /// Malformed input is a client error ([`crate::error::ErrorCode::InvalidCaseId`]),
    /// never a lookup miss.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| AegisError::invalid_case_id(raw))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CaseId {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Uuid> for CaseId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Investigation Stage
// ═══════════════════════════════════════════════════════════════════════════════

/// Workflow phase of an investigation, in workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationStage {
    Analysis,
    Research,
    Evaluation,
    Finalization,
}

impl InvestigationStage {
    pub const ALL: [InvestigationStage; 4] = [
        Self::Analysis,
        Self::Research,
        Self::Evaluation,
        Self::Finalization,
    ];

    /// Parse a stage name, ignoring ASCII case and surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_name(raw).ok_or_else(|| AegisError::invalid_stage(raw))
    }

    /// Look up a stage by name without constructing an error.
    pub fn from_name(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(trimmed))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Research => "research",
            Self::Evaluation => "evaluation",
            Self::Finalization => "finalization",
        }
    }

    /// Position in workflow order, starting at 0.
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for InvestigationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvestigationStage {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Case Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Open/closed-style lifecycle field of a case. Free-form unless a status
/// policy restricts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseStatus(String);

impl CaseStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles and Callers
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller role. Role names match exactly, including case and spacing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    TenantAdmin,
    DfirAdmin,
    DfirManager,
    DfirUser,
    Analyst,
    ExternalCollaborator,
    /// Any role name this crate has no special handling for
    Other(String),
}

impl Role {
    /// Parse a role name. Never fails: unknown names become [`Role::Other`].
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Admin" => Self::Admin,
            "Tenant Admin" => Self::TenantAdmin,
            "DFIR Admin" => Self::DfirAdmin,
            "DFIR Manager" => Self::DfirManager,
            "DFIR User" => Self::DfirUser,
            "Analyst" => Self::Analyst,
            "External Collaborator" => Self::ExternalCollaborator,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "Admin",
            Self::TenantAdmin => "Tenant Admin",
            Self::DfirAdmin => "DFIR Admin",
            Self::DfirManager => "DFIR Manager",
            Self::DfirUser => "DFIR User",
            Self::Analyst => "Analyst",
            Self::ExternalCollaborator => "External Collaborator",
            Self::Other(name) => name,
        }
    }

    /// Tenant-level administrative roles.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::TenantAdmin | Self::DfirAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Authenticated context handed to the core by the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub tenant: TenantId,
    pub user_id: Option<String>,
    pub role: Role,
}

impl Caller {
    pub fn new(tenant: TenantId, role: impl Into<Role>) -> Self {
        Self {
            tenant,
            user_id: None,
            role: role.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════════════════════════

/// Status update as received from the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCaseStatusRequest {
    pub case_id: String,
    pub status: String,
}

impl UpdateCaseStatusRequest {
    pub fn new(case_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            status: status.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_stage_parse() {
        assert_eq!(InvestigationStage::parse("analysis").unwrap(), InvestigationStage::Analysis);
        assert_eq!(InvestigationStage::parse("Research").unwrap(), InvestigationStage::Research);
        assert_eq!(
            InvestigationStage::parse(" FINALIZATION ").unwrap(),
            InvestigationStage::Finalization
        );

        for bad in ["", "triage", "analysis2", "closed"] {
            let err = InvestigationStage::parse(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidStage);
        }
    }

    /// Counts counter registrations made through the `metrics` facade.
    #[derive(Default)]
    struct CountingRecorder {
        counters: std::sync::atomic::AtomicUsize,
    }

    impl metrics::Recorder for CountingRecorder {
        fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
        fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
        fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

        fn register_counter(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
            self.counters.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }

        fn register_histogram(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_stage_lookup_records_no_error_metric() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            assert_eq!(InvestigationStage::from_name("legacy_triage"), None);
            assert_eq!(InvestigationStage::from_name(" Evaluation"), Some(InvestigationStage::Evaluation));
        });
        assert_eq!(recorder.counters.load(std::sync::atomic::Ordering::SeqCst), 0);

        metrics::with_local_recorder(&recorder, || {
            assert!(InvestigationStage::parse("legacy_triage").is_err());
        });
        assert!(recorder.counters.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_stage_order() {
        assert!(InvestigationStage::Analysis < InvestigationStage::Research);
        assert!(InvestigationStage::Evaluation < InvestigationStage::Finalization);
        assert_eq!(InvestigationStage::Finalization.ordinal(), 3);
    }

    #[test]
    fn test_stage_serde() {
        let json = serde_json::to_string(&InvestigationStage::Evaluation).unwrap();
        assert_eq!(json, "\"evaluation\"");
    }

    #[test]
    fn test_case_id_parse() {
        let id = CaseId::new();
        assert_eq!(CaseId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(
            CaseId::parse("not-a-uuid").unwrap_err().code(),
            ErrorCode::InvalidCaseId
        );
    }

    #[test]
    fn test_role_parse_is_exact() {
        assert_eq!(Role::parse("Admin"), Role::Admin);
        assert_eq!(Role::parse("Tenant Admin"), Role::TenantAdmin);
        assert_eq!(Role::parse("DFIR Admin"), Role::DfirAdmin);
        assert_eq!(Role::parse("External Collaborator"), Role::ExternalCollaborator);

        for raw in ["admin", "DFIR ADMIN", " DFIR Admin", "Dfir Admin"] {
            assert_eq!(Role::parse(raw), Role::Other(raw.to_string()));
        }
    }

    #[test]
    fn test_role_round_trip_name() {
        for raw in ["Admin", "DFIR Manager", "DFIR User", "Analyst", "Auditor"] {
            assert_eq!(Role::parse(raw).as_str(), raw);
        }
    }

    #[test]
    fn test_status_request_serde() {
        let req: UpdateCaseStatusRequest =
            serde_json::from_str(r#"{"caseId":"abc","status":"closed"}"#).unwrap();
        assert_eq!(req, UpdateCaseStatusRequest::new("abc", "closed"));
    }
}
