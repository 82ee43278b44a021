//! Case lifecycle: domain types, persistence contract, policies and the
//! service applying stage and status changes.

pub mod audit;
pub mod lifecycle;
pub mod model;
pub mod repository;
pub mod transition;

pub use audit::{
    AuditAction, AuditOutcome, AuditRecord, AuditSink, RecordingAuditSink, TracingAuditSink,
};
pub use lifecycle::{CaseLifecycleService, LifecycleConfig};
pub use model::{CaseId, CaseStatus, Caller, InvestigationStage, Role, UpdateCaseStatusRequest};
pub use repository::{CaseRecord, CaseRepository, InMemoryCaseRepository};
pub use transition::{StatusPolicy, TransitionPolicy};
