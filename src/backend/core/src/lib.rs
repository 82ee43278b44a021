#![allow(clippy::result_large_err)]
//! # Aegis Core
//!
//! Backend core of the multi-tenant case management service.
//!
//! ## Architecture
//!
//! - **Cache**: query signatures, tenant-scoped key derivation, in-memory and
//!   Redis stores, read-through population and post-mutation invalidation
//! - **Case**: investigation stage and status updates with role checks,
//!   transition policies and audit records
//! - **DB**: PostgreSQL case repository
//! - **Telemetry**: structured logging and metric descriptions
//! - **Config**: file and environment configuration

pub mod cache;
pub mod case;
pub mod config;
pub mod db;
pub mod error;
pub mod telemetry;

pub use error::{AegisError, Result, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{
        Cache, CacheBackend, CacheConfig, CacheInvalidator, CacheKey, InMemoryBackend,
        InvalidationEvent, InvalidationReport, KeyPrefix, KeyType, ListQuery, ListScope,
        QuerySignature, RedisBackend, SortOrder, TenantId,
    };
    pub use crate::case::{
        AuditSink, CaseId, CaseLifecycleService, CaseRepository, Caller, InvestigationStage,
        LifecycleConfig, Role, StatusPolicy, TransitionPolicy, UpdateCaseStatusRequest,
    };
    pub use crate::config::Config;
    pub use crate::db::PgCaseRepository;
    pub use crate::error::{AegisError, Result, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity};
}
