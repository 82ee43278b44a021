//! Error handling for Aegis Core.
//!
//! This module provides:
//! - A single error type carrying a stable, machine-readable [`ErrorCode`]
//! - User-facing vs internal messages (internal text is kept for logs and Display)
//! - Severity classification driving log level
//! - Metrics integration for error tracking
//!
//! The API layer maps [`ErrorCode`] to transport status codes; this crate only
//! guarantees that every failure kind is distinguishable.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aegis_core::error::{AegisError, ErrorCode, ErrorContext, Result};
//!
//! fn load() -> Result<Settings> {
//!     read_settings().with_error_code(ErrorCode::ConfigurationError)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Aegis operations.
pub type Result<T> = std::result::Result<T, AegisError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Case Lifecycle Errors (1000-1099)
    InvalidStage,
    InvalidStatus,
    InvalidCaseId,
    InvalidStageTransition,
    CaseNotFound,

    // Persistence Errors (2000-2099)
    PersistenceError,
    DatabaseConnectionFailed,

    // Cache Errors (2100-2199)
    CacheError,
    CacheConnectionFailed,
    CacheTimeout,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Authorization (4000-4099)
    Unauthorized,

    // Validation Errors (4100-4199)
    InvalidInput,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidStage => 1000,
            Self::InvalidStatus => 1001,
            Self::InvalidCaseId => 1002,
            Self::InvalidStageTransition => 1003,
            Self::CaseNotFound => 1004,

            Self::PersistenceError => 2000,
            Self::DatabaseConnectionFailed => 2001,

            Self::CacheError => 2100,
            Self::CacheConnectionFailed => 2101,
            Self::CacheTimeout => 2102,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::Unauthorized => 4000,

            Self::InvalidInput => 4100,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Suggested HTTP status for the API layer.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::CaseNotFound => 404,

            Self::InvalidStageTransition => 409,

            Self::InvalidStage
            | Self::InvalidStatus
            | Self::InvalidCaseId
            | Self::InvalidInput => 400,

            Self::Unauthorized => 403,

            Self::DatabaseConnectionFailed | Self::CacheConnectionFailed => 503,

            Self::CacheTimeout => 504,

            Self::PersistenceError
            | Self::CacheError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InternalError => 500,
        }
    }

    /// Whether the failure was caused by the caller's input or role.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStage
                | Self::InvalidStatus
                | Self::InvalidCaseId
                | Self::InvalidStageTransition
                | Self::CaseNotFound
                | Self::Unauthorized
                | Self::InvalidInput
        )
    }

    /// Check if this error is retryable by a transport layer.
    ///
    /// Lifecycle operations never retry on their own.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::CacheConnectionFailed
                | Self::CacheError
                | Self::CacheTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "case",
            2000..=2099 => "persistence",
            2100..=2199 => "cache",
            2200..=2299 => "serialization",
            4000..=4099 => "authorization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, insufficient role)
    Low,
    /// Operational issues (cache trouble, timeouts)
    Medium,
    /// Failed writes and broken configuration
    High,
    /// Lost connectivity or internal bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidStage
            | ErrorCode::InvalidStatus
            | ErrorCode::InvalidCaseId
            | ErrorCode::InvalidStageTransition
            | ErrorCode::CaseNotFound
            | ErrorCode::Unauthorized
            | ErrorCode::InvalidInput => Self::Low,

            ErrorCode::CacheError
            | ErrorCode::CacheTimeout
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError => Self::Medium,

            ErrorCode::PersistenceError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::CacheConnectionFailed
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (case, evidence, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Aegis Core.
#[derive(Error, Debug)]
pub struct AegisError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Underlying failure text (for example the repository's own message)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AegisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl AegisError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create an input validation error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Suggested HTTP status.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    "Aegis error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Aegis error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Rejected request"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "aegis_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let detail = e.to_string();
            AegisError::with_internal(ErrorCode::InternalError, message.into(), detail).with_source(e)
        })
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| AegisError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| AegisError::new(ErrorCode::InvalidInput, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| AegisError::new(code, "Required value missing"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for AegisError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::PersistenceError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for AegisError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::CacheConnectionFailed, "Unable to connect to cache")
        } else if error.is_timeout() {
            (ErrorCode::CacheTimeout, "Cache operation timed out")
        } else {
            (ErrorCode::CacheError, "A cache error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AegisError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for AegisError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::CacheTimeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for AegisError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<anyhow::Error> for AegisError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<AegisError>() {
            Ok(aegis_error) => aegis_error,
            Err(error) => Self::internal(error.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl AegisError {
    /// Stage outside the closed stage set.
    pub fn invalid_stage(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::new(ErrorCode::InvalidStage, format!("invalid investigation stage: {:?}", stage))
            .with_context("stage", stage)
    }

    /// Status rejected by the configured status policy.
    pub fn invalid_status(status: impl Into<String>) -> Self {
        let status = status.into();
        Self::new(ErrorCode::InvalidStatus, format!("invalid case status: {:?}", status))
            .with_context("status", status)
    }

    /// Case identifier that does not parse as a UUID.
    pub fn invalid_case_id(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self::new(ErrorCode::InvalidCaseId, format!("invalid case UUID: {:?}", raw))
    }

    /// Stage change rejected by the transition policy.
    pub fn invalid_stage_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidStageTransition,
            format!("stage transition not allowed: {} -> {}", from, to),
        )
        .with_context("from_stage", from.to_string())
        .with_context("to_stage", to.to_string())
    }

    /// Caller role may not perform the operation. Never names the target case.
    pub fn unauthorized(action: &str) -> Self {
        Self::new(
            ErrorCode::Unauthorized,
            format!("unauthorized: caller role may not {}", action),
        )
    }

    /// Repository confirmed the case does not exist.
    pub fn case_not_found(case_id: impl fmt::Display) -> Self {
        let id = case_id.to_string();
        Self::new(ErrorCode::CaseNotFound, format!("case not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("case", id))
    }

    /// Repository failure; the original error text is preserved.
    pub fn persistence(operation: &str, cause: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::PersistenceError,
            format!("failed to {}", operation),
            cause.to_string(),
        )
    }

    /// Wrap any failure raised by a repository as a persistence error unless
    /// it already carries a lifecycle classification.
    pub fn into_persistence(self, operation: &str) -> Self {
        match self.code.category() {
            "case" | "authorization" | "validation" => self,
            _ if self.code == ErrorCode::PersistenceError => self,
            _ => {
                let cause = match self.internal_message {
                    Some(ref internal) => internal.clone(),
                    None => self.user_message.to_string(),
                };
                Self::persistence(operation, cause).with_source(self)
            }
        }
    }

    /// Cache store failure.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::CacheError, "A cache error occurred", message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::CaseNotFound.http_status(), 404);
        assert_eq!(ErrorCode::InvalidStage.http_status(), 400);
        assert_eq!(ErrorCode::Unauthorized.http_status(), 403);
        assert_eq!(ErrorCode::PersistenceError.http_status(), 500);
    }

    #[test]
    fn test_client_errors_are_distinguishable() {
        for code in [
            ErrorCode::InvalidStage,
            ErrorCode::InvalidStatus,
            ErrorCode::InvalidCaseId,
            ErrorCode::Unauthorized,
            ErrorCode::CaseNotFound,
        ] {
            assert!(code.is_client_error(), "{code} should be a client error");
            assert!(!code.is_retryable());
        }
        assert!(!ErrorCode::PersistenceError.is_client_error());
    }

    #[test]
    fn test_persistence_error_not_retried() {
        assert!(!ErrorCode::PersistenceError.is_retryable());
        assert!(ErrorCode::CacheConnectionFailed.is_retryable());
    }

    #[test]
    fn test_persistence_preserves_original_message() {
        let error = AegisError::persistence("update case status", "DB failure");
        assert_eq!(error.code(), ErrorCode::PersistenceError);
        assert_eq!(error.internal_message(), Some("DB failure"));
        assert!(error.to_string().contains("DB failure"));
    }

    #[test]
    fn test_into_persistence_keeps_domain_codes() {
        let not_found = AegisError::case_not_found("abc").into_persistence("check case");
        assert_eq!(not_found.code(), ErrorCode::CaseNotFound);

        let cache = AegisError::cache("connection reset").into_persistence("update stage");
        assert_eq!(cache.code(), ErrorCode::PersistenceError);
        assert!(cache.to_string().contains("connection reset"));
    }

    #[test]
    fn test_unauthorized_does_not_mention_case() {
        let error = AegisError::unauthorized("update case status");
        assert!(error.to_string().contains("unauthorized"));
        assert!(error.details().entity_id.is_none());
    }

    #[test]
    fn test_invalid_case_id_message() {
        let error = AegisError::invalid_case_id("123");
        assert!(error.to_string().contains("invalid case UUID"));
    }

    #[test]
    fn test_error_context() {
        let error = AegisError::new(ErrorCode::InvalidInput, "Invalid input")
            .with_context("field", "tenant")
            .with_context("reason", "empty");

        assert!(error.details().context.contains_key("field"));
        assert!(error.details().context.contains_key("reason"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::InvalidStage), ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::CacheError), ErrorSeverity::Medium);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::PersistenceError), ErrorSeverity::High);
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CacheConnectionFailed),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_category() {
        assert_eq!(ErrorCode::CaseNotFound.category(), "case");
        assert_eq!(ErrorCode::CacheTimeout.category(), "cache");
        assert_eq!(ErrorCode::Unauthorized.category(), "authorization");
    }

    #[test]
    fn test_error_display() {
        let error = AegisError::with_internal(
            ErrorCode::PersistenceError,
            "failed to update stage",
            "connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("PersistenceError"));
        assert!(display.contains("failed to update stage"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = AegisError::from(err);
        assert_eq!(error.code(), ErrorCode::DeserializationError);
    }
}
