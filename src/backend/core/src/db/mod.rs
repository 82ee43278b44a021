//! PostgreSQL case repository.
//!
//! Expects a `cases` table with at least:
//!
//! ```sql
//! CREATE TABLE cases (
//!     id                  uuid PRIMARY KEY,
//!     investigation_stage text NOT NULL DEFAULT 'analysis',
//!     status              text NOT NULL,
//!     updated_at          timestamptz NOT NULL DEFAULT now()
//! );
//! ```

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::case::model::{CaseId, InvestigationStage};
use crate::case::repository::CaseRepository;
use crate::config::DatabaseConfig;
use crate::error::{AegisError, ErrorCode, Result};
use crate::telemetry::redact_url;

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(200);

/// Case repository backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgCaseRepository {
    pool: PgPool,
}

impl PgCaseRepository {
    /// Create a new connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| {
                AegisError::with_internal(
                    ErrorCode::DatabaseConnectionFailed,
                    "Failed to connect to the database",
                    e.to_string(),
                )
            })?;

        info!(url = %redact_url(&config.url), "Database pool connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity by executing a simple query.
    pub async fn check_connectivity(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Database connectivity check failed");
                AegisError::from(e)
            })?;
        Ok(start.elapsed())
    }

    fn record_query(&self, started: Instant, query_label: &'static str) {
        let elapsed = started.elapsed();
        metrics::histogram!("db_query_duration_seconds", "query" => query_label)
            .record(elapsed.as_secs_f64());
        if elapsed > SLOW_QUERY_THRESHOLD {
            warn!(
                query = query_label,
                duration_ms = elapsed.as_millis() as u64,
                "Slow query detected"
            );
        }
    }
}

#[async_trait]
impl CaseRepository for PgCaseRepository {
    async fn case_exists(&self, id: Uuid) -> Result<bool> {
        let started = Instant::now();
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM cases WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        self.record_query(started, "case_exists");
        Ok(exists)
    }

    async fn update_stage(&self, id: &CaseId, stage: InvestigationStage) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE cases
            SET investigation_stage = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;
        self.record_query(started, "update_stage");

        if result.rows_affected() == 0 {
            return Err(AegisError::case_not_found(id));
        }
        Ok(())
    }

    async fn update_status(&self, id: &CaseId, status: &str) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE cases
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status)
        .execute(&self.pool)
        .await?;
        self.record_query(started, "update_status");

        if result.rows_affected() == 0 {
            return Err(AegisError::case_not_found(id));
        }
        Ok(())
    }

    async fn current_stage(&self, id: &CaseId) -> Result<Option<InvestigationStage>> {
        let started = Instant::now();
        let row = sqlx::query("SELECT investigation_stage FROM cases WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        self.record_query(started, "current_stage");

        match row {
            Some(row) => {
                let raw: Option<String> = row.try_get("investigation_stage")?;
                // an unrecognised stored value is treated as unknown
                Ok(raw.and_then(|s| InvestigationStage::from_name(&s)))
            }
            None => Ok(None),
        }
    }
}
