//! Tenant-scoped cache key derivation.
//!
//! This module provides:
//! - Validated tenant identifiers
//! - The closed set of case-list scopes
//! - Typed keys rendering to the shared store's key formats
//! - Sweep prefixes used by invalidation
//! - Default TTLs per key type
//!
//! Key formats are shared with other services reading the same store and must
//! not change:
//!
//! ```text
//! cases:<tenant>:<scope>:q=<sha256hex(sig)>
//! cases:<tenant>:byUser:<user>:q=<sha256hex(sig)>
//! case:<tenant>:<case>:header
//! case:<tenant>:<case>:collabs
//! ev:list:<tenant>:<case>:q=<sha256hex(sig)>
//! ev:item:<tenant>:<evidence>
//! ev:tags:<tenant>:<evidence>
//! dashboard:<tenant>:totals:user:<user>:q=<sha256hex(sig)>
//! evidence:count:tenant:<tenant>
//! ```

use crate::cache::signature::QuerySignature;
use crate::error::{AegisError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Leading segments of every key family this crate writes.
pub const KEY_FAMILIES: [&str; 5] = ["cases:", "case:", "ev:", "dashboard:", "evidence:count:"];

// ═══════════════════════════════════════════════════════════════════════════════
// Tenant
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier of a tenant isolation boundary.
///
/// Tenants may not contain `:` or whitespace, which keeps every tenant's keys
/// and sweep prefixes disjoint from every other tenant's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(AegisError::invalid_input("tenant id must not be empty"));
        }
        if raw.chars().any(|c| c == ':' || c.is_whitespace()) {
            return Err(AegisError::invalid_input(format!(
                "tenant id may not contain ':' or whitespace: {:?}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = AegisError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(tenant: TenantId) -> Self {
        tenant.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// List Scope
// ═══════════════════════════════════════════════════════════════════════════════

/// Named subset of a tenant's case list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListScope {
    Active,
    Closed,
    Archived,
    All,
}

impl ListScope {
    pub const ALL: [ListScope; 4] = [Self::Active, Self::Closed, Self::Archived, Self::All];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Archived => "archived",
            Self::All => "all",
        }
    }
}

impl fmt::Display for ListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListScope {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AegisError::invalid_input(format!("unknown list scope: {:?}", s)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Key Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Kinds of cached views, with their default TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    CaseList,
    CaseListByUser,
    CaseHeader,
    CaseCollaborators,
    EvidenceList,
    EvidenceItem,
    EvidenceTags,
    DashboardTotals,
    EvidenceCount,
}

impl KeyType {
    /// Default TTL for this key type.
    ///
    /// Digest-scoped lists stay short: they are the entries most likely to be
    /// missed by a failed sweep.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::CaseList => Duration::from_secs(120),
            Self::CaseListByUser => Duration::from_secs(120),
            Self::CaseHeader => Duration::from_secs(300),
            Self::CaseCollaborators => Duration::from_secs(300),
            Self::EvidenceList => Duration::from_secs(120),
            Self::EvidenceItem => Duration::from_secs(300),
            Self::EvidenceTags => Duration::from_secs(300),
            Self::DashboardTotals => Duration::from_secs(60),
            Self::EvidenceCount => Duration::from_secs(300),
        }
    }

    /// Whether keys of this type embed a query digest.
    pub fn is_digest_scoped(&self) -> bool {
        matches!(
            self,
            Self::CaseList | Self::CaseListByUser | Self::EvidenceList | Self::DashboardTotals
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseList => "case_list",
            Self::CaseListByUser => "case_list_by_user",
            Self::CaseHeader => "case_header",
            Self::CaseCollaborators => "case_collaborators",
            Self::EvidenceList => "evidence_list",
            Self::EvidenceItem => "evidence_item",
            Self::EvidenceTags => "evidence_tags",
            Self::DashboardTotals => "dashboard_totals",
            Self::EvidenceCount => "evidence_count",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Key
// ═══════════════════════════════════════════════════════════════════════════════

/// A fully rendered cache key and its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    key_type: KeyType,
    rendered: String,
}

impl CacheKey {
    fn new(key_type: KeyType, rendered: String) -> Self {
        Self { key_type, rendered }
    }

    /// `cases:<tenant>:<scope>:q=<digest>`
    pub fn list(tenant: &TenantId, scope: ListScope, sig: &QuerySignature) -> Self {
        Self::new(
            KeyType::CaseList,
            format!("{}{}", KeyPrefix::list(tenant, scope), sig.digest()),
        )
    }

    /// `cases:<tenant>:byUser:<user>:q=<digest>`
    pub fn list_by_user(tenant: &TenantId, user_id: &str, sig: &QuerySignature) -> Self {
        Self::new(
            KeyType::CaseListByUser,
            format!("{}{}", KeyPrefix::list_by_user(tenant, user_id), sig.digest()),
        )
    }

    /// `case:<tenant>:<case>:header`
    pub fn case_header(tenant: &TenantId, case_id: &str) -> Self {
        Self::new(KeyType::CaseHeader, format!("case:{}:{}:header", tenant, case_id))
    }

    /// `case:<tenant>:<case>:collabs`
    pub fn case_collabs(tenant: &TenantId, case_id: &str) -> Self {
        Self::new(
            KeyType::CaseCollaborators,
            format!("case:{}:{}:collabs", tenant, case_id),
        )
    }

    /// `ev:list:<tenant>:<case>:q=<digest>`
    pub fn evidence_list(tenant: &TenantId, case_id: &str, sig: &QuerySignature) -> Self {
        Self::new(
            KeyType::EvidenceList,
            format!("{}{}", KeyPrefix::evidence_lists(tenant, case_id), sig.digest()),
        )
    }

    /// `ev:item:<tenant>:<evidence>`
    pub fn evidence_item(tenant: &TenantId, evidence_id: &str) -> Self {
        Self::new(KeyType::EvidenceItem, format!("ev:item:{}:{}", tenant, evidence_id))
    }

    /// `ev:tags:<tenant>:<evidence>`
    pub fn evidence_tags(tenant: &TenantId, evidence_id: &str) -> Self {
        Self::new(KeyType::EvidenceTags, format!("ev:tags:{}:{}", tenant, evidence_id))
    }

    /// `dashboard:<tenant>:totals:user:<user>:q=<digest>`
    pub fn dashboard_totals(tenant: &TenantId, user_id: &str, sig: &QuerySignature) -> Self {
        Self::new(
            KeyType::DashboardTotals,
            format!("{}{}", KeyPrefix::dashboard_user(tenant, user_id), sig.digest()),
        )
    }

    /// `evidence:count:tenant:<tenant>`
    pub fn evidence_count(tenant: &TenantId) -> Self {
        Self::new(KeyType::EvidenceCount, format!("evidence:count:tenant:{}", tenant))
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Default TTL of this key's type.
    pub fn ttl(&self) -> Duration {
        self.key_type.default_ttl()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sweep Prefixes
// ═══════════════════════════════════════════════════════════════════════════════

/// Prefix covering every digest variant of a list-scoped key family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    /// `cases:<tenant>:<scope>:q=`
    pub fn list(tenant: &TenantId, scope: ListScope) -> Self {
        Self(format!("cases:{}:{}:q=", tenant, scope))
    }

    /// `cases:<tenant>:byUser:<user>:q=`
    pub fn list_by_user(tenant: &TenantId, user_id: &str) -> Self {
        Self(format!("cases:{}:byUser:{}:q=", tenant, user_id))
    }

    /// `ev:list:<tenant>:<case>:q=`
    pub fn evidence_lists(tenant: &TenantId, case_id: &str) -> Self {
        Self(format!("ev:list:{}:{}:q=", tenant, case_id))
    }

    /// `dashboard:<tenant>:totals:user:<user>:q=`
    pub fn dashboard_user(tenant: &TenantId, user_id: &str) -> Self {
        Self(format!("dashboard:{}:totals:user:{}:q=", tenant, user_id))
    }

    /// `dashboard:<tenant>:totals:`
    pub fn dashboard_tenant(tenant: &TenantId) -> Self {
        Self(format!("dashboard:{}:totals:", tenant))
    }

    /// Every scope's list prefix for a tenant.
    pub fn tenant_lists(tenant: &TenantId) -> Vec<Self> {
        ListScope::ALL
            .into_iter()
            .map(|scope| Self::list(tenant, scope))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.0)
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
