//! aegis-cachectl - operator tooling for the case cache and lifecycle core.
//!
//! Derives cache keys exactly as the service does, runs invalidations against
//! the configured store, and applies stage/status changes through the
//! lifecycle service.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use aegis_core::cache::{
    Cache, CacheKey, InvalidationEvent, KeyPrefix, ListQuery, ListScope, TenantId,
};
use aegis_core::case::{CaseLifecycleService, Caller, LifecycleConfig, UpdateCaseStatusRequest};
use aegis_core::config::Config;
use aegis_core::db::PgCaseRepository;
use aegis_core::telemetry::init_telemetry;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "aegis-cachectl",
    author = "Aezi <aezi.zhu@icloud.com>",
    version,
    about = "Aegis cache and case lifecycle tooling",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true, env = "AEGIS_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cache key for a view, without touching the store
    Key(KeyArgs),

    /// Invalidate cache entries for a domain event
    #[command(subcommand)]
    Invalidate(InvalidateCommands),

    /// Show cache store statistics
    Stats,

    /// Apply lifecycle changes against the configured database
    #[command(subcommand)]
    Case(CaseCommands),
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyKind {
    List,
    ByUser,
    Header,
    Collabs,
    EvidenceList,
    EvidenceItem,
    EvidenceTags,
    Dashboard,
    EvidenceCount,
}

#[derive(Args)]
struct KeyArgs {
    /// View to derive a key for
    kind: KeyKind,

    /// Tenant identifier
    #[arg(short, long)]
    tenant: String,

    /// Case or evidence id, for id-scoped views
    #[arg(long)]
    id: Option<String>,

    /// User id, for per-user views
    #[arg(long)]
    user: Option<String>,

    /// List scope
    #[arg(long, default_value = "active")]
    scope: String,

    /// Query parameters as name=value, repeatable (page, pageSize, sort, order, filters)
    #[arg(short = 'q', long = "param")]
    params: Vec<String>,
}

#[derive(Subcommand)]
enum InvalidateCommands {
    /// A case was created
    CaseCreated {
        #[arg(short, long)]
        tenant: String,
        #[arg(long = "user")]
        users: Vec<String>,
    },
    /// A case's header, stage or status changed
    CaseUpdated {
        #[arg(short, long)]
        tenant: String,
        #[arg(long)]
        case: String,
        #[arg(long = "user")]
        users: Vec<String>,
    },
    /// Collaborators of a case changed
    Collaborators {
        #[arg(short, long)]
        tenant: String,
        #[arg(long)]
        case: String,
        #[arg(long = "user")]
        users: Vec<String>,
    },
    /// Evidence on a case changed
    Evidence {
        #[arg(short, long)]
        tenant: String,
        #[arg(long)]
        case: String,
        #[arg(long)]
        evidence: Option<String>,
    },
    /// Tags on an evidence item changed
    EvidenceTags {
        #[arg(short, long)]
        tenant: String,
        #[arg(long)]
        evidence: String,
    },
    /// Sweep every list of a tenant
    TenantLists {
        #[arg(short, long)]
        tenant: String,
    },
}

#[derive(Args)]
struct CallerArgs {
    /// Tenant identifier
    #[arg(short, long)]
    tenant: String,

    /// Role the change is made as
    #[arg(long, default_value = "Admin")]
    role: String,

    /// Acting user id
    #[arg(long)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum CaseCommands {
    /// Set a case's investigation stage
    Stage {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        case: String,
        #[arg(long)]
        stage: String,
    },
    /// Set a case's status
    Status {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        case: String,
        #[arg(long)]
        status: String,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_telemetry(&config.logging, &config.environment)?;

    match cli.command {
        Commands::Key(args) => {
            let derived = derive_key(&args)?;
            print_output(cli.format, &derived, |d| {
                let mut out = String::new();
                if let Some(sig) = &d.signature {
                    out.push_str(&format!("signature: {}\ndigest:    {}\n", sig, d.digest.as_deref().unwrap_or("")));
                }
                out.push_str(&format!("key:       {}\nttl:       {}s", d.key, d.ttl_secs));
                if let Some(prefix) = &d.sweep_prefix {
                    out.push_str(&format!("\nprefix:    {}", prefix));
                }
                out
            });
        }
        Commands::Invalidate(cmd) => {
            let cache = Cache::from_settings(&config.cache).await?;
            let invalidator = cache.invalidator();
            let report = match cmd {
                InvalidateCommands::TenantLists { tenant } => {
                    invalidator.invalidate_tenant_lists(&tenant_id(&tenant)?).await
                }
                other => invalidator.apply(&invalidation_event(other)?).await,
            };
            print_output(cli.format, &report, |r| {
                format!(
                    "removed {} entries ({} keys, {} prefixes, {} failures)",
                    r.removed,
                    r.keys.len(),
                    r.prefixes.len(),
                    r.failures.len()
                )
            });
            if !report.is_clean() {
                bail!("invalidation incomplete: {}", report.failures.join("; "));
            }
        }
        Commands::Stats => {
            let cache = Cache::from_settings(&config.cache).await?;
            let stats = cache.stats().await?;
            print_output(cli.format, &stats, |s| {
                format!(
                    "backend:  {}\nentries:  {}\nhits:     {}\nmisses:   {}\nhit rate: {:.2}",
                    cache.backend().name(),
                    s.entries,
                    s.hits,
                    s.misses,
                    s.hit_rate
                )
            });
        }
        Commands::Case(cmd) => {
            let db = config
                .database
                .as_ref()
                .context("database configuration is required for case commands")?;
            let repo = Arc::new(PgCaseRepository::connect(db).await?);
            let cache = Cache::from_settings(&config.cache).await?;
            let service = CaseLifecycleService::new(
                repo,
                cache.invalidator(),
                LifecycleConfig::from(&config.lifecycle),
            );

            match cmd {
                CaseCommands::Stage { caller, case, stage } => {
                    service.update_case_stage(&to_caller(&caller)?, &case, &stage).await?;
                    println!("case {} moved to stage {}", case, stage);
                }
                CaseCommands::Status { caller, case, status } => {
                    let request = UpdateCaseStatusRequest::new(case.clone(), status.clone());
                    service.update_case_status(&to_caller(&caller)?, &request).await?;
                    println!("case {} set to status {}", case, status);
                }
            }
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct DerivedKey {
    key: String,
    key_type: String,
    ttl_secs: u64,
    signature: Option<String>,
    digest: Option<String>,
    sweep_prefix: Option<String>,
}

fn derive_key(args: &KeyArgs) -> Result<DerivedKey> {
    let tenant = tenant_id(&args.tenant)?;
    let pairs = args
        .params
        .iter()
        .map(|p| {
            p.split_once('=')
                .with_context(|| format!("query parameter {:?} is not name=value", p))
        })
        .collect::<Result<Vec<_>>>()?;
    let sig = ListQuery::from_pairs(pairs)?.signature();
    let id = || args.id.as_deref().context("--id is required for this view");
    let user = || args.user.as_deref().context("--user is required for this view");

    let (key, prefix) = match args.kind {
        KeyKind::List => {
            let scope: ListScope = args.scope.parse()?;
            (CacheKey::list(&tenant, scope, &sig), Some(KeyPrefix::list(&tenant, scope)))
        }
        KeyKind::ByUser => (
            CacheKey::list_by_user(&tenant, user()?, &sig),
            Some(KeyPrefix::list_by_user(&tenant, user()?)),
        ),
        KeyKind::Header => (CacheKey::case_header(&tenant, id()?), None),
        KeyKind::Collabs => (CacheKey::case_collabs(&tenant, id()?), None),
        KeyKind::EvidenceList => (
            CacheKey::evidence_list(&tenant, id()?, &sig),
            Some(KeyPrefix::evidence_lists(&tenant, id()?)),
        ),
        KeyKind::EvidenceItem => (CacheKey::evidence_item(&tenant, id()?), None),
        KeyKind::EvidenceTags => (CacheKey::evidence_tags(&tenant, id()?), None),
        KeyKind::Dashboard => (
            CacheKey::dashboard_totals(&tenant, user()?, &sig),
            Some(KeyPrefix::dashboard_user(&tenant, user()?)),
        ),
        KeyKind::EvidenceCount => (CacheKey::evidence_count(&tenant), None),
    };

    let digest_scoped = key.key_type().is_digest_scoped();
    Ok(DerivedKey {
        key: key.to_string(),
        key_type: key.key_type().to_string(),
        ttl_secs: key.ttl().as_secs(),
        signature: digest_scoped.then(|| sig.to_string()),
        digest: digest_scoped.then(|| sig.digest()),
        sweep_prefix: prefix.map(|p| p.to_string()),
    })
}

fn invalidation_event(cmd: InvalidateCommands) -> Result<InvalidationEvent> {
    Ok(match cmd {
        InvalidateCommands::CaseCreated { tenant, users } => InvalidationEvent::CaseCreated {
            tenant: tenant_id(&tenant)?,
            users,
        },
        InvalidateCommands::CaseUpdated { tenant, case, users } => InvalidationEvent::CaseUpdated {
            tenant: tenant_id(&tenant)?,
            case_id: case,
            users,
        },
        InvalidateCommands::Collaborators { tenant, case, users } => {
            InvalidationEvent::CollaboratorsChanged {
                tenant: tenant_id(&tenant)?,
                case_id: case,
                users,
            }
        }
        InvalidateCommands::Evidence { tenant, case, evidence } => InvalidationEvent::EvidenceChanged {
            tenant: tenant_id(&tenant)?,
            case_id: case,
            evidence_id: evidence,
        },
        InvalidateCommands::EvidenceTags { tenant, evidence } => {
            InvalidationEvent::EvidenceTagsChanged {
                tenant: tenant_id(&tenant)?,
                evidence_id: evidence,
            }
        }
        InvalidateCommands::TenantLists { .. } => bail!("tenant list sweeps are not domain events"),
    })
}

fn tenant_id(raw: &str) -> Result<TenantId> {
    TenantId::new(raw).with_context(|| format!("invalid tenant {:?}", raw))
}

fn to_caller(args: &CallerArgs) -> Result<Caller> {
    let caller = Caller::new(tenant_id(&args.tenant)?, args.role.as_str());
    Ok(match &args.user {
        Some(user) => caller.with_user(user.clone()),
        None => caller,
    })
}

fn print_output<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T) -> String) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to render JSON: {}", e),
        },
        OutputFormat::Text => println!("{}", text(value)),
    }
}
