use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::compactor;
use crate::engine::{Engine, ENGINE_VERSION};
use crate::error::{Error, Result};
use crate::limits::*;
use crate::location::Location;
use crate::model::*;

/// A database handle scoped to one organization. Every organization-scoped
/// query through it filters on `organization_id`, dedicated or not.
#[derive(Clone)]
pub struct TenantDb {
    pub engine: Arc<Engine>,
    pub organization_id: Ulid,
    pub dedicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub url: String,
    pub schema_version: u32,
    pub engine_version: &'static str,
    pub persistent: bool,
}

/// Routes organizations to the shared database or their dedicated one.
/// Databases are opened once per URL and kept for the life of the process:
/// two writers on one log would corrupt it.
pub struct TenantResolver {
    shared: Arc<Engine>,
    pool: DashMap<String, Arc<Engine>>,
    compact_threshold: u64,
}

impl TenantResolver {
    pub fn new(shared: Arc<Engine>, compact_threshold: u64) -> Self {
        let pool = DashMap::new();
        pool.insert(shared.location().url(), shared.clone());
        if shared.location().is_persistent() {
            tokio::spawn(compactor::run_compactor(shared.clone(), compact_threshold));
        }
        metrics::gauge!(crate::observability::DATABASES_OPEN).set(pool.len() as f64);
        Self {
            shared,
            pool,
            compact_threshold,
        }
    }

    /// Open the shared database at `url` and build a resolver around it.
    pub fn open(url: &str, compact_threshold: u64) -> Result<Self> {
        let location = locate(url).map_err(|e| Error::Internal(e.to_string()))?;
        let shared = Engine::open(&location).map_err(|e| Error::Internal(e.to_string()))?;
        info!("shared database: {location}");
        Ok(Self::new(Arc::new(shared), compact_threshold))
    }

    /// The platform registry database.
    pub fn shared(&self) -> &Arc<Engine> {
        &self.shared
    }

    pub fn open_databases(&self) -> usize {
        self.pool.len()
    }

    /// Get the pooled database for `url`, opening it on first use. File URLs
    /// are canonicalized first, so aliases of one log share one engine.
    pub fn connect(&self, url: &str) -> Result<Arc<Engine>> {
        let location = locate(url)?;
        let key = location.url();
        if let Some(engine) = self.pool.get(&key) {
            return Ok(engine.value().clone());
        }
        if self.pool.len() >= MAX_POOLED_DATABASES {
            return Err(Error::ExternalService("too many open databases".into()));
        }

        // The entry guard keeps a concurrent caller from opening the same log.
        let engine = match self.pool.entry(key) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => {
                let engine = Engine::open(&location).map_err(|e| {
                    Error::ExternalService(format!("cannot open database {location}: {e}"))
                })?;
                let engine = Arc::new(engine);
                v.insert(engine.clone());
                engine
            }
        };
        if location.is_persistent() {
            tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        }
        metrics::gauge!(crate::observability::DATABASES_OPEN).set(self.pool.len() as f64);
        info!("opened database {location}");
        Ok(engine)
    }

    pub fn is_shared(&self, engine: &Arc<Engine>) -> bool {
        Arc::ptr_eq(engine, &self.shared)
    }

    /// Open (or reuse) the database at `url` and report what it runs.
    pub fn test_connection(&self, url: &str) -> Result<ConnectionInfo> {
        let engine = self.connect(url)?;
        Ok(ConnectionInfo {
            url: engine.location().url(),
            schema_version: engine.schema_version(),
            engine_version: ENGINE_VERSION,
            persistent: engine.location().is_persistent(),
        })
    }

    /// Resolve an organization slug to its database handle.
    pub fn resolve(&self, slug: &str) -> Result<TenantDb> {
        let org = self
            .shared
            .organization_by_slug(slug)
            .ok_or_else(|| Error::NotFound(format!("organization {slug:?} not found")))?;
        self.resolve_organization(&org)
    }

    /// Dedicated organizations with a connection string get their own
    /// database; a string that fails to open is an error, never a fallback to
    /// the shared database. Everything else uses the shared database.
    pub fn resolve_organization(&self, org: &Organization) -> Result<TenantDb> {
        let dedicated_url = match (org.tier, org.database_url.as_deref()) {
            (Tier::Dedicated, Some(url)) if !url.trim().is_empty() => Some(url),
            _ => None,
        };
        let tenant = match dedicated_url {
            Some(url) => {
                let engine = self.connect(url).inspect_err(|e| {
                    warn!("organization {}: dedicated database unavailable: {e}", org.slug);
                })?;
                if self.is_shared(&engine) {
                    return Err(Error::ExternalService(format!(
                        "organization {}: dedicated database url points at the shared database",
                        org.slug
                    )));
                }
                TenantDb {
                    engine,
                    organization_id: org.id,
                    dedicated: true,
                }
            }
            None => TenantDb {
                engine: self.shared.clone(),
                organization_id: org.id,
                dedicated: false,
            },
        };
        let tier = if tenant.dedicated { "dedicated" } else { "shared" };
        metrics::counter!(crate::observability::TENANT_RESOLUTIONS_TOTAL, "tier" => tier).increment(1);
        debug!("resolved {} to {tier} database", org.slug);
        Ok(tenant)
    }
}

fn locate(url: &str) -> Result<Location> {
    let location: Location = url
        .parse()
        .map_err(|e: crate::location::LocationError| Error::ExternalService(e.to_string()))?;
    location
        .canonical()
        .map_err(|e| Error::ExternalService(format!("cannot resolve {location}: {e}")))
}
