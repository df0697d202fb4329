//! The application facade. Organization administration lives here; the
//! organization-scoped operations are in `booking` and `collections`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::error::{Error, Result};
use crate::model::*;
use crate::provision::Provisioner;
use crate::tenant::{ConnectionInfo, TenantDb, TenantResolver};
use crate::validate;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganization {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrganization {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Option<JsonMap>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierChange {
    pub tier: Tier,
    #[serde(default)]
    pub database_url: Option<String>,
}

pub struct Platform {
    resolver: TenantResolver,
    provisioner: Arc<dyn Provisioner>,
}

impl Platform {
    pub fn new(resolver: TenantResolver, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            resolver,
            provisioner,
        }
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Resolve `slug` to its database handle.
    pub fn tenant(&self, slug: &str) -> Result<TenantDb> {
        self.resolver.resolve(slug)
    }

    pub fn test_connection(&self, url: &str) -> Result<ConnectionInfo> {
        self.resolver.test_connection(url)
    }

    fn registry_entry(&self, id: Ulid) -> Result<Organization> {
        self.resolver
            .shared()
            .organization(id)
            .ok_or_else(|| Error::not_found(format!("organization {id}")))
    }

    // ── Organizations ────────────────────────────────────────

    /// Newest first.
    pub fn list_organizations(&self) -> Vec<Organization> {
        self.resolver.shared().list_organizations()
    }

    pub fn get_organization(&self, slug: &str) -> Result<Organization> {
        self.resolver
            .shared()
            .organization_by_slug(slug)
            .ok_or_else(|| Error::NotFound(format!("organization {slug:?} not found")))
    }

    pub async fn create_organization(&self, input: CreateOrganization) -> Result<Organization> {
        let name = validate::org_name(&input.name)?;
        let slug = validate::slug(&input.slug)?;
        let now = Utc::now();
        let org = self
            .resolver
            .shared()
            .insert_organization(Organization {
                id: Ulid::new(),
                name,
                slug,
                tier: Tier::Shared,
                database_url: None,
                settings: JsonMap::new(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!("created organization {} ({})", org.slug, org.id);
        Ok(org)
    }

    /// Rename and/or replace the settings map.
    pub async fn update_organization(&self, id: Ulid, input: UpdateOrganization) -> Result<Organization> {
        let name = input.name.as_deref().map(validate::org_name).transpose()?;
        let org = self
            .resolver
            .shared()
            .update_organization(id, move |org| {
                if let Some(name) = name {
                    org.name = name;
                }
                if let Some(settings) = input.settings {
                    org.settings = settings;
                }
                Ok(())
            })
            .await?;
        Ok(org)
    }

    /// Switch tiers. A dedicated URL is connection-tested before it is stored.
    /// Existing rows are not migrated between databases.
    pub async fn update_tier(&self, id: Ulid, change: TierChange) -> Result<Organization> {
        let database_url = match change.tier {
            Tier::Dedicated => {
                let url = change
                    .database_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| Error::invalid("a database URL is required for the dedicated tier"))?;
                let engine = self.resolver.connect(url)?;
                if self.resolver.is_shared(&engine) {
                    return Err(Error::invalid(format!(
                        "{} is the shared database, not a dedicated one",
                        engine.location()
                    )));
                }
                Some(engine.location().url())
            }
            Tier::Shared => None,
        };
        let tier = change.tier;
        let shared = self.resolver.shared();
        let org = shared
            .update_organization(id, |org| {
                if let Some(url) = &database_url {
                    ensure_unclaimed(shared, org.id, url)?;
                }
                org.tier = tier;
                org.database_url = database_url;
                Ok(())
            })
            .await?;
        info!("organization {} moved to {} tier", org.slug, tier.as_str());
        Ok(org)
    }

    /// Delete the organization and everything it owns. Data in a dedicated
    /// database is purged on a best-effort basis.
    pub async fn delete_organization(&self, id: Ulid) -> Result<()> {
        let org = self.registry_entry(id)?;
        if let (Tier::Dedicated, Some(url)) = (org.tier, org.database_url.as_deref()) {
            match self.resolver.connect(url) {
                Ok(engine) => {
                    if let Err(e) = engine.purge_organization(id).await {
                        warn!("organization {}: purging dedicated database failed: {e}", org.slug);
                    }
                }
                Err(e) => warn!("organization {}: dedicated database unreachable: {e}", org.slug),
            }
        }
        self.resolver.shared().delete_organization(id).await?;
        info!("deleted organization {} ({id})", org.slug);
        Ok(())
    }

    /// Create a dedicated database for the organization and move it there.
    /// A failed schema setup deletes the new database again.
    pub async fn provision_dedicated(&self, id: Ulid) -> Result<Organization> {
        let org = self.registry_entry(id)?;
        if org.tier == Tier::Dedicated && org.database_url.is_some() {
            return Err(Error::Conflict(format!(
                "organization {} already has a dedicated database",
                org.slug
            )));
        }

        let url = self.provisioner.create_database(&org).await?;
        let info = match self.resolver.test_connection(&url) {
            Ok(info) => info,
            Err(e) => {
                warn!("organization {}: schema setup on {url} failed: {e}", org.slug);
                if let Err(undo) = self.provisioner.delete_database(&url).await {
                    error!("organization {}: could not remove {url}: {undo}", org.slug);
                }
                return Err(Error::ExternalService(format!(
                    "provisioning failed during schema setup: {e}"
                )));
            }
        };

        let org = self
            .resolver
            .shared()
            .update_organization(id, |org| {
                if org.tier == Tier::Dedicated && org.database_url.is_some() {
                    return Err(EngineError::Conflict(
                        "organization was moved to a dedicated database concurrently".into(),
                    ));
                }
                ensure_unclaimed(self.resolver.shared(), org.id, &info.url)?;
                org.tier = Tier::Dedicated;
                org.database_url = Some(info.url.clone());
                Ok(())
            })
            .await?;
        info!(
            "organization {} provisioned on schema v{}",
            org.slug, info.schema_version
        );
        Ok(org)
    }
}

/// A dedicated database belongs to exactly one organization. Stored URLs are
/// canonical, so comparing strings is enough.
fn ensure_unclaimed(shared: &Engine, id: Ulid, url: &str) -> std::result::Result<(), EngineError> {
    let owner = shared
        .list_organizations()
        .into_iter()
        .find(|o| o.id != id && o.tier == Tier::Dedicated && o.database_url.as_deref() == Some(url));
    match owner {
        Some(other) => Err(EngineError::Conflict(format!(
            "database {url} already belongs to organization {}",
            other.slug
        ))),
        None => Ok(()),
    }
}
