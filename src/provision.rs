use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::location::Location;
use crate::model::Organization;

/// Creates and destroys dedicated databases. `create_database` returns the
/// connection URL of an empty database; the caller applies the schema.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_database(&self, org: &Organization) -> Result<String>;

    /// Compensation for a failed provisioning run.
    async fn delete_database(&self, url: &str) -> Result<()>;
}

/// Provisions WAL-backed databases under `{data_dir}/tenants/`.
pub struct LocalProvisioner {
    root: PathBuf,
}

impl LocalProvisioner {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into().join("tenants"),
        }
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn create_database(&self, org: &Organization) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::ExternalService(format!("cannot create {}: {e}", self.root.display())))?;
        let path = self.root.join(format!("{}-{}.wal", org.slug, org.id));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::ExternalService(format!(
                "database file {} already exists",
                path.display()
            )));
        }
        let location = Location::File(path);
        info!("provisioned database {location} for {}", org.slug);
        Ok(location.url())
    }

    async fn delete_database(&self, url: &str) -> Result<()> {
        let location: Location = url
            .parse()
            .map_err(|e: crate::location::LocationError| Error::ExternalService(e.to_string()))?;
        if let Location::File(path) = location {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("removed database {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::ExternalService(format!(
                        "cannot remove {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
