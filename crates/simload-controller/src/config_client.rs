//! Access to ScaleLoadConfig objects
//!
//! The reconciler reads and patches its own custom resource through
//! [`LoadConfigClient`] so tests can substitute a mock.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use simload_common::crd::{ScaleLoadConfig, ScaleLoadConfigStatus};
use simload_common::labels::CLEANUP_FINALIZER;
use simload_common::{Error, FIELD_MANAGER};

/// Operations on ScaleLoadConfig resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoadConfigClient: Send + Sync {
    /// Fetch a config, `None` if it no longer exists
    async fn get(&self, name: &str) -> Result<Option<ScaleLoadConfig>, Error>;

    /// Add the cleanup finalizer
    async fn add_finalizer(&self, name: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer
    async fn remove_finalizer(&self, name: &str) -> Result<(), Error>;

    /// Replace the status subresource
    async fn patch_status(&self, name: &str, status: &ScaleLoadConfigStatus) -> Result<(), Error>;
}

/// API server implementation
pub struct LoadConfigClientImpl {
    client: Client,
}

impl LoadConfigClientImpl {
    /// Create a new client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<ScaleLoadConfig> {
        Api::all(self.client.clone())
    }

    async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        self.api()
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl LoadConfigClient for LoadConfigClientImpl {
    async fn get(&self, name: &str) -> Result<Option<ScaleLoadConfig>, Error> {
        match self.api().get(name).await {
            Ok(config) => Ok(Some(config)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_finalizer(&self, name: &str) -> Result<(), Error> {
        let config = self.api().get(name).await?;
        let mut finalizers = config.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == CLEANUP_FINALIZER) {
            return Ok(());
        }
        finalizers.push(CLEANUP_FINALIZER.to_string());

        self.patch_finalizers(name, finalizers).await
    }

    async fn remove_finalizer(&self, name: &str) -> Result<(), Error> {
        let config = match self.api().get(name).await {
            Ok(config) => config,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let finalizers: Vec<String> = config
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().filter(|s| *s != CLEANUP_FINALIZER).cloned().collect())
            .unwrap_or_default();

        self.patch_finalizers(name, finalizers).await
    }

    async fn patch_status(&self, name: &str, status: &ScaleLoadConfigStatus) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        self.api()
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;

        Ok(())
    }
}
