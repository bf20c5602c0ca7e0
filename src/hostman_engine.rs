//! Reconciliation engine facade.
//!
//! Unique responsibility: route a host request to the reconciler registered
//! for its resource type.
//!
//! Flow:
//! 1) build an [`Engine`] once (token, transport, registry),
//! 2) call [`Engine::create`] / [`Engine::read`] / [`Engine::update`] /
//!    [`Engine::delete`] with the resource-type name and the host's record,
//! 3) persist the record the call leaves behind, success or not.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tracing::{debug, instrument};

use crate::hostman_config::EngineConfig;
use crate::hostman_error::{ReconcileError, Result};
use crate::hostman_floating_ip::FloatingIpReconciler;
use crate::hostman_kubernetes::KubernetesReconciler;
use crate::hostman_reconciler::{DynReconciler, ReconcileContext};
use crate::hostman_server::ServerReconciler;
use crate::hostman_transport::{HttpTransport, Transport};

/// Reconcilers keyed by resource-type name.
#[derive(Clone, Default)]
pub struct ReconcilerRegistry {
    reconcilers: HashMap<&'static str, Arc<dyn DynReconciler>>,
}

impl ReconcilerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three Hostman resource types.
    #[must_use]
    pub fn hostman(cfg: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(ServerReconciler::new(cfg.server_ready));
        registry.register(FloatingIpReconciler::new());
        registry.register(KubernetesReconciler::from_config(cfg));
        registry
    }

    /// Add or replace the reconciler for its resource type.
    pub fn register<R: DynReconciler + 'static>(&mut self, reconciler: R) {
        self.reconcilers
            .insert(reconciler.resource_type(), Arc::new(reconciler));
    }

    /// Look up a reconciler.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResourceType` if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn DynReconciler>> {
        self.reconcilers
            .get(name)
            .cloned()
            .ok_or_else(|| ReconcileError::UnknownResourceType(name.to_string()))
    }

    /// Registered resource-type names, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.reconcilers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ReconcilerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerRegistry")
            .field("resource_types", &self.resource_types())
            .finish_non_exhaustive()
    }
}

/// Entry point used by a host.
#[derive(Debug, Clone)]
pub struct Engine {
    ctx: ReconcileContext,
    registry: ReconcilerRegistry,
}

impl Engine {
    /// Create an engine talking to the Hostman API over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cfg: &EngineConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(cfg)?;
        Ok(Self::with_transport(cfg, Arc::new(transport)))
    }

    /// Create an engine on a caller-supplied transport.
    #[must_use]
    pub fn with_transport(cfg: &EngineConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx: ReconcileContext::new(cfg.token.expose().clone(), transport),
            registry: ReconcilerRegistry::hostman(cfg),
        }
    }

    /// Create an engine from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or invalid.
    pub fn from_env() -> Result<Self> {
        Self::new(&EngineConfig::from_env()?)
    }

    /// Registered reconcilers.
    #[must_use]
    pub const fn registry(&self) -> &ReconcilerRegistry {
        &self.registry
    }

    /// Create the resource described by `record`.
    ///
    /// # Errors
    ///
    /// See [`crate::Reconciler::create`]; `record` reflects what was achieved.
    #[instrument(skip(self, record))]
    pub async fn create(&self, resource_type: &str, record: &mut Value) -> Result<()> {
        debug!("dispatching create");
        self.registry
            .get(resource_type)?
            .create_record(&self.ctx, record)
            .await
    }

    /// Refresh `record` from the API.
    ///
    /// # Errors
    ///
    /// See [`crate::Reconciler::read`].
    #[instrument(skip(self, record))]
    pub async fn read(&self, resource_type: &str, record: &mut Value) -> Result<()> {
        debug!("dispatching read");
        self.registry
            .get(resource_type)?
            .read_record(&self.ctx, record)
            .await
    }

    /// Converge the resource from `prior` to `record`.
    ///
    /// # Errors
    ///
    /// See [`crate::Reconciler::update`].
    #[instrument(skip(self, prior, record))]
    pub async fn update(&self, resource_type: &str, prior: &Value, record: &mut Value) -> Result<()> {
        debug!("dispatching update");
        self.registry
            .get(resource_type)?
            .update_record(&self.ctx, prior, record)
            .await
    }

    /// Destroy the resource.
    ///
    /// # Errors
    ///
    /// See [`crate::Reconciler::delete`].
    #[instrument(skip(self, record))]
    pub async fn delete(&self, resource_type: &str, record: &mut Value) -> Result<()> {
        debug!("dispatching delete");
        self.registry
            .get(resource_type)?
            .delete_record(&self.ctx, record)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostman_registry_knows_all_resource_types() {
        let registry = ReconcilerRegistry::hostman(&EngineConfig::new("tok"));
        assert_eq!(
            registry.resource_types(),
            vec!["hostman_ip", "hostman_k8s_cluster", "hostman_server"]
        );
        assert!(matches!(
            registry.get("hostman_bucket"),
            Err(ReconcileError::UnknownResourceType(name)) if name == "hostman_bucket"
        ));
    }
}
