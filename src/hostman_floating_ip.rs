//! Hostman floating IP reconciler.
//!
//! Unique responsibility: allocate a floating IP and keep it bound to the
//! desired resource.
//!
//! REST endpoints:
//! - POST <https://hostman.com/api/v1/floating-ips>
//! - GET | DELETE <https://hostman.com/api/v1/floating-ips/{id}>
//! - POST <https://hostman.com/api/v1/floating-ips/{id}/bind>
//!
//! Binding is a separate call layered on top of allocation. A bind rejected
//! with `floating_ip_already_bound` is treated as success: the desired end
//! state already holds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::hostman_config::DEFAULT_AVAILABILITY_ZONE;
use crate::hostman_error::{ReconcileError, Result};
use crate::hostman_json::{JsonScalar, RemoteDocument, ResourceId, non_blank};
use crate::hostman_reconciler::{ReconcileContext, Reconciler, inherit_id, require_id};
use crate::hostman_transport::Method;

/// Host resource-type name.
pub const FLOATING_IP_RESOURCE_TYPE: &str = "hostman_ip";

const COLLECTION: &str = "/floating-ips";
const ENVELOPE: &str = "ip";

fn default_zone() -> String {
    DEFAULT_AVAILABILITY_ZONE.to_string()
}

/// Desired and observed state of a floating IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIpRecord {
    /// Canonical identifier (computed).
    #[serde(default)]
    pub id: ResourceId,
    /// Denial-of-service protection.
    #[serde(default)]
    pub is_ddos_guard: bool,
    /// Availability zone.
    #[serde(default = "default_zone")]
    pub availability_zone: String,
    /// Free-text comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Allocated address (computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Kind of the bound resource (for example `server`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Id of the bound resource, in any scalar encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<JsonScalar>,
}

impl Default for FloatingIpRecord {
    fn default() -> Self {
        Self {
            id: ResourceId::default(),
            is_ddos_guard: false,
            availability_zone: default_zone(),
            comment: None,
            ip: None,
            resource_type: None,
            resource_id: None,
        }
    }
}

/// A normalized binding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Kind of the bound resource.
    pub resource_type: String,
    /// Canonical id of the bound resource.
    pub resource_id: String,
}

impl Binding {
    fn payload(&self) -> Value {
        json!({
            "resource_type": self.resource_type,
            "resource_id": self.resource_id,
        })
    }
}

impl FloatingIpRecord {
    /// Desired binding, when both halves are set.
    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        let resource_type = non_blank(self.resource_type.as_deref())?;
        let resource_id = self.resource_id.as_ref().filter(|id| !id.is_blank())?;
        Some(Binding {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.canonical(),
        })
    }

    /// Set the binding target.
    #[must_use]
    pub fn bound_to(mut self, resource_type: impl Into<String>, resource_id: impl Into<JsonScalar>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Body of `POST /floating-ips`; the binding is not part of it.
    #[must_use]
    pub fn create_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("is_ddos_guard".into(), json!(self.is_ddos_guard));
        payload.insert("availability_zone".into(), json!(self.availability_zone));
        if let Some(comment) = non_blank(self.comment.as_deref()) {
            payload.insert("comment".into(), json!(comment));
        }
        payload
    }

    /// Fail if a field without an update endpoint changed.
    ///
    /// # Errors
    ///
    /// Returns `ImmutableField` naming the first such field.
    pub fn check_immutable(&self, prior: &Self) -> Result<()> {
        let immutable = |field| ReconcileError::ImmutableField {
            resource: FLOATING_IP_RESOURCE_TYPE,
            field,
        };
        if self.is_ddos_guard != prior.is_ddos_guard {
            return Err(immutable("is_ddos_guard"));
        }
        if self.availability_zone != prior.availability_zone {
            return Err(immutable("availability_zone"));
        }
        if non_blank(self.comment.as_deref()) != non_blank(prior.comment.as_deref()) {
            return Err(immutable("comment"));
        }
        Ok(())
    }

    /// Copy the fields present in an IP document into the record.
    ///
    /// The binding is taken from the remote side as is: an unbound IP clears
    /// both halves.
    pub fn apply_remote(&mut self, doc: &RemoteDocument) {
        if let Some(ip) = doc.string("ip") {
            self.ip = Some(ip);
        }
        if let Some(is_ddos_guard) = doc.boolean("is_ddos_guard") {
            self.is_ddos_guard = is_ddos_guard;
        }
        if let Some(zone) = doc.string("availability_zone") {
            self.availability_zone = zone;
        }
        if let Some(comment) = doc.string("comment") {
            self.comment = Some(comment);
        }
        self.resource_type = doc.string("resource_type");
        self.resource_id = doc
            .scalar("resource_id")
            .map(|id| JsonScalar::String(id.canonical()));
    }
}

fn remote_binding(doc: &RemoteDocument) -> Option<Binding> {
    let mut observed = FloatingIpRecord::default();
    observed.apply_remote(doc);
    observed.binding()
}

/// Reconciler for `hostman_ip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatingIpReconciler;

impl FloatingIpReconciler {
    /// Create the reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn fetch(ctx: &ReconcileContext, id: &str) -> Result<RemoteDocument> {
        let body = ctx.call(Method::GET, &format!("{COLLECTION}/{id}"), None).await?;
        RemoteDocument::from_envelope(&body, ENVELOPE)
    }

    /// Bind `id` to `binding`, accepting "already bound".
    async fn bind(ctx: &ReconcileContext, id: &str, binding: &Binding) -> Result<()> {
        let payload = binding.payload();
        match ctx
            .call(Method::POST, &format!("{COLLECTION}/{id}/bind"), Some(&payload))
            .await
        {
            Ok(_) => {
                info!(id, resource_type = %binding.resource_type, resource_id = %binding.resource_id, "floating ip bound");
                Ok(())
            }
            Err(e) if e.is_already_bound() => {
                warn!(id, error = %e, "floating ip already bound, keeping existing binding");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reconciler for FloatingIpReconciler {
    type Record = FloatingIpRecord;

    const RESOURCE_TYPE: &'static str = FLOATING_IP_RESOURCE_TYPE;

    #[instrument(name = "floating_ip.create", skip_all, fields(zone = %record.availability_zone))]
    async fn create(&self, ctx: &ReconcileContext, record: &mut FloatingIpRecord) -> Result<()> {
        let payload = Value::Object(record.create_payload());
        let body = ctx.call(Method::POST, COLLECTION, Some(&payload)).await?;
        let created = RemoteDocument::from_envelope(&body, ENVELOPE)?;
        record.id = created.id("floating ip create response")?;
        if let Some(ip) = created.string("ip") {
            record.ip = Some(ip);
        }
        info!(id = %record.id, ip = record.ip.as_deref(), "floating ip allocated");

        if let Some(binding) = record.binding() {
            let id = record.id.to_string();
            Self::bind(ctx, &id, &binding).await?;
        }

        self.read(ctx, record).await
    }

    #[instrument(name = "floating_ip.read", skip_all, fields(id = %record.id))]
    async fn read(&self, ctx: &ReconcileContext, record: &mut FloatingIpRecord) -> Result<()> {
        let id = require_id(FLOATING_IP_RESOURCE_TYPE, &record.id)?;
        let doc = Self::fetch(ctx, id).await?;
        record.apply_remote(&doc);
        Ok(())
    }

    #[instrument(name = "floating_ip.update", skip_all, fields(id = %prior.id))]
    async fn update(
        &self,
        ctx: &ReconcileContext,
        prior: &FloatingIpRecord,
        record: &mut FloatingIpRecord,
    ) -> Result<()> {
        inherit_id(&mut record.id, &prior.id);
        let id = require_id(FLOATING_IP_RESOURCE_TYPE, &record.id)?.to_string();
        record.check_immutable(prior)?;

        let desired = record.binding();
        if desired != prior.binding() {
            if let Some(desired) = desired {
                // The prior observation may be stale: decide on a fresh read.
                let current = remote_binding(&Self::fetch(ctx, &id).await?);
                if current.as_ref() == Some(&desired) {
                    info!("floating ip already bound to the desired resource");
                } else {
                    Self::bind(ctx, &id, &desired).await?;
                }
            } else {
                // No unbind endpoint exists: the remote binding stays.
                warn!("binding removed from configuration, remote binding left in place");
            }
        }

        self.read(ctx, record).await
    }

    #[instrument(name = "floating_ip.delete", skip_all, fields(id = %record.id))]
    async fn delete(&self, ctx: &ReconcileContext, record: &mut FloatingIpRecord) -> Result<()> {
        let id = require_id(FLOATING_IP_RESOURCE_TYPE, &record.id)?;
        ctx.call(Method::DELETE, &format!("{COLLECTION}/{id}"), None).await?;
        info!("floating ip released");
        record.id.clear();
        Ok(())
    }
}
