//! Hostman server reconciler.
//!
//! Unique responsibility: drive one virtual server through its lifecycle.
//!
//! REST endpoints:
//! - POST <https://hostman.com/api/v1/servers>
//! - GET | PATCH | DELETE <https://hostman.com/api/v1/servers/{id}>
//!
//! The root password is generated asynchronously: `create` polls the server
//! until `root_pass` is non-empty before the final read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use crate::hostman_error::{ReconcileError, Result};
use crate::hostman_json::{RemoteDocument, ResourceId, Sensitive, non_blank, non_zero};
use crate::hostman_poller::{PollConfig, PollOutcome, poll_until};
use crate::hostman_reconciler::{ChangeSet, ReconcileContext, Reconciler, inherit_id, require_id};
use crate::hostman_transport::Method;

/// Host resource-type name.
pub const SERVER_RESOURCE_TYPE: &str = "hostman_server";

const COLLECTION: &str = "/servers";
const ENVELOPE: &str = "server";

/// Desired and observed state of a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Canonical identifier (computed).
    #[serde(default)]
    pub id: ResourceId,
    /// Server name.
    pub name: String,
    /// Bandwidth in Mbit/s.
    pub bandwidth: i64,
    /// Tariff preset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<i64>,
    /// Operating system; ignored when `image_id` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_id: Option<i64>,
    /// Image to install from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// Denial-of-service protection.
    #[serde(default)]
    pub is_ddos_guard: bool,
    /// Root password (computed, sensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_pass: Option<Sensitive<String>>,
    /// Remote status (computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Availability zone reported by the API (computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

impl ServerRecord {
    /// Minimal desired state.
    #[must_use]
    pub fn new(name: impl Into<String>, bandwidth: i64, is_ddos_guard: bool) -> Self {
        Self {
            name: name.into(),
            bandwidth,
            is_ddos_guard,
            ..Self::default()
        }
    }

    /// Reject configurations the API would refuse.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name or a non-positive bandwidth.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.bandwidth <= 0 {
            return Err(invalid(format!("bandwidth must be positive, got {}", self.bandwidth)));
        }
        Ok(())
    }

    /// Image reference, if set.
    fn image(&self) -> Option<&str> {
        non_blank(self.image_id.as_deref())
    }

    /// Body of `POST /servers`.
    ///
    /// `image_id` wins over `os_id` when both are set.
    #[must_use]
    pub fn create_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("bandwidth".into(), json!(self.bandwidth));
        payload.insert("is_ddos_guard".into(), json!(self.is_ddos_guard));

        match (self.image(), non_zero(self.os_id)) {
            (Some(image_id), _) => payload.insert("image_id".into(), json!(image_id)),
            (None, Some(os_id)) => payload.insert("os_id".into(), json!(os_id)),
            (None, None) => None,
        };

        if let Some(preset_id) = non_zero(self.preset_id) {
            payload.insert("preset_id".into(), json!(preset_id));
        }

        payload
    }

    /// Input fields that differ from `prior`.
    ///
    /// An OS change is not counted while an image is set, since the image
    /// takes precedence on the wire.
    #[must_use]
    pub fn changed_fields(&self, prior: &Self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if self.name != prior.name {
            changes.insert("name");
        }
        if self.bandwidth != prior.bandwidth {
            changes.insert("bandwidth");
        }
        if non_zero(self.preset_id) != non_zero(prior.preset_id) {
            changes.insert("preset_id");
        }
        if self.image() != prior.image() {
            changes.insert("image_id");
        }
        if self.image().is_none() && non_zero(self.os_id) != non_zero(prior.os_id) {
            changes.insert("os_id");
        }
        if self.is_ddos_guard != prior.is_ddos_guard {
            changes.insert("is_ddos_guard");
        }
        changes
    }

    /// Body of `PATCH /servers/{id}`: exactly the fields in `changes`.
    ///
    /// A cleared optional field is sent as `null`.
    #[must_use]
    pub fn update_payload(&self, changes: &ChangeSet) -> Map<String, Value> {
        let mut payload = Map::new();
        for field in changes {
            let value = match *field {
                "name" => json!(self.name),
                "bandwidth" => json!(self.bandwidth),
                "preset_id" => json!(non_zero(self.preset_id)),
                "os_id" => json!(non_zero(self.os_id)),
                "image_id" => json!(self.image()),
                "is_ddos_guard" => json!(self.is_ddos_guard),
                _ => continue,
            };
            payload.insert((*field).to_string(), value);
        }
        payload
    }

    /// Copy the fields present in a server document into the record.
    pub fn apply_remote(&mut self, doc: &RemoteDocument) {
        if let Some(name) = doc.string("name") {
            self.name = name;
        }
        if let Some(bandwidth) = doc.integer("bandwidth") {
            self.bandwidth = bandwidth;
        }
        if let Some(preset_id) = doc.integer("preset_id") {
            self.preset_id = Some(preset_id);
        }
        if let Some(os_id) = doc
            .integer("os_id")
            .or_else(|| doc.object("os").and_then(|os| os.integer("id")))
        {
            self.os_id = Some(os_id);
        }
        if let Some(image_id) = doc
            .scalar("image_id")
            .or_else(|| doc.object("image").and_then(|image| image.scalar("id")))
        {
            self.image_id = Some(image_id.canonical());
        }
        if let Some(is_ddos_guard) = doc.boolean("is_ddos_guard") {
            self.is_ddos_guard = is_ddos_guard;
        }
        if let Some(root_pass) = root_pass_of(doc) {
            self.root_pass = Some(Sensitive::new(root_pass));
        }
        if let Some(status) = doc.string("status") {
            self.status = Some(status);
        }
        if let Some(zone) = doc.string("availability_zone") {
            self.availability_zone = Some(zone);
        }
    }
}

fn root_pass_of(doc: &RemoteDocument) -> Option<String> {
    doc.string("root_pass").filter(|p| !p.is_empty())
}

fn invalid(reason: impl Into<String>) -> ReconcileError {
    ReconcileError::Validation {
        resource: SERVER_RESOURCE_TYPE,
        reason: reason.into(),
    }
}

/// Reconciler for `hostman_server`.
#[derive(Debug, Clone)]
pub struct ServerReconciler {
    ready: PollConfig,
}

impl ServerReconciler {
    /// `ready` bounds the wait for the root password.
    #[must_use]
    pub const fn new(ready: PollConfig) -> Self {
        Self { ready }
    }

    async fn fetch(ctx: &ReconcileContext, id: &str) -> Result<RemoteDocument> {
        let body = ctx.call(Method::GET, &format!("{COLLECTION}/{id}"), None).await?;
        RemoteDocument::from_envelope(&body, ENVELOPE)
    }
}

#[async_trait]
impl Reconciler for ServerReconciler {
    type Record = ServerRecord;

    const RESOURCE_TYPE: &'static str = SERVER_RESOURCE_TYPE;

    #[instrument(name = "server.create", skip_all, fields(name = %record.name))]
    async fn create(&self, ctx: &ReconcileContext, record: &mut ServerRecord) -> Result<()> {
        record.validate()?;

        let payload = Value::Object(record.create_payload());
        let body = ctx.call(Method::POST, COLLECTION, Some(&payload)).await?;
        let created = RemoteDocument::from_envelope(&body, ENVELOPE)?;
        record.id = created.id("server create response")?;
        info!(id = %record.id, "server created, waiting for root password");

        let id = record.id.to_string();
        let id_ref = id.as_str();
        let root_pass = poll_until(SERVER_RESOURCE_TYPE, id_ref, "root password", self.ready, move || async move {
            let doc = Self::fetch(ctx, id_ref).await?;
            Ok::<_, ReconcileError>(
                root_pass_of(&doc).map_or_else(|| PollOutcome::Pending(doc.string("status")), PollOutcome::Ready),
            )
        })
        .await?;
        record.root_pass = Some(Sensitive::new(root_pass));

        self.read(ctx, record).await
    }

    #[instrument(name = "server.read", skip_all, fields(id = %record.id))]
    async fn read(&self, ctx: &ReconcileContext, record: &mut ServerRecord) -> Result<()> {
        let id = require_id(SERVER_RESOURCE_TYPE, &record.id)?;
        let doc = Self::fetch(ctx, id).await?;
        record.apply_remote(&doc);
        Ok(())
    }

    #[instrument(name = "server.update", skip_all, fields(id = %prior.id))]
    async fn update(&self, ctx: &ReconcileContext, prior: &ServerRecord, record: &mut ServerRecord) -> Result<()> {
        inherit_id(&mut record.id, &prior.id);
        let id = require_id(SERVER_RESOURCE_TYPE, &record.id)?.to_string();
        record.validate()?;

        let changes = record.changed_fields(prior);
        if changes.is_empty() {
            info!("no server changes to push");
        } else {
            info!(fields = ?changes, "patching server");
            let payload = Value::Object(record.update_payload(&changes));
            ctx.call(Method::PATCH, &format!("{COLLECTION}/{id}"), Some(&payload))
                .await?;
        }

        self.read(ctx, record).await
    }

    #[instrument(name = "server.delete", skip_all, fields(id = %record.id))]
    async fn delete(&self, ctx: &ReconcileContext, record: &mut ServerRecord) -> Result<()> {
        let id = require_id(SERVER_RESOURCE_TYPE, &record.id)?;
        ctx.call(Method::DELETE, &format!("{COLLECTION}/{id}"), None).await?;
        info!("server deleted");
        record.id.clear();
        Ok(())
    }
}
