//! Hostman managed Kubernetes reconciler.
//!
//! Unique responsibility: create a cluster with its worker groups, wait for it
//! to become usable, keep its mutable settings in sync and tear it down.
//!
//! REST endpoints:
//! - POST <https://hostman.com/api/v1/k8s/clusters>
//! - GET | PUT | DELETE <https://hostman.com/api/v1/k8s/clusters/{id}>
//! - GET <https://hostman.com/api/v1/k8s/clusters/{id}/kubeconfig>
//!
//! Cluster creation takes tens of minutes: `create` polls the cluster status
//! until it enters the configured ready set. Deletion is asynchronous as well
//! and is confirmed by polling until the cluster can no longer be read.
//!
//! The kubeconfig lives behind its own endpoint. A failure to fetch it is
//! logged and leaves the previous value in place; the rest of the read still
//! succeeds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::hostman_config::{DEFAULT_AVAILABILITY_ZONE, EngineConfig};
use crate::hostman_error::{ReconcileError, Result};
use crate::hostman_json::{RemoteDocument, ResourceId, Sensitive, non_blank, non_zero};
use crate::hostman_poller::{GoneCriterion, PollConfig, ReadinessStates, wait_until_gone, wait_until_ready};
use crate::hostman_reconciler::{ChangeSet, ReconcileContext, Reconciler, inherit_id, require_id};
use crate::hostman_transport::Method;

/// Host resource-type name.
pub const K8S_RESOURCE_TYPE: &str = "hostman_k8s_cluster";

const COLLECTION: &str = "/k8s/clusters";
const ENVELOPE: &str = "cluster";

/// Bounds of `node_count` for a worker group.
pub const NODE_COUNT_RANGE: std::ops::RangeInclusive<i64> = 1..=100;

/// Smallest autoscaling bound accepted by the API.
pub const MIN_AUTOSCALING_NODES: i64 = 2;

fn default_zone() -> String {
    DEFAULT_AVAILABILITY_ZONE.to_string()
}

/// Explicit node sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    /// Configurator the sizing is validated against.
    pub configurator_id: i64,
    /// vCPU count.
    pub cpu: i64,
    /// RAM in MB.
    pub ram: i64,
    /// Disk in MB.
    pub disk: i64,
}

impl NodeConfiguration {
    fn payload(&self) -> Value {
        json!({
            "configurator_id": self.configurator_id,
            "cpu": self.cpu,
            "ram": self.ram,
            "disk": self.disk,
        })
    }

    fn from_remote(doc: &RemoteDocument) -> Self {
        Self {
            configurator_id: doc.integer("configurator_id").unwrap_or_default(),
            cpu: doc.integer("cpu").unwrap_or_default(),
            ram: doc.integer("ram").unwrap_or_default(),
            disk: doc.integer("disk").unwrap_or_default(),
        }
    }
}

/// How a node pool is sized: a tariff preset or an explicit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSizing<'a> {
    /// Tariff preset id.
    Preset(i64),
    /// Explicit resources.
    Configuration(&'a NodeConfiguration),
}

impl<'a> NodeSizing<'a> {
    /// Resolve the sizing choice; `Ok(None)` when neither is set.
    ///
    /// # Errors
    ///
    /// Returns a message when both a preset and a configuration are set.
    fn resolve(
        preset_id: Option<i64>,
        configuration: Option<&'a NodeConfiguration>,
    ) -> std::result::Result<Option<Self>, &'static str> {
        match (non_zero(preset_id), configuration) {
            (Some(_), Some(_)) => Err("preset_id and configuration are mutually exclusive"),
            (Some(preset), None) => Ok(Some(Self::Preset(preset))),
            (None, Some(cfg)) => Ok(Some(Self::Configuration(cfg))),
            (None, None) => Ok(None),
        }
    }

    fn write_into(self, payload: &mut Map<String, Value>) {
        match self {
            Self::Preset(preset) => payload.insert("preset_id".into(), json!(preset)),
            Self::Configuration(cfg) => payload.insert("configuration".into(), cfg.payload()),
        };
    }
}

/// A pool of worker nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerGroup {
    /// Group name.
    pub name: String,
    /// Tariff preset; exclusive with `configuration`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<i64>,
    /// Explicit sizing; exclusive with `preset_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<NodeConfiguration>,
    /// Initial node count.
    pub node_count: i64,
    /// Node labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Let the API scale the group between `min_size` and `max_size`.
    #[serde(default)]
    pub is_autoscaling: bool,
    /// Lower autoscaling bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i64>,
    /// Upper autoscaling bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
}

impl WorkerGroup {
    fn sizing(&self) -> std::result::Result<NodeSizing<'_>, String> {
        match NodeSizing::resolve(self.preset_id, self.configuration.as_ref()) {
            Ok(Some(sizing)) => Ok(sizing),
            Ok(None) => Err(format!("worker group `{}` needs preset_id or configuration", self.name)),
            Err(reason) => Err(format!("worker group `{}`: {reason}", self.name)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("worker group name must not be empty"));
        }
        self.sizing().map_err(invalid)?;
        if !NODE_COUNT_RANGE.contains(&self.node_count) {
            return Err(invalid(format!(
                "worker group `{}`: node_count {} outside {}..={}",
                self.name,
                self.node_count,
                NODE_COUNT_RANGE.start(),
                NODE_COUNT_RANGE.end()
            )));
        }
        if self.is_autoscaling {
            let (Some(min), Some(max)) = (self.min_size, self.max_size) else {
                return Err(invalid(format!(
                    "worker group `{}`: autoscaling needs min_size and max_size",
                    self.name
                )));
            };
            if min < MIN_AUTOSCALING_NODES || max < MIN_AUTOSCALING_NODES {
                return Err(invalid(format!(
                    "worker group `{}`: autoscaling bounds must be at least {MIN_AUTOSCALING_NODES}",
                    self.name
                )));
            }
            if min > max {
                return Err(invalid(format!(
                    "worker group `{}`: min_size {min} exceeds max_size {max}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn payload(&self) -> Value {
        let mut group = Map::new();
        group.insert("name".into(), json!(self.name));
        if let Ok(sizing) = self.sizing() {
            sizing.write_into(&mut group);
        }
        group.insert("node_count".into(), json!(self.node_count));
        if !self.labels.is_empty() {
            let labels: Vec<Value> = self
                .labels
                .iter()
                .map(|(key, value)| json!({"key": key, "value": value}))
                .collect();
            group.insert("labels".into(), Value::Array(labels));
        }
        if self.is_autoscaling {
            group.insert("is_autoscaling".into(), json!(true));
            group.insert("min_size".into(), json!(self.min_size));
            group.insert("max_size".into(), json!(self.max_size));
        }
        Value::Object(group)
    }

    fn from_remote(doc: &RemoteDocument) -> Self {
        Self {
            name: doc.string("name").unwrap_or_default(),
            preset_id: non_zero(doc.integer("preset_id")),
            configuration: doc.object("configuration").map(|c| NodeConfiguration::from_remote(&c)),
            node_count: doc.integer("node_count").unwrap_or_default(),
            labels: labels_from_remote(doc.get("labels")),
            is_autoscaling: doc.boolean("is_autoscaling").unwrap_or_default(),
            min_size: doc.integer("min_size"),
            max_size: doc.integer("max_size"),
        }
    }
}

/// Labels arrive either as `[{"key": .., "value": ..}]` or as a plain object.
fn labels_from_remote(raw: Option<&Value>) -> BTreeMap<String, String> {
    let text = |v: &Value| v.as_str().map_or_else(|| v.to_string(), str::to_string);
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| Some((item.get("key")?.as_str()?.to_string(), text(item.get("value")?))))
            .collect(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), text(v))).collect(),
        _ => BTreeMap::new(),
    }
}

/// Desired and observed state of a managed Kubernetes cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    /// Canonical identifier (computed).
    #[serde(default)]
    pub id: ResourceId,
    /// Cluster name.
    pub name: String,
    /// Kubernetes version, for example `v1.30.1`.
    pub k8s_version: String,
    /// CNI plugin, for example `flannel` or `calico`.
    pub network_driver: String,
    /// Availability zone.
    #[serde(default = "default_zone")]
    pub availability_zone: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Master node preset; exclusive with `configuration`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<i64>,
    /// Master node explicit sizing; exclusive with `preset_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<NodeConfiguration>,
    /// Worker node pools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_groups: Vec<WorkerGroup>,
    /// Install an ingress controller.
    #[serde(default)]
    pub is_ingress: bool,
    /// Install the Kubernetes dashboard.
    #[serde(default)]
    pub is_k8s_dashboard: bool,
    /// Cluster id as reported by the API (computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    /// API server endpoint (computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Admin kubeconfig (computed, sensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<Sensitive<String>>,
    /// Lifecycle status (computed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ClusterRecord {
    /// Minimal desired state.
    #[must_use]
    pub fn new(name: impl Into<String>, k8s_version: impl Into<String>, network_driver: impl Into<String>) -> Self {
        Self {
            id: ResourceId::default(),
            name: name.into(),
            k8s_version: k8s_version.into(),
            network_driver: network_driver.into(),
            availability_zone: default_zone(),
            description: None,
            preset_id: None,
            configuration: None,
            worker_groups: Vec::new(),
            is_ingress: false,
            is_k8s_dashboard: false,
            cluster_id: None,
            endpoint: None,
            kubeconfig: None,
            status: None,
        }
    }

    /// Reject configurations the API would refuse.
    ///
    /// # Errors
    ///
    /// Returns `Validation` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("k8s_version", &self.k8s_version),
            ("network_driver", &self.network_driver),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{field} must not be empty")));
            }
        }
        self.master_sizing()
            .map_err(|reason| invalid(format!("master: {reason}")))?;
        self.worker_groups.iter().try_for_each(WorkerGroup::validate)
    }

    fn master_sizing(&self) -> std::result::Result<Option<NodeSizing<'_>>, &'static str> {
        NodeSizing::resolve(self.preset_id, self.configuration.as_ref())
    }

    /// Body of `POST /k8s/clusters`.
    #[must_use]
    pub fn create_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("k8s_version".into(), json!(self.k8s_version));
        payload.insert("network_driver".into(), json!(self.network_driver));

        if let Some(zone) = non_blank(Some(&self.availability_zone)) {
            payload.insert("availability_zone".into(), json!(zone));
        }
        if let Some(description) = non_blank(self.description.as_deref()) {
            payload.insert("description".into(), json!(description));
        }
        if let Ok(Some(sizing)) = self.master_sizing() {
            sizing.write_into(&mut payload);
        }
        if !self.worker_groups.is_empty() {
            let groups = self.worker_groups.iter().map(WorkerGroup::payload).collect();
            payload.insert("worker_groups".into(), Value::Array(groups));
        }
        if self.is_ingress {
            payload.insert("is_ingress".into(), json!(true));
        }
        if self.is_k8s_dashboard {
            payload.insert("is_k8s_dashboard".into(), json!(true));
        }
        payload
    }

    /// Mutable fields that differ from `prior`.
    #[must_use]
    pub fn changed_fields(&self, prior: &Self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if self.name != prior.name {
            changes.insert("name");
        }
        if self.k8s_version != prior.k8s_version {
            changes.insert("k8s_version");
        }
        if self.network_driver != prior.network_driver {
            changes.insert("network_driver");
        }
        if non_blank(self.description.as_deref()) != non_blank(prior.description.as_deref()) {
            changes.insert("description");
        }
        if self.is_ingress != prior.is_ingress {
            changes.insert("is_ingress");
        }
        if self.is_k8s_dashboard != prior.is_k8s_dashboard {
            changes.insert("is_k8s_dashboard");
        }
        changes
    }

    /// Body of `PUT /k8s/clusters/{id}`: exactly the fields in `changes`.
    #[must_use]
    pub fn update_payload(&self, changes: &ChangeSet) -> Map<String, Value> {
        let mut payload = Map::new();
        for field in changes {
            let value = match *field {
                "name" => json!(self.name),
                "k8s_version" => json!(self.k8s_version),
                "network_driver" => json!(self.network_driver),
                "description" => json!(non_blank(self.description.as_deref())),
                "is_ingress" => json!(self.is_ingress),
                "is_k8s_dashboard" => json!(self.is_k8s_dashboard),
                _ => continue,
            };
            payload.insert((*field).to_string(), value);
        }
        payload
    }

    /// Fail if a field the API cannot change in place differs from `prior`.
    ///
    /// # Errors
    ///
    /// Returns `ImmutableField` naming the first such field.
    pub fn check_immutable(&self, prior: &Self) -> Result<()> {
        let immutable = |field| ReconcileError::ImmutableField {
            resource: K8S_RESOURCE_TYPE,
            field,
        };
        if self.availability_zone != prior.availability_zone {
            return Err(immutable("availability_zone"));
        }
        if non_zero(self.preset_id) != non_zero(prior.preset_id) {
            return Err(immutable("preset_id"));
        }
        if self.configuration != prior.configuration {
            return Err(immutable("configuration"));
        }
        if self.worker_groups != prior.worker_groups {
            return Err(immutable("worker_groups"));
        }
        Ok(())
    }

    /// Copy the fields present in a cluster document into the record.
    pub fn apply_remote(&mut self, doc: &RemoteDocument) {
        if let Some(name) = doc.string("name") {
            self.name = name;
        }
        if let Some(id) = doc.scalar("id") {
            self.cluster_id = Some(id.canonical());
        }
        if let Some(status) = doc.string("status") {
            self.status = Some(status);
        }
        if let Some(version) = doc.string("k8s_version") {
            self.k8s_version = version;
        }
        if let Some(driver) = doc.string("network_driver") {
            self.network_driver = driver;
        }
        if let Some(zone) = doc.string("availability_zone") {
            self.availability_zone = zone;
        }
        if let Some(description) = doc.string("description") {
            self.description = Some(description);
        }
        if let Some(preset_id) = non_zero(doc.integer("preset_id")) {
            self.preset_id = Some(preset_id);
        }
        if let Some(cfg) = doc.object("configuration") {
            self.configuration = Some(NodeConfiguration::from_remote(&cfg));
        }
        if doc.get("worker_groups").is_some() {
            self.worker_groups = doc
                .objects("worker_groups")
                .iter()
                .map(WorkerGroup::from_remote)
                .collect();
        }
        if let Some(is_ingress) = doc.boolean("is_ingress") {
            self.is_ingress = is_ingress;
        }
        if let Some(is_k8s_dashboard) = doc.boolean("is_k8s_dashboard") {
            self.is_k8s_dashboard = is_k8s_dashboard;
        }
        if let Some(endpoint) = doc.string("endpoint") {
            self.endpoint = Some(endpoint);
        }
        if let Some(kubeconfig) = doc.string("kubeconfig").filter(|k| !k.is_empty()) {
            self.kubeconfig = Some(Sensitive::new(kubeconfig));
        }
    }
}

/// The kubeconfig endpoint answers either `{"kubeconfig": "..."}` or raw YAML.
fn kubeconfig_from_body(body: &[u8]) -> Option<String> {
    let text = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map.get("kubeconfig")?.as_str()?.to_string(),
        Ok(Value::String(text)) => text,
        _ => String::from_utf8_lossy(body).into_owned(),
    };
    (!text.trim().is_empty()).then_some(text)
}

fn invalid(reason: impl Into<String>) -> ReconcileError {
    ReconcileError::Validation {
        resource: K8S_RESOURCE_TYPE,
        reason: reason.into(),
    }
}

/// Reconciler for `hostman_k8s_cluster`.
#[derive(Debug, Clone)]
pub struct KubernetesReconciler {
    ready: PollConfig,
    delete: PollConfig,
    states: ReadinessStates,
    gone: GoneCriterion,
}

impl KubernetesReconciler {
    /// `ready` bounds creation, `delete` bounds deletion.
    #[must_use]
    pub const fn new(ready: PollConfig, delete: PollConfig, states: ReadinessStates, gone: GoneCriterion) -> Self {
        Self {
            ready,
            delete,
            states,
            gone,
        }
    }

    /// Build from the engine configuration.
    #[must_use]
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.k8s_ready, cfg.k8s_delete, cfg.k8s_states.clone(), cfg.gone_criterion)
    }

    async fn fetch(ctx: &ReconcileContext, id: &str) -> Result<RemoteDocument> {
        let body = ctx.call(Method::GET, &format!("{COLLECTION}/{id}"), None).await?;
        RemoteDocument::from_envelope(&body, ENVELOPE)
    }

    async fn fetch_kubeconfig(ctx: &ReconcileContext, id: &str) -> Result<Option<String>> {
        let body = ctx
            .call(Method::GET, &format!("{COLLECTION}/{id}/kubeconfig"), None)
            .await?;
        Ok(kubeconfig_from_body(&body))
    }
}

#[async_trait]
impl Reconciler for KubernetesReconciler {
    type Record = ClusterRecord;

    const RESOURCE_TYPE: &'static str = K8S_RESOURCE_TYPE;

    #[instrument(name = "k8s.create", skip_all, fields(name = %record.name))]
    async fn create(&self, ctx: &ReconcileContext, record: &mut ClusterRecord) -> Result<()> {
        record.validate()?;

        let payload = Value::Object(record.create_payload());
        let body = ctx.call(Method::POST, COLLECTION, Some(&payload)).await?;
        let created = RemoteDocument::from_envelope(&body, ENVELOPE)?;
        record.id = created.id("cluster create response")?;
        record.cluster_id = Some(record.id.to_string());
        info!(id = %record.id, "cluster creation accepted, waiting for readiness");

        let id = record.id.to_string();
        let id_ref = id.as_str();
        let ready = wait_until_ready(
            K8S_RESOURCE_TYPE,
            id_ref,
            &self.states,
            self.ready,
            move || Self::fetch(ctx, id_ref),
            |doc: &RemoteDocument| doc.string("status"),
        )
        .await?;
        record.apply_remote(&ready);
        info!(status = record.status.as_deref(), "cluster ready");

        self.read(ctx, record).await
    }

    #[instrument(name = "k8s.read", skip_all, fields(id = %record.id))]
    async fn read(&self, ctx: &ReconcileContext, record: &mut ClusterRecord) -> Result<()> {
        let id = require_id(K8S_RESOURCE_TYPE, &record.id)?.to_string();
        let doc = Self::fetch(ctx, &id).await?;
        record.apply_remote(&doc);
        if record.cluster_id.is_none() {
            record.cluster_id = Some(id.clone());
        }

        match Self::fetch_kubeconfig(ctx, &id).await {
            Ok(Some(kubeconfig)) => record.kubeconfig = Some(Sensitive::new(kubeconfig)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "kubeconfig fetch failed, keeping previous value"),
        }
        Ok(())
    }

    #[instrument(name = "k8s.update", skip_all, fields(id = %prior.id))]
    async fn update(&self, ctx: &ReconcileContext, prior: &ClusterRecord, record: &mut ClusterRecord) -> Result<()> {
        inherit_id(&mut record.id, &prior.id);
        let id = require_id(K8S_RESOURCE_TYPE, &record.id)?.to_string();
        record.validate()?;
        record.check_immutable(prior)?;

        let changes = record.changed_fields(prior);
        if changes.is_empty() {
            info!("no cluster changes to push");
        } else {
            info!(fields = ?changes, "updating cluster");
            let payload = Value::Object(record.update_payload(&changes));
            ctx.call(Method::PUT, &format!("{COLLECTION}/{id}"), Some(&payload))
                .await?;
        }

        self.read(ctx, record).await
    }

    #[instrument(name = "k8s.delete", skip_all, fields(id = %record.id))]
    async fn delete(&self, ctx: &ReconcileContext, record: &mut ClusterRecord) -> Result<()> {
        let id = require_id(K8S_RESOURCE_TYPE, &record.id)?.to_string();
        ctx.call(Method::DELETE, &format!("{COLLECTION}/{id}"), None).await?;
        info!("cluster deletion accepted, waiting until it is gone");

        let id_ref = id.as_str();
        wait_until_gone(K8S_RESOURCE_TYPE, id_ref, self.gone, self.delete, move || {
            Self::fetch(ctx, id_ref)
        })
        .await?;

        info!("cluster deleted");
        record.id.clear();
        Ok(())
    }
}
