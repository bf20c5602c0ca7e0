//! Reconciler contract.
//!
//! Unique responsibility: define what every resource type must implement and
//! the context threaded into each operation.
//!
//! Lifecycle of one resource instance:
//!
//! ```text
//! absent -> creating -> (ready | failed) -> updating* -> deleting -> absent
//! ```
//!
//! Operations take the record by `&mut` so that an identifier assigned early
//! in a multi-step operation stays on the record even when a later step
//! fails. The host persists the record it gets back whatever the outcome, and
//! a retry resumes from the same remote resource.

use std::{collections::BTreeSet, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::hostman_error::{ReconcileError, Result};
use crate::hostman_json::{ResourceId, Sensitive};
use crate::hostman_transport::{Method, Transport};

/// Names of the top-level fields that differ between two observations.
pub type ChangeSet = BTreeSet<&'static str>;

/// Per-invocation context: the token and the transport.
///
/// Built once by the host, shared read-only by every operation.
#[derive(Clone)]
pub struct ReconcileContext {
    token: Sensitive<String>,
    transport: Arc<dyn Transport>,
}

impl ReconcileContext {
    /// Create a context.
    #[must_use]
    pub fn new(token: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            token: Sensitive::new(token.into()),
            transport,
        }
    }

    /// Execute one API call with the context's token.
    ///
    /// # Errors
    ///
    /// Propagates transport failures unchanged.
    pub async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Vec<u8>> {
        self.transport
            .execute(method, path, self.token.expose(), body)
            .await
    }
}

impl fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Create/Read/Update/Delete for one resource type.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Typed desired/observed state of the resource.
    type Record: Send + Sync;

    /// Resource-type name used by the host (for example `hostman_server`).
    const RESOURCE_TYPE: &'static str;

    /// Create the remote resource described by `record` and fill its
    /// identifier and computed fields.
    ///
    /// # Errors
    ///
    /// Validation, transport, decode, readiness and timeout failures. The
    /// identifier is kept on the record once assigned.
    async fn create(&self, ctx: &ReconcileContext, record: &mut Self::Record) -> Result<()>;

    /// Refresh `record` from the remote resource.
    ///
    /// # Errors
    ///
    /// A 404 (see [`ReconcileError::is_not_found`]) means the resource is gone.
    async fn read(&self, ctx: &ReconcileContext, record: &mut Self::Record) -> Result<()>;

    /// Push the fields of `record` that differ from `prior`, then refresh.
    ///
    /// # Errors
    ///
    /// Validation, immutable-field, transport and decode failures.
    async fn update(&self, ctx: &ReconcileContext, prior: &Self::Record, record: &mut Self::Record) -> Result<()>;

    /// Destroy the remote resource and clear the record's identifier.
    ///
    /// # Errors
    ///
    /// Transport failures and deletion timeouts; the identifier is kept.
    async fn delete(&self, ctx: &ReconcileContext, record: &mut Self::Record) -> Result<()>;
}

/// Object-safe reconciler working on the host's JSON field maps.
///
/// Implemented for every [`Reconciler`] whose record is serde-compatible.
#[async_trait]
pub trait DynReconciler: Send + Sync {
    /// Resource-type name.
    fn resource_type(&self) -> &'static str;

    /// See [`Reconciler::create`].
    async fn create_record(&self, ctx: &ReconcileContext, record: &mut Value) -> Result<()>;

    /// See [`Reconciler::read`].
    async fn read_record(&self, ctx: &ReconcileContext, record: &mut Value) -> Result<()>;

    /// See [`Reconciler::update`].
    async fn update_record(&self, ctx: &ReconcileContext, prior: &Value, record: &mut Value) -> Result<()>;

    /// See [`Reconciler::delete`].
    async fn delete_record(&self, ctx: &ReconcileContext, record: &mut Value) -> Result<()>;
}

#[async_trait]
impl<R> DynReconciler for R
where
    R: Reconciler,
    R::Record: Serialize + DeserializeOwned,
{
    fn resource_type(&self) -> &'static str {
        R::RESOURCE_TYPE
    }

    async fn create_record(&self, ctx: &ReconcileContext, record: &mut Value) -> Result<()> {
        let mut typed: R::Record = from_host(record)?;
        let outcome = self.create(ctx, &mut typed).await;
        *record = to_host(&typed)?;
        outcome
    }

    async fn read_record(&self, ctx: &ReconcileContext, record: &mut Value) -> Result<()> {
        let mut typed: R::Record = from_host(record)?;
        let outcome = self.read(ctx, &mut typed).await;
        *record = to_host(&typed)?;
        outcome
    }

    async fn update_record(&self, ctx: &ReconcileContext, prior: &Value, record: &mut Value) -> Result<()> {
        let prior: R::Record = from_host(prior)?;
        let mut typed: R::Record = from_host(record)?;
        let outcome = self.update(ctx, &prior, &mut typed).await;
        *record = to_host(&typed)?;
        outcome
    }

    async fn delete_record(&self, ctx: &ReconcileContext, record: &mut Value) -> Result<()> {
        let mut typed: R::Record = from_host(record)?;
        let outcome = self.delete(ctx, &mut typed).await;
        *record = to_host(&typed)?;
        outcome
    }
}

fn from_host<T: DeserializeOwned>(record: &Value) -> Result<T> {
    T::deserialize(record).map_err(|source| ReconcileError::Decode {
        context: "host record".to_string(),
        source,
    })
}

fn to_host<T: Serialize>(record: &T) -> Result<Value> {
    serde_json::to_value(record).map_err(ReconcileError::Encode)
}

/// Identifier of a created resource, or `MissingId`.
///
/// # Errors
///
/// Returns `MissingId` when the record has no identifier.
pub fn require_id<'a>(resource: &'static str, id: &'a ResourceId) -> Result<&'a str> {
    if id.is_empty() {
        return Err(ReconcileError::MissingId(resource));
    }
    Ok(id.as_str())
}

/// Desired records from the host may omit the identifier on update.
pub fn inherit_id(record_id: &mut ResourceId, prior_id: &ResourceId) {
    if record_id.is_empty() {
        record_id.clone_from(prior_id);
    }
}
