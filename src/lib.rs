//! Hostman Provision - reconciliation engine for Hostman cloud resources.
//!
//! Converges remote state to a declared desired state for:
//! - **Servers**: create, wait for the generated root password, diff-based `PATCH`
//! - **Floating IPs**: allocate, then bind to a server (idempotent rebinding)
//! - **Kubernetes clusters**: create with worker groups, wait for readiness,
//!   kubeconfig side-fetch, polled deletion
//!
//! Every operation works on a record (a serde struct per resource type, or the
//! host's JSON field map through [`Engine`]) and leaves it describing what was
//! achieved, including the identifier of a resource created before a later
//! step failed.
//!
//! ## Quick Start
//!
//! All configuration can be loaded from environment variables. Create a `.env` file:
//!
//! ```text
//! HOSTMAN_TOKEN=your_api_token_here
//! HOSTMAN_K8S_READY_STATES=ready,running,started
//! ```
//!
//! Then drive a resource through the engine:
//!
//! ```ignore
//! use hostman_provision::Engine;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::from_env()?;
//!
//!     let mut server = json!({"name": "web", "bandwidth": 200, "is_ddos_guard": false});
//!     engine.create("hostman_server", &mut server).await?;
//!
//!     let mut ip = json!({"resource_type": "server", "resource_id": server["id"]});
//!     engine.create("hostman_ip", &mut ip).await?;
//!     println!("{} -> {}", ip["ip"], server["id"]);
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy for strict discipline
#![deny(clippy::all)]                 // All standard Clippy lints
#![deny(clippy::pedantic)]            // Very strict Clippy lints
#![deny(clippy::nursery)]             // Experimental lints
#![deny(clippy::unwrap_used)]         // unwrap() is forbidden
#![deny(clippy::expect_used)]         // expect() is forbidden
#![deny(clippy::panic)]               // panic!() is forbidden
#![deny(clippy::print_stdout)]        // println!() is forbidden in production
#![deny(clippy::todo)]                // TODO is forbidden
#![deny(clippy::unimplemented)]       // unimplemented!() is forbidden
#![deny(clippy::missing_const_for_fn)] // Force const when possible
#![deny(clippy::unwrap_in_result)]    // unwrap() in Result is forbidden
#![deny(clippy::module_inception)]    // Module with same name as crate is forbidden
#![deny(clippy::redundant_clone)]     // Useless clones are forbidden
#![deny(clippy::shadow_unrelated)]    // Shadowing unrelated variables is forbidden
#![deny(clippy::too_many_arguments)]  // Limit function arguments
#![deny(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Modules
// ============================================================================

/// Error taxonomy shared by all operations.
pub mod hostman_error;

/// Identifier normalization and tolerant JSON access.
pub mod hostman_json;

/// Environment-driven configuration.
///
/// Use this module to load the token and polling timings.
pub mod hostman_config;

/// Authenticated REST transport.
pub mod hostman_transport;

/// Readiness and deletion polling.
pub mod hostman_poller;

/// Reconciler contract and per-call context.
pub mod hostman_reconciler;

/// Virtual servers.
pub mod hostman_server;

/// Floating IPs and their binding.
pub mod hostman_floating_ip;

/// Managed Kubernetes clusters.
pub mod hostman_kubernetes;

/// Resource-type registry and engine facade.
///
/// Use this module when the host only knows resource-type names and JSON records.
pub mod hostman_engine;

/// JSON record files for the command-line host.
pub mod hostman_record_file;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use hostman_config::EngineConfig;
pub use hostman_engine::{Engine, ReconcilerRegistry};
pub use hostman_error::{ReconcileError, Result};
pub use hostman_floating_ip::{FloatingIpReconciler, FloatingIpRecord};
pub use hostman_json::{JsonScalar, ResourceId, Sensitive};
pub use hostman_kubernetes::{ClusterRecord, KubernetesReconciler, NodeConfiguration, WorkerGroup};
pub use hostman_poller::{GoneCriterion, PollConfig, ReadinessStates};
pub use hostman_reconciler::{DynReconciler, ReconcileContext, Reconciler};
pub use hostman_record_file::RecordFile;
pub use hostman_server::{ServerReconciler, ServerRecord};
pub use hostman_transport::{HttpTransport, Transport};
