//! # vulnstack
//!
//! Declares, plans and converges the vulnerability-consolidation topology on
//! Google Cloud: a private network with NAT egress, a privately peered
//! AlloyDB cluster, an access VM reachable only through the IAP relay, and a
//! partitioned BigQuery archive table.
//!
//! ## Core Concepts
//!
//! - **Declaration**: the fixed set of resources built from three variables
//!   (project, region, database password)
//! - **State**: what has been applied, recorded per resource
//! - **Plan**: the create/update/replace/delete actions that converge state
//!   to the declaration
//! - **Provider**: the cloud control plane (GCP REST or simulated)
//! - **Reconciler**: runs a plan in dependency waves, with retries
//! - **Verifier**: checks the archive table answers queries once applied
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          CLI (clap)                              │
//! │   plan / apply / destroy / output / graph / validate / verify    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!          ┌──────────────────────┼───────────────────────┐
//!          ▼                      ▼                       ▼
//! ┌─────────────────┐   ┌───────────────────┐   ┌──────────────────┐
//! │    Topology     │   │      Planner      │   │   State store    │
//! │ (variables ->   │──▶│ (diff, classify,  │◀──│ (JSON file,      │
//! │  declaration)   │   │  cascade)         │   │  atomic writes)  │
//! └─────────────────┘   └───────────────────┘   └──────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Reconciler (waves, retry, timeout)                │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        CloudProvider: GCP REST APIs  |  simulated cloud          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use vulnstack::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let vars = Variables::new("my-project", "europe-west2", "change-me")?;
//!     let decl = declare(&vars)?;
//!     policy::check(&decl)?;
//!
//!     let reconciler = Reconciler::new(
//!         Arc::new(SimulatedCloud::new()),
//!         Arc::new(JsonStateFile::new("vulnstack.tfstate.json")),
//!         ReconcilerOptions::default(),
//!     );
//!     let mut state = reconciler.load_state()?;
//!     let plan = reconciler.plan(&decl, &state)?;
//!     let stats = reconciler.apply(&decl, &plan, &mut state, true).await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::Config;
    pub use crate::engine::{ApplyStats, Reconciler, ReconcilerOptions};
    pub use crate::error::{Error, FailureKind, Result};
    pub use crate::graph::ResourceGraph;
    pub use crate::plan::{ActionKind, Plan, PlanFormatter, PlannedAction, Planner};
    pub use crate::policy;
    #[cfg(feature = "gcp")]
    pub use crate::provider::GcpRestProvider;
    pub use crate::provider::{CloudProvider, SimulatedCloud, TableRef, Warehouse};
    pub use crate::resources::{Resource, ResourceId, ResourceKind, ResourceSpec};
    pub use crate::secrets::SensitiveString;
    pub use crate::state::{AppliedState, JsonStateFile, MemoryState, StatePersistence};
    pub use crate::topology::{declare, Declaration, Outputs};
    pub use crate::variables::{VariableInputs, Variables};
    pub use crate::verify::{VerificationReport, Verifier};
}

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod plan;
pub mod policy;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod secrets;
pub mod state;
pub mod topology;
pub mod variables;
pub mod verify;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
