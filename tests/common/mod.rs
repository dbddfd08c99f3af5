//! Shared test utilities for the vulnstack integration tests.
//!
//! Include this module in your integration tests:
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vulnstack::prelude::*;
use vulnstack::retry::RetryPolicy;

pub const PROJECT: &str = "demo";
pub const REGION: &str = "europe-west2";
pub const PASSWORD: &str = "hunter2-but-longer";

/// Variables used by most tests.
pub fn variables() -> Variables {
    Variables::new(PROJECT, REGION, PASSWORD).unwrap()
}

/// The declaration for [`variables`].
pub fn declaration() -> Declaration {
    declare(&variables()).unwrap()
}

/// Options with tiny retry delays so failure tests stay fast.
pub fn fast_options() -> ReconcilerOptions {
    ReconcilerOptions {
        parallelism: 4,
        operation_timeout: Duration::from_secs(5),
        retry: RetryPolicy::constant(3, Duration::from_millis(1)),
    }
}

/// A reconciler wired to a fresh simulated cloud and in-memory state.
pub struct Harness {
    pub cloud: Arc<SimulatedCloud>,
    pub store: Arc<MemoryState>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cloud(SimulatedCloud::new())
    }

    pub fn with_cloud(cloud: SimulatedCloud) -> Self {
        let cloud = Arc::new(cloud);
        let store = Arc::new(MemoryState::new());
        let reconciler = Reconciler::new(cloud.clone(), store.clone(), fast_options());
        Self {
            cloud,
            store,
            reconciler,
        }
    }

    /// Plan and apply `decl`, confirming destructive changes.
    pub async fn converge(&self, decl: &Declaration, state: &mut AppliedState) -> ApplyStats {
        let plan = self.reconciler.plan(decl, state).unwrap();
        self.reconciler.apply(decl, &plan, state, true).await.unwrap()
    }

    /// A state in which the full declaration has been applied.
    pub async fn applied(&self) -> AppliedState {
        let mut state = AppliedState::new();
        self.converge(&declaration(), &mut state).await;
        state
    }
}

pub fn id(kind: ResourceKind, name: &str) -> ResourceId {
    ResourceId::new(kind, name)
}
