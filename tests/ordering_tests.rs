//! Ordering tests: dependency waves and the preconditions the simulated
//! control plane enforces.

mod common;

use common::*;
use vulnstack::prelude::*;
use vulnstack::provider::Operation;
use vulnstack::topology::{
    CLUSTER_NAME, INSTANCE_NAME, NAT_NAME, NETWORK_NAME, PEERING_NAME, SERVICE_ACCOUNT_ID, VM_NAME,
};

fn position(order: &[ResourceId], id: &ResourceId) -> usize {
    order.iter().position(|x| x == id).unwrap()
}

#[test]
fn test_execution_order_respects_references_and_hints() {
    let graph = ResourceGraph::from_declaration(&declaration()).unwrap();
    let order = graph.execution_order().unwrap();
    assert_eq!(order.len(), 16);

    let network = id(ResourceKind::Network, NETWORK_NAME);
    let peering = id(ResourceKind::PeeringConnection, PEERING_NAME);
    let cluster = id(ResourceKind::DatabaseCluster, CLUSTER_NAME);
    let instance = id(ResourceKind::DatabaseInstance, INSTANCE_NAME);
    let nat = id(ResourceKind::RouterNat, NAT_NAME);
    let account = id(ResourceKind::ServiceAccount, SERVICE_ACCOUNT_ID);
    let vm = id(ResourceKind::AccessVm, VM_NAME);

    let subnet = id(ResourceKind::Subnetwork, vulnstack::topology::SUBNET_NAME);
    assert!(position(&order, &network) < position(&order, &subnet));
    assert!(position(&order, &peering) < position(&order, &cluster));
    assert!(position(&order, &cluster) < position(&order, &instance));
    assert!(position(&order, &nat) < position(&order, &vm));
    assert!(position(&order, &account) < position(&order, &vm));
}

#[test]
fn test_waves_contain_only_independent_resources() {
    let decl = declaration();
    let graph = ResourceGraph::from_declaration(&decl).unwrap();
    let waves = graph.waves().unwrap();

    assert_eq!(waves.iter().map(Vec::len).sum::<usize>(), 16);
    for (i, wave) in waves.iter().enumerate() {
        for member in wave {
            for dep in graph.dependencies(member) {
                let wave_of_dep = waves.iter().position(|w| w.contains(&dep)).unwrap();
                assert!(wave_of_dep < i, "{} runs before its dependency {}", member, dep);
            }
        }
    }
}

#[tokio::test]
async fn test_peering_applied_before_cluster_created() {
    let harness = Harness::new();
    harness.applied().await;

    let peering = id(ResourceKind::PeeringConnection, PEERING_NAME);
    let cluster = id(ResourceKind::DatabaseCluster, CLUSTER_NAME);
    let peered = harness.cloud.first_success(&peering, Operation::Create).unwrap();
    let created = harness.cloud.first_success(&cluster, Operation::Create).unwrap();
    assert!(peered < created);

    let events = harness.cloud.events();
    let at = |target: &ResourceId| {
        events
            .iter()
            .find(|e| &e.id == target && e.operation == Operation::Create && e.failure.is_none())
            .map(|e| e.at)
            .unwrap()
    };
    assert!(at(&peering) < at(&cluster));
}

#[tokio::test]
async fn test_cluster_creation_fails_without_peering() {
    let cloud = SimulatedCloud::new();
    let decl = declaration();
    let cluster = id(ResourceKind::DatabaseCluster, CLUSTER_NAME);
    let peering = id(ResourceKind::PeeringConnection, PEERING_NAME);

    // Everything except the cluster's subtree and the peering exists.
    for resource in decl.iter() {
        let skip = [&cluster, &peering].contains(&&resource.id)
            || resource.id.kind == ResourceKind::DatabaseInstance;
        if !skip {
            cloud.create(resource).await.unwrap();
        }
    }

    let resource = decl.get(&cluster).unwrap();
    let err = cloud.create(resource).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Precondition);
    assert!(!cloud.exists(&cluster));
}

#[tokio::test]
async fn test_unsatisfied_precondition_is_retried_until_it_clears() {
    let harness = Harness::new();
    let cluster = id(ResourceKind::DatabaseCluster, CLUSTER_NAME);
    harness.cloud.inject_failure(
        cluster.clone(),
        Operation::Create,
        FailureKind::Precondition,
        "network peering is still being established",
        2,
    );

    let state = harness.applied().await;
    assert!(state.contains(&cluster));
    assert!(harness.cloud.exists(&cluster));

    let attempts: Vec<Option<FailureKind>> = harness
        .cloud
        .events()
        .into_iter()
        .filter(|e| e.id == cluster && e.operation == Operation::Create)
        .map(|e| e.failure)
        .collect();
    assert_eq!(
        attempts,
        vec![Some(FailureKind::Precondition), Some(FailureKind::Precondition), None]
    );
}

#[tokio::test]
async fn test_precondition_outlasting_retries_fails_with_its_exit_code() {
    let harness = Harness::new();
    let cluster = id(ResourceKind::DatabaseCluster, CLUSTER_NAME);
    harness.cloud.inject_failure(
        cluster.clone(),
        Operation::Create,
        FailureKind::Precondition,
        "network peering is still being established",
        10,
    );

    let decl = declaration();
    let mut state = AppliedState::new();
    let plan = harness.reconciler.plan(&decl, &state).unwrap();
    let err = harness
        .reconciler
        .apply(&decl, &plan, &mut state, true)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 5);
    assert!(!state.contains(&cluster));
}

#[tokio::test]
async fn test_parallelism_limit_is_honoured() {
    let cloud = SimulatedCloud::new().with_latency(std::time::Duration::from_millis(5));
    let harness = Harness::with_cloud(cloud);
    let store: std::sync::Arc<dyn StatePersistence> = harness.store.clone();
    let reconciler = Reconciler::new(
        harness.cloud.clone(),
        store,
        ReconcilerOptions {
            parallelism: 1,
            ..fast_options()
        },
    );

    let decl = declaration();
    let mut state = AppliedState::new();
    let plan = reconciler.plan(&decl, &state).unwrap();
    reconciler.apply(&decl, &plan, &mut state, true).await.unwrap();

    assert_eq!(harness.cloud.peak_concurrency(), 1);
    assert_eq!(state.len(), 16);
}
