//! GCP REST provider tests against a local mock server.

#![cfg(feature = "gcp")]

mod common;

use std::time::Duration;

use common::*;
use serde_json::json;
use vulnstack::config::GcpConfig;
use vulnstack::prelude::*;
use vulnstack::state::ResourceRecord;
use vulnstack::topology::{CLUSTER_NAME, DATASET_ID, GRANTED_ROLES, NETWORK_NAME};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-access-token";

fn provider(server: &MockServer) -> GcpRestProvider {
    GcpRestProvider::with_token(
        GcpConfig::with_base_url(&server.uri()),
        TOKEN,
        Duration::from_millis(5),
        Duration::from_secs(2),
    )
    .unwrap()
}

fn resource(kind: ResourceKind, name: &str) -> Resource {
    declaration().get(&ResourceId::new(kind, name)).unwrap().clone()
}

fn record_of(resource: &Resource, provider_id: &str) -> ResourceRecord {
    ResourceRecord::new(
        resource.id.clone(),
        provider_id,
        resource.attributes(),
        resource.dependencies(),
    )
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_network_polls_compute_operation() {
    let server = MockServer::start().await;
    let op_link = format!("{}/compute/v1/projects/demo/global/operations/op-1", server.uri());

    Mock::given(method("POST"))
        .and(path("/compute/v1/projects/demo/global/networks"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .and(body_partial_json(json!({ "name": NETWORK_NAME, "autoCreateSubnetworks": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "compute#operation",
            "status": "RUNNING",
            "selfLink": op_link,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/demo/global/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "compute#operation",
            "status": "DONE",
            "selfLink": op_link,
        })))
        .expect(1..)
        .mount(&server)
        .await;

    let observed = provider(&server)
        .create(&resource(ResourceKind::Network, NETWORK_NAME))
        .await
        .unwrap();
    assert_eq!(observed.provider_id, "projects/demo/global/networks/vuln-vpc");
}

#[tokio::test]
async fn test_create_cluster_polls_longrunning_operation() {
    let server = MockServer::start().await;
    let op_name = "projects/demo/locations/europe-west2/operations/op-2";

    Mock::given(method("POST"))
        .and(path("/alloydb/v1/projects/demo/locations/europe-west2/clusters"))
        .and(query_param("clusterId", CLUSTER_NAME))
        .and(body_partial_json(json!({ "initialUser": { "user": "postgres", "password": PASSWORD } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": op_name, "done": false })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/alloydb/v1/{}", op_name)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "name": op_name, "done": true, "response": {} })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cluster = resource(ResourceKind::DatabaseCluster, CLUSTER_NAME);
    let observed = provider(&server).create(&cluster).await.unwrap();
    assert!(observed.provider_id.ends_with("/clusters/vuln-consolidation-cluster"));
    let recorded = serde_json::to_string(&observed.attributes).unwrap();
    assert!(!recorded.contains(PASSWORD));
}

#[tokio::test]
async fn test_create_dataset_is_synchronous() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/datasets"))
        .and(body_partial_json(json!({ "datasetReference": { "datasetId": DATASET_ID } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#dataset",
            "id": "demo:vulnerability_archive",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let observed = provider(&server)
        .create(&resource(ResourceKind::ArchiveDataset, DATASET_ID))
        .await
        .unwrap();
    assert_eq!(observed.provider_id, "projects/demo/datasets/vulnerability_archive");
}

#[tokio::test]
async fn test_iam_binding_adds_exactly_one_member() {
    let server = MockServer::start().await;
    let (name, role) = GRANTED_ROLES[0];
    let binding = resource(ResourceKind::IamBinding, name);
    let member = binding.attributes()["member"].as_str().unwrap().to_string();

    Mock::given(method("POST"))
        .and(path("/cloudresourcemanager/v1/projects/demo:getIamPolicy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "etag": "BwX1",
            "bindings": [{ "role": role, "members": ["user:analyst@example.com"] }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cloudresourcemanager/v1/projects/demo:setIamPolicy"))
        .and(body_partial_json(json!({
            "policy": {
                "etag": "BwX1",
                "bindings": [{ "role": role, "members": ["user:analyst@example.com", member] }],
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let observed = provider(&server).create(&binding).await.unwrap();
    assert!(observed.provider_id.ends_with(&format!("#{}", name)));
}

// ============================================================================
// Warehouse queries
// ============================================================================

const COUNT_SQL: &str = "SELECT COUNT(*) AS total FROM `demo.vulnerability_archive.raw_scan_logs`";

#[tokio::test]
async fn test_row_count_runs_standard_sql_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/queries"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .and(body_partial_json(json!({ "query": COUNT_SQL, "useLegacySql": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "rows": [{ "f": [{ "v": "42" }] }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let count = provider(&server)
        .row_count(&TableRef::archive("demo"))
        .await
        .unwrap();
    assert_eq!(count, 42);
}

#[tokio::test]
async fn test_row_count_waits_for_incomplete_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": false,
            "jobReference": { "projectId": "demo", "jobId": "job-1", "location": "EU" },
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/demo/queries/job-1"))
        .and(query_param("location", "EU"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "rows": [{ "f": [{ "v": "7" }] }],
        })))
        .expect(1..)
        .mount(&server)
        .await;

    let count = provider(&server)
        .row_count(&TableRef::archive("demo"))
        .await
        .unwrap();
    assert_eq!(count, 7);
}

#[tokio::test]
async fn test_truncate_issues_truncate_statement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/queries"))
        .and(body_partial_json(json!({
            "query": "TRUNCATE TABLE `demo.vulnerability_archive.raw_scan_logs`",
            "useLegacySql": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobComplete": true })))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server)
        .truncate(&TableRef::archive("demo"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_query_of_missing_table_is_precondition_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/queries"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "status": "NOT_FOUND", "message": "Not found: Table demo:vulnerability_archive.raw_scan_logs" }
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .row_count(&TableRef::archive("demo"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Precondition);
    assert!(err.message.contains("raw_scan_logs"));
}

#[tokio::test]
async fn test_verifier_reports_through_rest_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/queries"))
        .and(body_partial_json(json!({ "query": COUNT_SQL })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "rows": [{ "f": [{ "v": "3" }] }],
        })))
        .mount(&server)
        .await;

    let verifier = Verifier::new(
        std::sync::Arc::new(provider(&server)),
        ReconcilerOptions::default(),
    );
    let report = verifier
        .report(&TableRef::archive("demo"), &declaration().outputs)
        .await
        .unwrap();
    assert_eq!(report.warehouse.row_count, 3);
    assert!(report.database.db_connection_command.contains("psql"));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_forbidden_is_permission_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/datasets"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "status": "PERMISSION_DENIED", "message": "caller lacks bigquery.datasets.create" }
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .create(&resource(ResourceKind::ArchiveDataset, DATASET_ID))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::PermissionOrQuota);
    assert!(err.message.contains("bigquery.datasets.create"));
}

#[tokio::test]
async fn test_failed_compute_operation_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/compute/v1/projects/demo/global/networks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "compute#operation",
            "status": "DONE",
            "error": { "errors": [{ "code": "ALREADY_EXISTS", "message": "network exists" }] },
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .create(&resource(ResourceKind::Network, NETWORK_NAME))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::DeclarationConflict);
    assert_eq!(err.message, "ALREADY_EXISTS: network exists");
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/demo/datasets"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = provider(&server)
        .create(&resource(ResourceKind::ArchiveDataset, DATASET_ID))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Transient);
}

// ============================================================================
// Read and delete
// ============================================================================

#[tokio::test]
async fn test_read_missing_resource_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/demo/global/networks/vuln-vpc"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "not found" }
        })))
        .mount(&server)
        .await;

    let network = resource(ResourceKind::Network, NETWORK_NAME);
    let record = record_of(&network, "projects/demo/global/networks/vuln-vpc");
    assert!(provider(&server).read(&record).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_of_missing_resource_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/bigquery/v2/projects/demo/datasets/vulnerability_archive"))
        .and(query_param("deleteContents", "true"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dataset = resource(ResourceKind::ArchiveDataset, DATASET_ID);
    let record = record_of(&dataset, "projects/demo/datasets/vulnerability_archive");
    provider(&server).delete(&record).await.unwrap();
}

#[test]
fn test_missing_token_is_rejected() {
    let config = GcpConfig {
        access_token_env: "VULNSTACK_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
        ..GcpConfig::default()
    };
    let err = GcpRestProvider::new(config, &Config::default().execution).unwrap_err();
    assert_eq!(err.kind, FailureKind::PermissionOrQuota);
}

#[test]
fn test_invalid_endpoint_is_rejected() {
    let config = GcpConfig {
        compute_endpoint: "not a url".to_string(),
        ..GcpConfig::default()
    };
    let err = GcpRestProvider::with_token(config, TOKEN, Duration::from_millis(5), Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::DeclarationConflict);
}
