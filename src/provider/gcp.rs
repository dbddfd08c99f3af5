//! Google Cloud REST provider.
//!
//! Talks to the public REST surfaces directly with `reqwest`:
//!
//! | Kind | API |
//! |------|-----|
//! | network, subnetwork, router, router NAT, address range, VM, firewall | Compute Engine v1 |
//! | peering connection | Service Networking v1 |
//! | database cluster, instance | AlloyDB v1 |
//! | service account | IAM v1 |
//! | IAM binding | Resource Manager v1 (`getIamPolicy` / `setIamPolicy`) |
//! | dataset, table | BigQuery v2 |
//!
//! Authentication is a bearer token read from the environment variable
//! named by `gcp.access_token_env`. Long-running operations (Compute
//! `Operation` resources and `google.longrunning.Operation`) are polled
//! until done or until the operation timeout elapses.
//!
//! Reads confirm existence; the recorded attributes are returned unchanged
//! for objects that still exist.
//!
//! Row counts and truncation of the archive table go through BigQuery
//! `jobs.query` with standard SQL, polling `getQueryResults` while the job
//! is incomplete.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{CloudProvider, ObservedResource, ProviderError, ProviderResult, TableRef, Warehouse};
use crate::config::{ExecutionConfig, GcpConfig};
use crate::error::FailureKind;
use crate::plan::AttributeChange;
use crate::resources::{Attributes, Resource, ResourceId, ResourceKind, ResourceSpec};
use crate::secrets::SensitiveString;
use crate::state::ResourceRecord;

/// Default timeout for a single HTTP request
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Server-side wait per `jobs.query` / `getQueryResults` call
const QUERY_WAIT_MS: u64 = 10_000;

/// Google Cloud REST provider.
pub struct GcpRestProvider {
    client: Client,
    config: GcpConfig,
    token: SensitiveString,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl std::fmt::Debug for GcpRestProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpRestProvider")
            .field("config", &self.config)
            .field("token", &self.token)
            .finish()
    }
}

/// Where a resource lives: API base plus resource path.
struct Location<'a> {
    endpoint: &'a str,
    path: String,
}

impl Location<'_> {
    fn url(&self) -> String {
        format!("{}/{}", self.endpoint, self.path)
    }
}

impl GcpRestProvider {
    /// Build a provider, reading the access token from the environment.
    pub fn new(config: GcpConfig, execution: &ExecutionConfig) -> ProviderResult<Self> {
        let token = std::env::var(&config.access_token_env).map_err(|_| {
            ProviderError::permission(format!(
                "no access token: set {} (e.g. from `gcloud auth print-access-token`)",
                config.access_token_env
            ))
        })?;
        Self::with_token(
            config,
            token,
            Duration::from_millis(execution.poll_interval_ms),
            Duration::from_secs(execution.operation_timeout_secs),
        )
    }

    /// Build a provider with an explicit token.
    pub fn with_token(
        config: GcpConfig,
        token: impl Into<SensitiveString>,
        poll_interval: Duration,
        operation_timeout: Duration,
    ) -> ProviderResult<Self> {
        for endpoint in [
            &config.compute_endpoint,
            &config.service_networking_endpoint,
            &config.alloydb_endpoint,
            &config.iam_endpoint,
            &config.resource_manager_endpoint,
            &config.bigquery_endpoint,
        ] {
            url::Url::parse(endpoint).map_err(|e| {
                ProviderError::conflict(format!("invalid endpoint '{}': {}", endpoint, e))
            })?;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("vulnstack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            token: token.into(),
            poll_interval,
            operation_timeout,
        })
    }

    // ========================================================================
    // HTTP plumbing
    // ========================================================================

    /// Send a request; non-success statuses become classified errors.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> ProviderResult<Value> {
        trace!(%method, url, "gcp request");
        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(self.token.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("{} {}: {}", method, url, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            Ok(value)
        } else {
            Err(classify_http(status, &value))
        }
    }

    /// Like [`send`](Self::send) but maps 404 to `None`.
    async fn send_optional(&self, method: Method, url: &str) -> ProviderResult<Option<Value>> {
        match self.send(method, url, None).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.message.starts_with("404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Wait for whatever operation `response` describes to finish.
    ///
    /// `base` is the API root used to poll `google.longrunning` operations.
    async fn wait(&self, response: Value, base: &str) -> ProviderResult<Value> {
        let deadline = Instant::now() + self.operation_timeout;
        let mut op = response;

        loop {
            if is_compute_operation(&op) {
                if op.get("status").and_then(Value::as_str) == Some("DONE") {
                    return match op.get("error") {
                        Some(error) => Err(classify_compute_error(error)),
                        None => Ok(op),
                    };
                }
            } else if op.get("done").is_some() || is_pending_longrunning(&op) {
                if op.get("done").and_then(Value::as_bool) == Some(true) {
                    return match op.get("error") {
                        Some(error) => Err(classify_status_error(error)),
                        None => Ok(op.get("response").cloned().unwrap_or(op)),
                    };
                }
            } else {
                // Synchronous API; the response is the resource.
                return Ok(op);
            }

            if Instant::now() >= deadline {
                return Err(ProviderError::transient(format!(
                    "operation did not complete within {}s",
                    self.operation_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;

            let poll_url = match op.get("selfLink").and_then(Value::as_str) {
                Some(link) if is_compute_operation(&op) => link.to_string(),
                _ => {
                    let name = op.get("name").and_then(Value::as_str).unwrap_or_default();
                    format!("{}/{}", base, name)
                }
            };
            debug!(url = %poll_url, "polling operation");
            op = self.send(Method::GET, &poll_url, None).await?;
        }
    }

    async fn call_and_wait(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        base: &str,
    ) -> ProviderResult<Value> {
        let response = self.send(method, url, body).await?;
        self.wait(response, base).await
    }

    // ========================================================================
    // Resource locations
    // ========================================================================

    fn locate<'a>(&'a self, id: &ResourceId, attrs: &Attributes) -> ProviderResult<Location<'a>> {
        let project = attr(attrs, "project")?;
        let c = &self.config;
        let location = match id.kind {
            ResourceKind::Network => Location {
                endpoint: &c.compute_endpoint,
                path: format!("projects/{}/global/networks/{}", project, id.name),
            },
            ResourceKind::Subnetwork => Location {
                endpoint: &c.compute_endpoint,
                path: format!(
                    "projects/{}/regions/{}/subnetworks/{}",
                    project,
                    attr(attrs, "region")?,
                    id.name
                ),
            },
            ResourceKind::Router => Location {
                endpoint: &c.compute_endpoint,
                path: format!(
                    "projects/{}/regions/{}/routers/{}",
                    project,
                    attr(attrs, "region")?,
                    id.name
                ),
            },
            // A NAT gateway is part of its router.
            ResourceKind::RouterNat => Location {
                endpoint: &c.compute_endpoint,
                path: format!(
                    "projects/{}/regions/{}/routers/{}",
                    project,
                    attr(attrs, "region")?,
                    attr(attrs, "router")?
                ),
            },
            ResourceKind::PrivateServiceRange => Location {
                endpoint: &c.compute_endpoint,
                path: format!("projects/{}/global/addresses/{}", project, id.name),
            },
            ResourceKind::PeeringConnection => Location {
                endpoint: &c.service_networking_endpoint,
                path: format!("services/{}/connections", attr(attrs, "service")?),
            },
            ResourceKind::DatabaseCluster => Location {
                endpoint: &c.alloydb_endpoint,
                path: format!(
                    "projects/{}/locations/{}/clusters/{}",
                    project,
                    attr(attrs, "location")?,
                    id.name
                ),
            },
            ResourceKind::DatabaseInstance => Location {
                endpoint: &c.alloydb_endpoint,
                path: format!(
                    "projects/{}/locations/{}/clusters/{}/instances/{}",
                    project,
                    attr(attrs, "location")?,
                    attr(attrs, "cluster")?,
                    id.name
                ),
            },
            ResourceKind::ServiceAccount => Location {
                endpoint: &c.iam_endpoint,
                path: format!("projects/{}/serviceAccounts/{}", project, attr(attrs, "email")?),
            },
            ResourceKind::IamBinding => Location {
                endpoint: &c.resource_manager_endpoint,
                path: format!("projects/{}", project),
            },
            ResourceKind::AccessVm => Location {
                endpoint: &c.compute_endpoint,
                path: format!(
                    "projects/{}/zones/{}/instances/{}",
                    project,
                    attr(attrs, "zone")?,
                    id.name
                ),
            },
            ResourceKind::FirewallRule => Location {
                endpoint: &c.compute_endpoint,
                path: format!("projects/{}/global/firewalls/{}", project, id.name),
            },
            ResourceKind::ArchiveDataset => Location {
                endpoint: &c.bigquery_endpoint,
                path: format!("projects/{}/datasets/{}", project, id.name),
            },
            ResourceKind::ArchiveTable => Location {
                endpoint: &c.bigquery_endpoint,
                path: format!(
                    "projects/{}/datasets/{}/tables/{}",
                    project,
                    attr(attrs, "dataset")?,
                    id.name
                ),
            },
        };
        Ok(location)
    }

    /// Parent collection a resource is inserted into.
    fn parent_url(&self, loc: &Location<'_>) -> String {
        match loc.path.rsplit_once('/') {
            Some((parent, _)) => format!("{}/{}", loc.endpoint, parent),
            None => loc.url(),
        }
    }

    async fn project_number(&self, project: &str) -> ProviderResult<String> {
        let url = format!("{}/projects/{}", self.config.resource_manager_endpoint, project);
        let value = self.send(Method::GET, &url, None).await?;
        value
            .get("projectNumber")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::transient(format!("project {} has no projectNumber", project)))
    }

    // ========================================================================
    // IAM policy read-modify-write
    // ========================================================================

    async fn get_policy(&self, project: &str) -> ProviderResult<Value> {
        let url = format!(
            "{}/projects/{}:getIamPolicy",
            self.config.resource_manager_endpoint, project
        );
        self.send(Method::POST, &url, Some(&json!({}))).await
    }

    async fn set_policy(&self, project: &str, policy: Value) -> ProviderResult<()> {
        let url = format!(
            "{}/projects/{}:setIamPolicy",
            self.config.resource_manager_endpoint, project
        );
        self.send(Method::POST, &url, Some(&json!({ "policy": policy })))
            .await
            .map(|_| ())
    }

    /// Add or remove exactly one (role, member) pair.
    async fn modify_binding(&self, attrs: &Attributes, grant: bool) -> ProviderResult<()> {
        let project = attr(attrs, "project")?;
        let role = attr(attrs, "role")?;
        let member = attr(attrs, "member")?;

        let mut policy = self.get_policy(project).await?;
        let changed = if grant {
            add_member(&mut policy, role, member)
        } else {
            remove_member(&mut policy, role, member)
        };
        if !changed {
            debug!(role, member, grant, "IAM policy already converged");
            return Ok(());
        }
        self.set_policy(project, policy).await
    }

    // ========================================================================
    // Per-kind operations
    // ========================================================================

    async fn create_spec(&self, resource: &Resource) -> ProviderResult<()> {
        let attrs = resource.attributes();
        let loc = self.locate(&resource.id, &attrs)?;
        let compute = self.config.compute_endpoint.as_str();

        match &resource.spec {
            ResourceSpec::Network(n) => {
                let body = json!({
                    "name": n.name,
                    "autoCreateSubnetworks": n.auto_create_subnetworks,
                    "routingConfig": { "routingMode": n.routing_mode },
                });
                self.call_and_wait(Method::POST, &self.parent_url(&loc), Some(&body), compute)
                    .await?;
            }
            ResourceSpec::Subnetwork(s) => {
                let body = json!({
                    "name": s.name,
                    "network": network_link(&s.project, &s.network),
                    "ipCidrRange": s.ip_cidr_range,
                    "privateIpGoogleAccess": s.private_ip_google_access,
                });
                self.call_and_wait(Method::POST, &self.parent_url(&loc), Some(&body), compute)
                    .await?;
            }
            ResourceSpec::Router(r) => {
                let body = json!({
                    "name": r.name,
                    "network": network_link(&r.project, &r.network),
                });
                self.call_and_wait(Method::POST, &self.parent_url(&loc), Some(&body), compute)
                    .await?;
            }
            ResourceSpec::RouterNat(_) => {
                self.patch_router_nats(&loc, &resource.id.name, Some(nat_body(&attrs)))
                    .await?;
            }
            ResourceSpec::PrivateServiceRange(r) => {
                let body = json!({
                    "name": r.name,
                    "purpose": r.purpose,
                    "addressType": r.address_type,
                    "prefixLength": r.prefix_length,
                    "network": network_link(&r.project, &r.network),
                });
                self.call_and_wait(Method::POST, &self.parent_url(&loc), Some(&body), compute)
                    .await?;
            }
            ResourceSpec::PeeringConnection(p) => {
                let number = self.project_number(&p.project).await?;
                let body = json!({
                    "network": network_link(&number, &p.network),
                    "reservedPeeringRanges": p.reserved_peering_ranges,
                });
                self.call_and_wait(
                    Method::POST,
                    &loc.url(),
                    Some(&body),
                    &self.config.service_networking_endpoint,
                )
                .await?;
            }
            ResourceSpec::DatabaseCluster(c) => {
                let body = json!({
                    "networkConfig": { "network": network_link(&c.project, &c.network) },
                    "initialUser": {
                        "user": c.initial_user.user,
                        "password": c.initial_password.expose(),
                    },
                    "automatedBackupPolicy": backup_policy_body(&attrs),
                });
                let url = format!("{}?clusterId={}", self.parent_url(&loc), c.name);
                self.call_and_wait(Method::POST, &url, Some(&body), &self.config.alloydb_endpoint)
                    .await?;
            }
            ResourceSpec::DatabaseInstance(i) => {
                let body = json!({
                    "instanceType": i.instance_type,
                    "machineConfig": { "cpuCount": i.cpu_count },
                    "availabilityType": i.availability_type,
                });
                let url = format!("{}?instanceId={}", self.parent_url(&loc), i.name);
                self.call_and_wait(Method::POST, &url, Some(&body), &self.config.alloydb_endpoint)
                    .await?;
            }
            ResourceSpec::ServiceAccount(sa) => {
                let body = json!({
                    "accountId": sa.account_id,
                    "serviceAccount": { "displayName": sa.display_name },
                });
                self.send(Method::POST, &self.parent_url(&loc), Some(&body)).await?;
            }
            ResourceSpec::IamBinding(_) => {
                self.modify_binding(&attrs, true).await?;
            }
            ResourceSpec::AccessVm(vm) => {
                let region = zone_region(&vm.zone);
                let mut interface = json!({
                    "subnetwork": format!(
                        "projects/{}/regions/{}/subnetworks/{}",
                        vm.project, region, vm.subnetwork
                    ),
                });
                if vm.external_ip {
                    interface["accessConfigs"] =
                        json!([{ "type": "ONE_TO_ONE_NAT", "name": "External NAT" }]);
                }
                let body = json!({
                    "name": vm.name,
                    "machineType": format!("zones/{}/machineTypes/{}", vm.zone, vm.machine_type),
                    "tags": { "items": vm.tags },
                    "disks": [{
                        "boot": true,
                        "autoDelete": true,
                        "initializeParams": { "sourceImage": image_link(&vm.image) },
                    }],
                    "networkInterfaces": [interface],
                    "serviceAccounts": [{ "email": vm.service_account, "scopes": vm.scopes }],
                    "metadata": {
                        "items": [{ "key": "startup-script", "value": vm.startup_script }],
                    },
                });
                self.call_and_wait(Method::POST, &self.parent_url(&loc), Some(&body), compute)
                    .await?;
            }
            ResourceSpec::FirewallRule(_) => {
                let body = firewall_body(&attrs)?;
                self.call_and_wait(Method::POST, &self.parent_url(&loc), Some(&body), compute)
                    .await?;
            }
            ResourceSpec::ArchiveDataset(d) => {
                let body = json!({
                    "datasetReference": { "projectId": d.project, "datasetId": d.dataset_id },
                    "location": d.location,
                });
                self.send(Method::POST, &self.parent_url(&loc), Some(&body)).await?;
            }
            ResourceSpec::ArchiveTable(t) => {
                let body = json!({
                    "tableReference": {
                        "projectId": t.project,
                        "datasetId": t.dataset,
                        "tableId": t.table_id,
                    },
                    "schema": { "fields": attrs.get("schema").cloned().unwrap_or(Value::Null) },
                    "timePartitioning": {
                        "type": t.time_partitioning.partition_type,
                        "field": t.time_partitioning.field,
                    },
                });
                self.send(Method::POST, &self.parent_url(&loc), Some(&body)).await?;
            }
        }
        Ok(())
    }

    async fn update_spec(&self, resource: &Resource, changes: &[AttributeChange]) -> ProviderResult<()> {
        let attrs = resource.attributes();
        let loc = self.locate(&resource.id, &attrs)?;
        let compute = self.config.compute_endpoint.as_str();
        let changed = |field: &str| changes.iter().any(|c| c.path == field);

        match &resource.spec {
            ResourceSpec::Network(n) => {
                let body = json!({ "routingConfig": { "routingMode": n.routing_mode } });
                self.call_and_wait(Method::PATCH, &loc.url(), Some(&body), compute).await?;
            }
            ResourceSpec::Subnetwork(s) => {
                let current = self.send(Method::GET, &loc.url(), None).await?;
                let body = json!({
                    "privateIpGoogleAccess": s.private_ip_google_access,
                    "fingerprint": current.get("fingerprint").cloned().unwrap_or(Value::Null),
                });
                self.call_and_wait(Method::PATCH, &loc.url(), Some(&body), compute).await?;
            }
            ResourceSpec::RouterNat(_) => {
                self.patch_router_nats(&loc, &resource.id.name, Some(nat_body(&attrs)))
                    .await?;
            }
            ResourceSpec::PeeringConnection(p) => {
                let number = self.project_number(&p.project).await?;
                let body = json!({
                    "network": network_link(&number, &p.network),
                    "reservedPeeringRanges": p.reserved_peering_ranges,
                });
                let url = format!("{}/-?updateMask=reservedPeeringRanges&force=true", loc.url());
                self.call_and_wait(
                    Method::PATCH,
                    &url,
                    Some(&body),
                    &self.config.service_networking_endpoint,
                )
                .await?;
            }
            ResourceSpec::DatabaseCluster(c) => {
                let alloydb = self.config.alloydb_endpoint.as_str();
                if changed("automated_backup_policy") {
                    let body = json!({ "automatedBackupPolicy": backup_policy_body(&attrs) });
                    let url = format!("{}?updateMask=automatedBackupPolicy", loc.url());
                    self.call_and_wait(Method::PATCH, &url, Some(&body), alloydb).await?;
                }
                if changed("initial_user") {
                    let body = json!({ "password": c.initial_password.expose() });
                    let url = format!(
                        "{}/users/{}?updateMask=password",
                        loc.url(),
                        c.initial_user.user
                    );
                    self.send(Method::PATCH, &url, Some(&body)).await?;
                }
            }
            ResourceSpec::DatabaseInstance(i) => {
                let body = json!({
                    "machineConfig": { "cpuCount": i.cpu_count },
                    "availabilityType": i.availability_type,
                });
                let url = format!("{}?updateMask=machineConfig.cpuCount,availabilityType", loc.url());
                self.call_and_wait(Method::PATCH, &url, Some(&body), &self.config.alloydb_endpoint)
                    .await?;
            }
            ResourceSpec::ServiceAccount(sa) => {
                let body = json!({
                    "serviceAccount": { "displayName": sa.display_name },
                    "updateMask": "displayName",
                });
                self.send(Method::PATCH, &loc.url(), Some(&body)).await?;
            }
            ResourceSpec::AccessVm(vm) => {
                self.update_vm(&loc, vm, &changed).await?;
            }
            ResourceSpec::FirewallRule(_) => {
                let body = firewall_body(&attrs)?;
                self.call_and_wait(Method::PATCH, &loc.url(), Some(&body), compute).await?;
            }
            ResourceSpec::ArchiveTable(_) => {
                if changed("schema") {
                    let body = json!({
                        "schema": { "fields": attrs.get("schema").cloned().unwrap_or(Value::Null) },
                    });
                    self.send(Method::PATCH, &loc.url(), Some(&body)).await?;
                }
            }
            // Nothing else has server-side mutable fields; the rest are
            // either replaced or tracked locally (e.g. delete-contents flags).
            ResourceSpec::Router(_)
            | ResourceSpec::PrivateServiceRange(_)
            | ResourceSpec::IamBinding(_)
            | ResourceSpec::ArchiveDataset(_) => {}
        }
        Ok(())
    }

    async fn update_vm(
        &self,
        loc: &Location<'_>,
        vm: &crate::resources::AccessVm,
        changed: &impl Fn(&str) -> bool,
    ) -> ProviderResult<()> {
        let compute = self.config.compute_endpoint.as_str();
        let url = loc.url();
        let current = self.send(Method::GET, &url, None).await?;

        if changed("tags") {
            let body = json!({
                "items": vm.tags,
                "fingerprint": current.pointer("/tags/fingerprint").cloned().unwrap_or(Value::Null),
            });
            self.call_and_wait(Method::POST, &format!("{}/setTags", url), Some(&body), compute)
                .await?;
        }
        if changed("startup_script") {
            let body = json!({
                "items": [{ "key": "startup-script", "value": vm.startup_script }],
                "fingerprint": current.pointer("/metadata/fingerprint").cloned().unwrap_or(Value::Null),
            });
            self.call_and_wait(Method::POST, &format!("{}/setMetadata", url), Some(&body), compute)
                .await?;
        }

        let needs_stop = changed("machine_type") || changed("scopes") || changed("service_account");
        if needs_stop {
            info!(instance = %vm.name, "stopping instance to apply changes");
            self.call_and_wait(Method::POST, &format!("{}/stop", url), None, compute)
                .await?;
            if changed("machine_type") {
                let body = json!({
                    "machineType": format!("zones/{}/machineTypes/{}", vm.zone, vm.machine_type),
                });
                self.call_and_wait(Method::POST, &format!("{}/setMachineType", url), Some(&body), compute)
                    .await?;
            }
            if changed("scopes") || changed("service_account") {
                let body = json!({ "email": vm.service_account, "scopes": vm.scopes });
                self.call_and_wait(
                    Method::POST,
                    &format!("{}/setServiceAccount", url),
                    Some(&body),
                    compute,
                )
                .await?;
            }
            self.call_and_wait(Method::POST, &format!("{}/start", url), None, compute)
                .await?;
        }
        Ok(())
    }

    /// Replace (`Some`) or remove (`None`) the named NAT on a router.
    async fn patch_router_nats(
        &self,
        router: &Location<'_>,
        nat_name: &str,
        nat: Option<Value>,
    ) -> ProviderResult<bool> {
        let Some(current) = self.send_optional(Method::GET, &router.url()).await? else {
            return if nat.is_some() {
                Err(ProviderError::precondition(format!("router for NAT {} does not exist", nat_name)))
            } else {
                Ok(false)
            };
        };

        let mut nats: Vec<Value> = current
            .get("nats")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let before = nats.len();
        nats.retain(|n| n.get("name").and_then(Value::as_str) != Some(nat_name));
        let existed = nats.len() != before;
        if nat.is_none() && !existed {
            return Ok(false);
        }
        if let Some(nat) = nat {
            nats.push(nat);
        }

        let body = json!({
            "nats": nats,
            "fingerprint": current.get("fingerprint").cloned().unwrap_or(Value::Null),
        });
        self.call_and_wait(
            Method::PATCH,
            &router.url(),
            Some(&body),
            &self.config.compute_endpoint,
        )
        .await?;
        Ok(true)
    }

    async fn delete_record(&self, record: &ResourceRecord) -> ProviderResult<()> {
        let attrs = &record.attributes;
        let loc = self.locate(&record.id, attrs)?;
        let compute = self.config.compute_endpoint.as_str();

        let result = match record.id.kind {
            ResourceKind::RouterNat => self
                .patch_router_nats(&loc, &record.id.name, None)
                .await
                .map(|_| ()),
            ResourceKind::IamBinding => self.modify_binding(attrs, false).await,
            ResourceKind::PeeringConnection => {
                let project = attr(attrs, "project")?;
                let number = self.project_number(project).await?;
                let service = attr(attrs, "service")?;
                let url = format!(
                    "{}/{}/{}:deleteConnection",
                    loc.endpoint,
                    loc.path,
                    service.replace('.', "-")
                );
                let body = json!({ "consumerNetwork": network_link(&number, attr(attrs, "network")?) });
                self.call_and_wait(
                    Method::POST,
                    &url,
                    Some(&body),
                    &self.config.service_networking_endpoint,
                )
                .await
                .map(|_| ())
            }
            ResourceKind::DatabaseCluster => self
                .call_and_wait(
                    Method::DELETE,
                    &format!("{}?force=true", loc.url()),
                    None,
                    &self.config.alloydb_endpoint,
                )
                .await
                .map(|_| ()),
            ResourceKind::DatabaseInstance => self
                .call_and_wait(Method::DELETE, &loc.url(), None, &self.config.alloydb_endpoint)
                .await
                .map(|_| ()),
            ResourceKind::ArchiveDataset => {
                let delete_contents = attrs
                    .get("delete_contents_on_destroy")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.send(
                    Method::DELETE,
                    &format!("{}?deleteContents={}", loc.url(), delete_contents),
                    None,
                )
                .await
                .map(|_| ())
            }
            ResourceKind::ServiceAccount | ResourceKind::ArchiveTable => {
                self.send(Method::DELETE, &loc.url(), None).await.map(|_| ())
            }
            ResourceKind::Network
            | ResourceKind::Subnetwork
            | ResourceKind::Router
            | ResourceKind::PrivateServiceRange
            | ResourceKind::AccessVm
            | ResourceKind::FirewallRule => self
                .call_and_wait(Method::DELETE, &loc.url(), None, compute)
                .await
                .map(|_| ()),
        };

        match result {
            // Already gone.
            Err(e) if e.message.starts_with("404") => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, record: &ResourceRecord) -> ProviderResult<bool> {
        let attrs = &record.attributes;
        let loc = self.locate(&record.id, attrs)?;

        match record.id.kind {
            ResourceKind::RouterNat => {
                let router = self.send_optional(Method::GET, &loc.url()).await?;
                Ok(router
                    .and_then(|r| r.get("nats").and_then(Value::as_array).cloned())
                    .unwrap_or_default()
                    .iter()
                    .any(|n| n.get("name").and_then(Value::as_str) == Some(record.id.name.as_str())))
            }
            ResourceKind::IamBinding => {
                let policy = self.get_policy(attr(attrs, "project")?).await?;
                Ok(has_member(&policy, attr(attrs, "role")?, attr(attrs, "member")?))
            }
            ResourceKind::PeeringConnection => {
                let number = self.project_number(attr(attrs, "project")?).await?;
                let url = format!(
                    "{}?network={}",
                    loc.url(),
                    network_link(&number, attr(attrs, "network")?)
                );
                let list = self.send(Method::GET, &url, None).await?;
                Ok(list
                    .get("connections")
                    .and_then(Value::as_array)
                    .is_some_and(|c| !c.is_empty()))
            }
            _ => Ok(self.send_optional(Method::GET, &loc.url()).await?.is_some()),
        }
    }

    fn provider_id(&self, id: &ResourceId, attrs: &Attributes) -> ProviderResult<String> {
        let loc = self.locate(id, attrs)?;
        Ok(match id.kind {
            ResourceKind::RouterNat | ResourceKind::IamBinding => format!("{}#{}", loc.path, id.name),
            _ => loc.path,
        })
    }
}

#[async_trait]
impl CloudProvider for GcpRestProvider {
    fn name(&self) -> &str {
        "gcp"
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<ObservedResource> {
        self.create_spec(resource).await?;
        let attributes = resource.attributes();
        let provider_id = self.provider_id(&resource.id, &attributes)?;
        info!(resource = %resource.id, %provider_id, "created");
        Ok(ObservedResource::new(provider_id, attributes))
    }

    async fn update(
        &self,
        resource: &Resource,
        record: &ResourceRecord,
        changes: &[AttributeChange],
    ) -> ProviderResult<ObservedResource> {
        self.update_spec(resource, changes).await?;
        info!(resource = %resource.id, "updated");
        Ok(ObservedResource::new(record.provider_id.clone(), resource.attributes()))
    }

    async fn delete(&self, record: &ResourceRecord) -> ProviderResult<()> {
        self.delete_record(record).await?;
        info!(resource = %record.id, "deleted");
        Ok(())
    }

    async fn read(&self, record: &ResourceRecord) -> ProviderResult<Option<ObservedResource>> {
        if self.exists(record).await? {
            Ok(Some(ObservedResource::new(
                record.provider_id.clone(),
                record.attributes.clone(),
            )))
        } else {
            Ok(None)
        }
    }
}

impl GcpRestProvider {
    /// Run a standard-SQL statement and wait for the job to complete.
    async fn query(&self, project: &str, sql: &str) -> ProviderResult<Value> {
        let base = format!("{}/projects/{}/queries", self.config.bigquery_endpoint, project);
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_WAIT_MS,
        });
        debug!(project, sql, "bigquery query");
        let mut result = self.send(Method::POST, &base, Some(&body)).await?;

        let deadline = Instant::now() + self.operation_timeout;
        while result.get("jobComplete").and_then(Value::as_bool) != Some(true) {
            if Instant::now() >= deadline {
                return Err(ProviderError::transient(format!(
                    "query did not complete within {}s",
                    self.operation_timeout.as_secs()
                )));
            }
            let job = result
                .pointer("/jobReference/jobId")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::transient("incomplete query without a job reference"))?;
            let mut url = format!("{}/{}?timeoutMs={}", base, job, QUERY_WAIT_MS);
            if let Some(location) = result.pointer("/jobReference/location").and_then(Value::as_str) {
                url.push_str(&format!("&location={}", location));
            }
            tokio::time::sleep(self.poll_interval).await;
            result = self.send(Method::GET, &url, None).await?;
        }

        if let Some(error) = result.pointer("/errors/0") {
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("error");
            let message = error.get("message").and_then(Value::as_str).unwrap_or("query failed");
            return Err(ProviderError::conflict(format!("{}: {}", reason, message)));
        }
        Ok(result)
    }
}

#[async_trait]
impl Warehouse for GcpRestProvider {
    async fn row_count(&self, table: &TableRef) -> ProviderResult<u64> {
        let sql = format!("SELECT COUNT(*) AS total FROM `{}`", table);
        let result = self.query(&table.project, &sql).await?;
        result
            .pointer("/rows/0/f/0/v")
            .and_then(Value::as_str)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ProviderError::conflict(format!("no row count in result for {}", table)))
    }

    async fn truncate(&self, table: &TableRef) -> ProviderResult<()> {
        let sql = format!("TRUNCATE TABLE `{}`", table);
        self.query(&table.project, &sql).await?;
        info!(%table, "truncated");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn attr<'a>(attrs: &'a Attributes, key: &str) -> ProviderResult<&'a str> {
    attrs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::conflict(format!("attribute '{}' is missing", key)))
}

fn network_link(project: &str, network: &str) -> String {
    format!("projects/{}/global/networks/{}", project, network)
}

/// `debian-cloud/debian-12` -> the image family link.
fn image_link(image: &str) -> String {
    match image.split_once('/') {
        Some((project, family)) => format!("projects/{}/global/images/family/{}", project, family),
        None => image.to_string(),
    }
}

/// `europe-west2-a` -> `europe-west2`.
fn zone_region(zone: &str) -> &str {
    zone.rsplit_once('-').map_or(zone, |(region, _)| region)
}

fn nat_body(attrs: &Attributes) -> Value {
    json!({
        "name": attrs.get("name"),
        "natIpAllocateOption": attrs.get("nat_ip_allocate_option"),
        "sourceSubnetworkIpRangesToNat": attrs.get("source_subnetwork_ip_ranges_to_nat"),
    })
}

fn backup_policy_body(attrs: &Attributes) -> Value {
    let policy = attrs.get("automated_backup_policy").cloned().unwrap_or(Value::Null);
    json!({
        "enabled": policy.get("enabled"),
        "weeklySchedule": {
            "daysOfWeek": policy.get("days_of_week"),
            "startTimes": [{ "hours": policy.get("start_hour") }],
        },
        "quantityBasedRetention": { "count": policy.get("retention_count") },
    })
}

fn firewall_body(attrs: &Attributes) -> ProviderResult<Value> {
    let allowed: Vec<Value> = attrs
        .get("allow")
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .map(|r| json!({ "IPProtocol": r.get("protocol"), "ports": r.get("ports") }))
                .collect()
        })
        .unwrap_or_default();
    Ok(json!({
        "name": attr(attrs, "name")?,
        "network": network_link(attr(attrs, "project")?, attr(attrs, "network")?),
        "direction": attrs.get("direction"),
        "priority": attrs.get("priority"),
        "allowed": allowed,
        "sourceRanges": attrs.get("source_ranges"),
        "targetTags": attrs.get("target_tags"),
    }))
}

fn is_compute_operation(value: &Value) -> bool {
    value.get("kind").and_then(Value::as_str) == Some("compute#operation")
}

fn is_pending_longrunning(value: &Value) -> bool {
    value
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|n| n.contains("operations/"))
        && value.get("metadata").is_some()
}

fn policy_bindings(policy: &mut Value) -> Option<&mut Vec<Value>> {
    if policy.get("bindings").is_none() {
        policy["bindings"] = json!([]);
    }
    policy.get_mut("bindings").and_then(Value::as_array_mut)
}

fn has_member(policy: &Value, role: &str, member: &str) -> bool {
    policy
        .get("bindings")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|b| b.get("role").and_then(Value::as_str) == Some(role))
        .filter_map(|b| b.get("members").and_then(Value::as_array))
        .flatten()
        .any(|m| m.as_str() == Some(member))
}

/// Add `member` to `role`; returns whether the policy changed.
fn add_member(policy: &mut Value, role: &str, member: &str) -> bool {
    if has_member(policy, role, member) {
        return false;
    }
    let Some(bindings) = policy_bindings(policy) else {
        return false;
    };
    let existing = bindings.iter_mut().find(|b| {
        b.get("role").and_then(Value::as_str) == Some(role) && b.get("condition").is_none()
    });
    match existing {
        Some(binding) => {
            if binding.get("members").is_none() {
                binding["members"] = json!([]);
            }
            if let Some(members) = binding.get_mut("members").and_then(Value::as_array_mut) {
                members.push(Value::from(member));
            }
        }
        None => bindings.push(json!({ "role": role, "members": [member] })),
    }
    true
}

/// Remove `member` from `role` only; returns whether the policy changed.
fn remove_member(policy: &mut Value, role: &str, member: &str) -> bool {
    if !has_member(policy, role, member) {
        return false;
    }
    let Some(bindings) = policy_bindings(policy) else {
        return false;
    };
    for binding in bindings.iter_mut() {
        if binding.get("role").and_then(Value::as_str) != Some(role) {
            continue;
        }
        if let Some(members) = binding.get_mut("members").and_then(Value::as_array_mut) {
            members.retain(|m| m.as_str() != Some(member));
        }
    }
    bindings.retain(|b| {
        b.get("members")
            .and_then(Value::as_array)
            .is_some_and(|m| !m.is_empty())
    });
    true
}

fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match body {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
}

fn error_status(body: &Value) -> &str {
    body.pointer("/error/status").and_then(Value::as_str).unwrap_or("")
}

fn error_reasons(body: &Value) -> Vec<&str> {
    body.pointer("/error/errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|e| e.get("reason").and_then(Value::as_str))
        .collect()
}

/// Map an HTTP failure to a failure kind.
///
/// Messages start with the status code so callers can recognise 404s.
fn classify_http(status: StatusCode, body: &Value) -> ProviderError {
    let api_status = error_status(body);
    let reasons = error_reasons(body);
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            FailureKind::PermissionOrQuota
        }
        _ if api_status == "RESOURCE_EXHAUSTED"
            || reasons.iter().any(|r| r.contains("quota") || r.contains("Quota")) =>
        {
            FailureKind::PermissionOrQuota
        }
        StatusCode::CONFLICT if api_status == "ABORTED" => FailureKind::Transient,
        StatusCode::CONFLICT => FailureKind::DeclarationConflict,
        StatusCode::NOT_FOUND | StatusCode::PRECONDITION_FAILED => FailureKind::Precondition,
        StatusCode::BAD_REQUEST
            if api_status == "FAILED_PRECONDITION"
                || reasons.iter().any(|r| *r == "resourceInUseByAnotherResource" || *r == "resourceNotReady") =>
        {
            FailureKind::Precondition
        }
        StatusCode::BAD_REQUEST => FailureKind::DeclarationConflict,
        s if s.is_server_error() => FailureKind::Transient,
        _ => FailureKind::DeclarationConflict,
    };
    ProviderError::new(kind, format!("{} {}", status.as_u16(), error_message(body)))
}

/// Map a `google.rpc.Status` (long-running operation error).
fn classify_status_error(error: &Value) -> ProviderError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(2);
    let kind = match code {
        // NOT_FOUND, FAILED_PRECONDITION
        5 | 9 => FailureKind::Precondition,
        // PERMISSION_DENIED, RESOURCE_EXHAUSTED, UNAUTHENTICATED
        7 | 8 | 16 => FailureKind::PermissionOrQuota,
        // INVALID_ARGUMENT, ALREADY_EXISTS, OUT_OF_RANGE
        3 | 6 | 11 => FailureKind::DeclarationConflict,
        _ => FailureKind::Transient,
    };
    let message = error.get("message").and_then(Value::as_str).unwrap_or("operation failed");
    ProviderError::new(kind, message.to_string())
}

/// Map the `error` of a finished Compute operation.
fn classify_compute_error(error: &Value) -> ProviderError {
    let first = error.pointer("/errors/0").cloned().unwrap_or(Value::Null);
    let code = first.get("code").and_then(Value::as_str).unwrap_or("");
    let message = first
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("operation failed")
        .to_string();
    let kind = match code {
        "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE" | "RESOURCE_NOT_READY" | "RESOURCE_NOT_FOUND" => {
            FailureKind::Precondition
        }
        c if c.contains("QUOTA") || c == "PERMISSION_DENIED" || c == "FORBIDDEN" => {
            FailureKind::PermissionOrQuota
        }
        "ALREADY_EXISTS" | "RESOURCE_ALREADY_EXISTS" | "INVALID_FIELD_VALUE" | "BAD_REQUEST" => {
            FailureKind::DeclarationConflict
        }
        _ => FailureKind::Transient,
    };
    ProviderError::new(kind, format!("{}: {}", code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http() {
        let quota = json!({"error": {"status": "RESOURCE_EXHAUSTED", "message": "quota"}});
        assert_eq!(
            classify_http(StatusCode::TOO_MANY_REQUESTS, &quota).kind,
            FailureKind::PermissionOrQuota
        );
        assert_eq!(
            classify_http(StatusCode::FORBIDDEN, &Value::Null).kind,
            FailureKind::PermissionOrQuota
        );

        let precondition = json!({"error": {"status": "FAILED_PRECONDITION", "message": "peering"}});
        let err = classify_http(StatusCode::BAD_REQUEST, &precondition);
        assert_eq!(err.kind, FailureKind::Precondition);
        assert_eq!(err.message, "400 peering");

        assert_eq!(
            classify_http(StatusCode::CONFLICT, &json!({"error": {"status": "ALREADY_EXISTS"}})).kind,
            FailureKind::DeclarationConflict
        );
        assert_eq!(
            classify_http(StatusCode::CONFLICT, &json!({"error": {"status": "ABORTED"}})).kind,
            FailureKind::Transient
        );
        assert_eq!(
            classify_http(StatusCode::SERVICE_UNAVAILABLE, &Value::Null).kind,
            FailureKind::Transient
        );
    }

    #[test]
    fn test_classify_operation_errors() {
        assert_eq!(
            classify_status_error(&json!({"code": 9, "message": "network not peered"})).kind,
            FailureKind::Precondition
        );
        let compute = json!({"errors": [{"code": "QUOTA_EXCEEDED", "message": "CPUS"}]});
        assert_eq!(classify_compute_error(&compute).kind, FailureKind::PermissionOrQuota);
    }

    #[test]
    fn test_add_and_remove_member() {
        let mut policy = json!({
            "etag": "BwX",
            "bindings": [
                {"role": "roles/bigquery.jobUser", "members": ["user:analyst@example.com"]},
            ],
        });
        let sa = "serviceAccount:vuln-access-vm@demo.iam.gserviceaccount.com";

        assert!(add_member(&mut policy, "roles/bigquery.jobUser", sa));
        assert!(!add_member(&mut policy, "roles/bigquery.jobUser", sa));
        assert!(add_member(&mut policy, "roles/alloydb.client", sa));
        assert!(has_member(&policy, "roles/alloydb.client", sa));

        assert!(remove_member(&mut policy, "roles/bigquery.jobUser", sa));
        assert!(has_member(&policy, "roles/bigquery.jobUser", "user:analyst@example.com"));
        assert!(has_member(&policy, "roles/alloydb.client", sa));
        assert_eq!(policy["etag"], "BwX");
    }

    #[test]
    fn test_remove_last_member_drops_binding() {
        let mut policy = json!({"bindings": [{"role": "roles/alloydb.client", "members": ["a"]}]});
        assert!(remove_member(&mut policy, "roles/alloydb.client", "a"));
        assert_eq!(policy["bindings"], json!([]));
    }

    #[test]
    fn test_links() {
        assert_eq!(zone_region("europe-west2-a"), "europe-west2");
        assert_eq!(
            image_link("debian-cloud/debian-12"),
            "projects/debian-cloud/global/images/family/debian-12"
        );
    }
}
