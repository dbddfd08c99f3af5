//! The fixed target topology.
//!
//! [`declare`] turns a set of [`Variables`] into the full [`Declaration`]:
//! every resource of the vulnerability-consolidation environment, in
//! declaration order, with explicit ordering hints where a reference alone
//! would not express the constraint:
//!
//! - the database cluster waits for the peering connection, because cluster
//!   creation against an unpeered network fails at the API;
//! - the access VM waits for the NAT gateway, because its startup script
//!   installs packages over outbound internet access.
//!
//! Nothing that governs reachability (external address, relay source range,
//! target tag) is derived from variables.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::resources::{
    AccessVm, ArchiveDataset, ArchiveTable, AutomatedBackupPolicy, DatabaseCluster,
    DatabaseInstance, FieldMode, FirewallAllow, FirewallRule, IamBinding, Network,
    PeeringConnection, PrivateServiceRange, Resource, ResourceId, ResourceKind, ResourceSpec,
    Router, RouterNat, SchemaField, ServiceAccount, Subnetwork, TimePartitioning,
};
use crate::variables::Variables;

pub const NETWORK_NAME: &str = "vuln-vpc";
pub const SUBNET_NAME: &str = "vuln-subnet";
pub const SUBNET_CIDR: &str = "10.10.0.0/24";
pub const ROUTER_NAME: &str = "vuln-router";
pub const NAT_NAME: &str = "vuln-nat";
pub const PSA_RANGE_NAME: &str = "alloydb-psa-range";
pub const PSA_PREFIX_LENGTH: u8 = 16;
pub const PEERING_NAME: &str = "servicenetworking";
pub const SERVICE_NETWORKING: &str = "servicenetworking.googleapis.com";
pub const CLUSTER_NAME: &str = "vuln-consolidation-cluster";
pub const INSTANCE_NAME: &str = "vuln-consolidation-primary";
pub const DB_USER: &str = "postgres";
pub const DB_NAME: &str = "postgres";
pub const SERVICE_ACCOUNT_ID: &str = "vuln-access-vm";
pub const VM_NAME: &str = "vuln-access-vm";
pub const VM_TAG: &str = "iap-ssh";
pub const FIREWALL_NAME: &str = "allow-iap-ssh";
/// Source range of the identity-aware proxy TCP forwarding relay.
pub const IAP_RELAY_RANGE: &str = "35.235.240.0/20";
pub const DATASET_ID: &str = "vulnerability_archive";
pub const TABLE_ID: &str = "raw_scan_logs";

/// The only roles granted to the access VM identity.
pub const GRANTED_ROLES: [(&str, &str); 3] = [
    ("access-vm-alloydb-client", "roles/alloydb.client"),
    ("access-vm-bq-data-editor", "roles/bigquery.dataEditor"),
    ("access-vm-bq-job-user", "roles/bigquery.jobUser"),
];

const VM_STARTUP_SCRIPT: &str = "#!/bin/bash\napt-get update\napt-get install -y postgresql-client\n";

/// Operator conveniences printed after apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outputs {
    /// Command opening an SSH session to the access VM through the IAP relay.
    pub iap_tunnel_command: String,
    /// Client command for reaching the database once logged into the VM.
    pub db_connection_command: String,
}

impl Outputs {
    pub fn for_variables(vars: &Variables) -> Self {
        Self {
            iap_tunnel_command: format!(
                "gcloud compute ssh {} --zone {} --tunnel-through-iap --project {}",
                VM_NAME,
                vars.zone(),
                vars.project_id
            ),
            db_connection_command: format!("psql -h {} -U {} -d {}", CLUSTER_NAME, DB_USER, DB_NAME),
        }
    }

    /// Outputs as name/value pairs.
    pub fn entries(&self) -> [(&'static str, &str); 2] {
        [
            ("iap_tunnel_command", self.iap_tunnel_command.as_str()),
            ("db_connection_command", self.db_connection_command.as_str()),
        ]
    }

    /// Look up one output by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries()
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// All declared resources plus outputs.
#[derive(Debug, Clone)]
pub struct Declaration {
    resources: IndexMap<ResourceId, Resource>,
    pub outputs: Outputs,
}

impl Declaration {
    /// Assemble a declaration, checking every reference resolves.
    pub fn new(resources: Vec<Resource>, outputs: Outputs) -> Result<Self> {
        let mut map = IndexMap::with_capacity(resources.len());
        for resource in resources {
            if map.contains_key(&resource.id) {
                return Err(Error::Internal(format!(
                    "resource '{}' declared twice",
                    resource.id
                )));
            }
            map.insert(resource.id.clone(), resource);
        }

        for resource in map.values() {
            for dep in resource.dependencies() {
                if !map.contains_key(&dep.target) {
                    return Err(Error::UnknownReference {
                        from: resource.id.clone(),
                        to: dep.target,
                    });
                }
            }
        }

        Ok(Self {
            resources: map,
            outputs,
        })
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources of one kind.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.values().filter(move |r| r.id.kind == kind)
    }

    /// Drop a resource (and any explicit hints pointing at it).
    ///
    /// Used to model removing a declaration; implicit references to the
    /// removed resource make the result invalid.
    pub fn without(mut self, id: &ResourceId) -> Result<Self> {
        self.resources.shift_remove(id);
        let resources = self
            .resources
            .into_values()
            .map(|mut r| {
                r.depends_on.retain(|d| d != id);
                r
            })
            .collect();
        Declaration::new(resources, self.outputs)
    }

    /// Replace the spec of an existing resource.
    pub fn with_spec(mut self, spec: ResourceSpec) -> Result<Self> {
        let id = spec.id();
        match self.resources.get_mut(&id) {
            Some(resource) => resource.spec = spec,
            None => return Err(Error::Internal(format!("resource '{}' is not declared", id))),
        }
        let resources = self.resources.into_values().collect();
        Declaration::new(resources, self.outputs)
    }
}

/// Build the full topology for `vars`.
pub fn declare(vars: &Variables) -> Result<Declaration> {
    let project = vars.project_id.as_str();
    let region = vars.region.as_str();

    let mut resources = Vec::new();

    // Network fabric.
    resources.push(Resource::new(
        Network {
            name: NETWORK_NAME.into(),
            project: project.into(),
            auto_create_subnetworks: false,
            routing_mode: "REGIONAL".into(),
        }
        .into(),
    ));
    resources.push(Resource::new(
        Subnetwork {
            name: SUBNET_NAME.into(),
            project: project.into(),
            region: region.into(),
            network: NETWORK_NAME.into(),
            ip_cidr_range: SUBNET_CIDR.into(),
            private_ip_google_access: true,
        }
        .into(),
    ));
    resources.push(Resource::new(
        Router {
            name: ROUTER_NAME.into(),
            project: project.into(),
            region: region.into(),
            network: NETWORK_NAME.into(),
        }
        .into(),
    ));
    resources.push(Resource::new(
        RouterNat {
            name: NAT_NAME.into(),
            project: project.into(),
            region: region.into(),
            router: ROUTER_NAME.into(),
            nat_ip_allocate_option: "AUTO_ONLY".into(),
            source_subnetwork_ip_ranges_to_nat: "ALL_SUBNETWORKS_ALL_IP_RANGES".into(),
        }
        .into(),
    ));

    // Private service access.
    resources.push(Resource::new(
        PrivateServiceRange {
            name: PSA_RANGE_NAME.into(),
            project: project.into(),
            network: NETWORK_NAME.into(),
            purpose: "VPC_PEERING".into(),
            address_type: "INTERNAL".into(),
            prefix_length: PSA_PREFIX_LENGTH,
        }
        .into(),
    ));
    resources.push(Resource::new(
        PeeringConnection {
            name: PEERING_NAME.into(),
            project: project.into(),
            network: NETWORK_NAME.into(),
            service: SERVICE_NETWORKING.into(),
            reserved_peering_ranges: vec![PSA_RANGE_NAME.into()],
        }
        .into(),
    ));

    // Database.
    let peering_id = ResourceId::new(ResourceKind::PeeringConnection, PEERING_NAME);
    resources.push(
        Resource::new(
            DatabaseCluster {
                name: CLUSTER_NAME.into(),
                project: project.into(),
                location: region.into(),
                network: NETWORK_NAME.into(),
                initial_user: DatabaseCluster::initial_user(DB_USER, &vars.db_password)?,
                automated_backup_policy: AutomatedBackupPolicy {
                    enabled: true,
                    days_of_week: vec!["SUNDAY".into()],
                    start_hour: 2,
                    retention_count: 7,
                },
                deletion_protection: false,
                initial_password: vars.db_password.clone(),
            }
            .into(),
        )
        .depends_on(peering_id),
    );
    resources.push(Resource::new(
        DatabaseInstance {
            name: INSTANCE_NAME.into(),
            project: project.into(),
            location: region.into(),
            cluster: CLUSTER_NAME.into(),
            instance_type: "PRIMARY".into(),
            cpu_count: 2,
            availability_type: "ZONAL".into(),
        }
        .into(),
    ));

    // Access VM and identity.
    let service_account = ServiceAccount::new(SERVICE_ACCOUNT_ID, project, "Vulnerability access VM");
    let member = service_account.member();
    let email = service_account.email.clone();
    resources.push(Resource::new(service_account.into()));
    for (name, role) in GRANTED_ROLES {
        resources.push(Resource::new(
            IamBinding {
                name: name.into(),
                project: project.into(),
                role: role.into(),
                member: member.clone(),
                service_account: Some(SERVICE_ACCOUNT_ID.into()),
            }
            .into(),
        ));
    }
    resources.push(
        Resource::new(
            AccessVm {
                name: VM_NAME.into(),
                project: project.into(),
                zone: vars.zone(),
                machine_type: "e2-small".into(),
                image: "debian-cloud/debian-12".into(),
                subnetwork: SUBNET_NAME.into(),
                service_account: email,
                scopes: vec!["https://www.googleapis.com/auth/cloud-platform".into()],
                tags: vec![VM_TAG.into()],
                external_ip: false,
                startup_script: VM_STARTUP_SCRIPT.into(),
            }
            .into(),
        )
        .depends_on(ResourceId::new(ResourceKind::RouterNat, NAT_NAME)),
    );
    resources.push(Resource::new(
        FirewallRule {
            name: FIREWALL_NAME.into(),
            project: project.into(),
            network: NETWORK_NAME.into(),
            direction: "INGRESS".into(),
            priority: 1000,
            allow: vec![FirewallAllow {
                protocol: "tcp".into(),
                ports: vec!["22".into()],
            }],
            source_ranges: vec![IAP_RELAY_RANGE.into()],
            target_tags: vec![VM_TAG.into()],
        }
        .into(),
    ));

    // Archival warehouse.
    resources.push(Resource::new(
        ArchiveDataset {
            dataset_id: DATASET_ID.into(),
            project: project.into(),
            location: region.into(),
            delete_contents_on_destroy: true,
        }
        .into(),
    ));
    resources.push(Resource::new(
        ArchiveTable {
            table_id: TABLE_ID.into(),
            project: project.into(),
            dataset: DATASET_ID.into(),
            schema: archive_schema(),
            time_partitioning: TimePartitioning {
                partition_type: "DAY".into(),
                field: "ingestion_time".into(),
            },
            deletion_protection: false,
        }
        .into(),
    ));

    Declaration::new(resources, Outputs::for_variables(vars))
}

/// Schema of the raw scan archive table.
pub fn archive_schema() -> Vec<SchemaField> {
    vec![
        SchemaField::new("asset_id", "STRING", FieldMode::Required),
        SchemaField::new("scan_date", "TIMESTAMP", FieldMode::Required),
        SchemaField::new("cve_id", "STRING", FieldMode::Required),
        SchemaField::new("findings_json", "JSON", FieldMode::Nullable),
        SchemaField::new("ingestion_time", "TIMESTAMP", FieldMode::Required),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn demo() -> Variables {
        Variables::new("demo", "europe-west2", "x").unwrap()
    }

    #[test]
    fn test_declares_every_resource_once() {
        let decl = declare(&demo()).unwrap();
        assert_eq!(decl.len(), 16);
        for kind in ResourceKind::ALL {
            assert!(decl.of_kind(kind).count() >= 1, "missing {}", kind);
        }
        assert_eq!(decl.of_kind(ResourceKind::IamBinding).count(), 3);
    }

    #[test]
    fn test_outputs_for_demo() {
        let outputs = declare(&demo()).unwrap().outputs;
        assert_eq!(
            outputs.db_connection_command,
            "psql -h vuln-consolidation-cluster -U postgres -d postgres"
        );
        assert_eq!(
            outputs.iap_tunnel_command,
            "gcloud compute ssh vuln-access-vm --zone europe-west2-a --tunnel-through-iap --project demo"
        );
        assert_eq!(outputs.get("db_connection_command"), Some(outputs.db_connection_command.as_str()));
        assert_eq!(outputs.get("nope"), None);
    }

    #[test]
    fn test_cluster_waits_for_peering() {
        let decl = declare(&demo()).unwrap();
        let cluster = decl
            .get(&ResourceId::new(ResourceKind::DatabaseCluster, CLUSTER_NAME))
            .unwrap();
        assert!(cluster
            .depends_on
            .contains(&ResourceId::new(ResourceKind::PeeringConnection, PEERING_NAME)));
    }

    #[test]
    fn test_schema_is_wire_exact() {
        let value = serde_json::to_value(archive_schema()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"name": "asset_id", "type": "STRING", "mode": "REQUIRED"},
                {"name": "scan_date", "type": "TIMESTAMP", "mode": "REQUIRED"},
                {"name": "cve_id", "type": "STRING", "mode": "REQUIRED"},
                {"name": "findings_json", "type": "JSON", "mode": "NULLABLE"},
                {"name": "ingestion_time", "type": "TIMESTAMP", "mode": "REQUIRED"},
            ])
        );
    }

    #[test]
    fn test_without_rejects_dangling_reference() {
        let decl = declare(&demo()).unwrap();
        let err = decl
            .without(&ResourceId::new(ResourceKind::Network, NETWORK_NAME))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownReference { .. }));
    }

    #[test]
    fn test_without_iam_binding_is_valid() {
        let decl = declare(&demo())
            .unwrap()
            .without(&ResourceId::new(ResourceKind::IamBinding, "access-vm-bq-job-user"))
            .unwrap();
        assert_eq!(decl.of_kind(ResourceKind::IamBinding).count(), 2);
    }
}
