//! Access VM and the firewall rule that admits the IAP relay to it.
//!
//! The VM never gets an external address. Reachability is granted by tag:
//! the firewall selects targets by network tag rather than by referencing
//! the instance, so "who can reach" stays decoupled from "which VM".

use serde::Serialize;

use super::{Declared, Dependency, ResourceKind};

/// Compute instance used as the bastion for database access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessVm {
    pub name: String,
    pub project: String,
    pub zone: String,
    pub machine_type: String,
    pub image: String,
    pub subnetwork: String,
    /// Email of the attached service account.
    pub service_account: String,
    pub scopes: Vec<String>,
    pub tags: Vec<String>,
    pub external_ip: bool,
    pub startup_script: String,
}

impl AccessVm {
    /// Account id of the attached service account.
    pub fn service_account_id(&self) -> &str {
        self.service_account
            .split_once('@')
            .map_or(self.service_account.as_str(), |(id, _)| id)
    }
}

impl Declared for AccessVm {
    const KIND: ResourceKind = ResourceKind::AccessVm;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![
            Dependency::reference(ResourceKind::Subnetwork, &self.subnetwork),
            Dependency::identity(ResourceKind::ServiceAccount, self.service_account_id()),
        ]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["zone", "image", "subnetwork", "external_ip"]
    }
}

/// Protocol/ports pair admitted by a firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallAllow {
    pub protocol: String,
    pub ports: Vec<String>,
}

/// Ingress allow-rule selecting targets by tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirewallRule {
    pub name: String,
    pub project: String,
    pub network: String,
    pub direction: String,
    pub priority: u32,
    pub allow: Vec<FirewallAllow>,
    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

impl Declared for FirewallRule {
    const KIND: ResourceKind = ResourceKind::FirewallRule;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::Network, &self.network)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["network", "direction"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{EdgeKind, UpdateMode};
    use serde_json::json;

    fn vm() -> AccessVm {
        AccessVm {
            name: "vm".into(),
            project: "demo".into(),
            zone: "europe-west2-a".into(),
            machine_type: "e2-small".into(),
            image: "debian-cloud/debian-12".into(),
            subnetwork: "subnet".into(),
            service_account: "vm-sa@demo.iam.gserviceaccount.com".into(),
            scopes: vec!["https://www.googleapis.com/auth/cloud-platform".into()],
            tags: vec!["iap-ssh".into()],
            external_ip: false,
            startup_script: "true".into(),
        }
    }

    #[test]
    fn test_vm_orders_after_subnet_and_identity() {
        let deps = vm().references();
        assert_eq!(deps[0].kind, EdgeKind::Reference);
        assert_eq!(deps[1].kind, EdgeKind::Identity);
        assert_eq!(deps[1].target.to_string(), "service_account/vm-sa");
    }

    #[test]
    fn test_machine_type_updates_in_place() {
        assert_eq!(
            vm().update_mode("machine_type", &json!("e2-small"), &json!("e2-medium")),
            UpdateMode::InPlace
        );
        assert_eq!(
            vm().update_mode("zone", &json!("a"), &json!("b")),
            UpdateMode::Replace
        );
    }
}
