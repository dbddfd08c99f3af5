//! Policy checks run against a declaration before anything is planned.
//!
//! - least privilege: every IAM grant is one of the allow-listed roles and
//!   never a primitive role;
//! - network isolation: the access VM has no external address, the firewall
//!   admits only the IAP relay range and selects the VM by tag;
//! - ordering: the database cluster carries an explicit edge on the peering
//!   connection and the VM on the NAT gateway.

use tracing::debug;

use crate::error::{Error, Result};
use crate::resources::{ResourceId, ResourceKind, ResourceSpec};
use crate::topology::{Declaration, GRANTED_ROLES, IAP_RELAY_RANGE};

const PRIMITIVE_ROLES: [&str; 3] = ["roles/owner", "roles/editor", "roles/viewer"];

/// Collect every policy violation in `decl`.
pub fn violations(decl: &Declaration) -> Vec<String> {
    let mut found = Vec::new();
    let mut vm_tags: Vec<&String> = Vec::new();

    for resource in decl.iter() {
        match &resource.spec {
            ResourceSpec::IamBinding(binding) => {
                if PRIMITIVE_ROLES.contains(&binding.role.as_str()) {
                    found.push(format!(
                        "{}: primitive role '{}' is not allowed",
                        resource.id, binding.role
                    ));
                } else if !GRANTED_ROLES.iter().any(|(_, role)| *role == binding.role) {
                    found.push(format!(
                        "{}: role '{}' is outside the least-privilege allow-list",
                        resource.id, binding.role
                    ));
                }
                if !binding.member.starts_with("serviceAccount:") {
                    found.push(format!(
                        "{}: member '{}' is not a service account",
                        resource.id, binding.member
                    ));
                }
            }
            ResourceSpec::AccessVm(vm) => {
                if vm.external_ip {
                    found.push(format!("{}: external IP address is not allowed", resource.id));
                }
                vm_tags.extend(vm.tags.iter());
            }
            ResourceSpec::FirewallRule(rule) => {
                if rule.source_ranges != [IAP_RELAY_RANGE] {
                    found.push(format!(
                        "{}: source ranges must be exactly [{}], got [{}]",
                        resource.id,
                        IAP_RELAY_RANGE,
                        rule.source_ranges.join(", ")
                    ));
                }
                if rule.target_tags.is_empty() {
                    found.push(format!("{}: rule must select targets by tag", resource.id));
                }
            }
            ResourceSpec::DatabaseCluster(_) => {
                let waits_for_peering = resource
                    .depends_on
                    .iter()
                    .any(|d| d.kind == ResourceKind::PeeringConnection);
                if !waits_for_peering {
                    found.push(format!(
                        "{}: cluster must depend on the peering connection",
                        resource.id
                    ));
                }
            }
            _ => {}
        }
    }

    for resource in decl.of_kind(ResourceKind::FirewallRule) {
        if let ResourceSpec::FirewallRule(rule) = &resource.spec {
            if !rule.target_tags.iter().any(|t| vm_tags.contains(&t)) {
                found.push(format!(
                    "{}: target tags [{}] match no access VM",
                    resource.id,
                    rule.target_tags.join(", ")
                ));
            }
        }
    }

    for resource in decl.of_kind(ResourceKind::AccessVm) {
        let nat_edge = resource.depends_on.iter().any(|d| d.kind == ResourceKind::RouterNat);
        if !nat_edge {
            found.push(format!(
                "{}: access VM must be created after the NAT gateway",
                resource.id
            ));
        }
    }

    found
}

/// Fail if `decl` violates any policy.
pub fn check(decl: &Declaration) -> Result<()> {
    let found = violations(decl);
    if found.is_empty() {
        debug!(resources = decl.len(), "declaration passed policy checks");
        Ok(())
    } else {
        Err(Error::PolicyViolation(found))
    }
}

/// Resources whose deletion would revoke access, for operator messaging.
pub fn access_critical(id: &ResourceId) -> bool {
    matches!(
        id.kind,
        ResourceKind::IamBinding | ResourceKind::FirewallRule | ResourceKind::ServiceAccount
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Resource, ResourceSpec};
    use crate::topology::{declare, FIREWALL_NAME, VM_NAME};
    use crate::variables::Variables;

    fn decl() -> Declaration {
        declare(&Variables::new("demo", "europe-west2", "x").unwrap()).unwrap()
    }

    fn modify(
        decl: Declaration,
        kind: ResourceKind,
        name: &str,
        f: impl FnOnce(&mut ResourceSpec),
    ) -> Declaration {
        let mut spec = decl
            .get(&ResourceId::new(kind, name))
            .map(|r: &Resource| r.spec.clone())
            .unwrap();
        f(&mut spec);
        decl.with_spec(spec).unwrap()
    }

    #[test]
    fn test_declared_topology_passes() {
        assert!(check(&decl()).is_ok());
    }

    #[test]
    fn test_public_ip_rejected() {
        let d = modify(decl(), ResourceKind::AccessVm, VM_NAME, |spec| {
            if let ResourceSpec::AccessVm(vm) = spec {
                vm.external_ip = true;
            }
        });
        let v = violations(&d);
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("external IP"));
    }

    #[test]
    fn test_broad_source_range_rejected() {
        let d = modify(decl(), ResourceKind::FirewallRule, FIREWALL_NAME, |spec| {
            if let ResourceSpec::FirewallRule(rule) = spec {
                rule.source_ranges.push("0.0.0.0/0".into());
            }
        });
        assert!(matches!(check(&d), Err(Error::PolicyViolation(_))));
    }

    #[test]
    fn test_primitive_role_rejected() {
        let d = modify(decl(), ResourceKind::IamBinding, "access-vm-bq-job-user", |spec| {
            if let ResourceSpec::IamBinding(b) = spec {
                b.role = "roles/editor".into();
            }
        });
        let v = violations(&d);
        assert!(v.iter().any(|m| m.contains("primitive role")));
    }

    #[test]
    fn test_untagged_firewall_target_rejected() {
        let d = modify(decl(), ResourceKind::FirewallRule, FIREWALL_NAME, |spec| {
            if let ResourceSpec::FirewallRule(rule) = spec {
                rule.target_tags = vec!["web".into()];
            }
        });
        let v = violations(&d);
        assert!(v.iter().any(|m| m.contains("match no access VM")));
    }
}
