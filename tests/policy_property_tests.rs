//! Property-based tests: access policy holds for every accepted set of
//! variables.

use proptest::prelude::*;
use vulnstack::prelude::*;
use vulnstack::topology::{FIREWALL_NAME, IAP_RELAY_RANGE, VM_NAME, VM_TAG};

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Strategy for generating valid project ids
fn project_id() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,27}[a-z0-9]").unwrap()
}

/// Strategy for generating region names
fn region() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("europe-west2".to_string()),
        Just("us-central1".to_string()),
        prop::string::string_regex("[a-z]{2,8}-[a-z]{3,9}[1-9]").unwrap(),
    ]
}

/// Strategy for generating passwords, including hostile ones
fn password() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9]{1,40}",
        "\\PC{1,30}",
        Just("0.0.0.0/0".to_string()),
        Just("true".to_string()),
    ]
}

fn declared(project: &str, region: &str, password: &str) -> Declaration {
    let vars = Variables::new(project, region, password).unwrap();
    declare(&vars).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_access_vm_never_has_public_address(
        project in project_id(),
        region in region(),
        password in password(),
    ) {
        let decl = declared(&project, &region, &password);
        let vm = decl.get(&ResourceId::new(ResourceKind::AccessVm, VM_NAME)).unwrap();
        match &vm.spec {
            ResourceSpec::AccessVm(vm) => prop_assert!(!vm.external_ip),
            other => prop_assert!(false, "unexpected spec {:?}", other.kind()),
        }
    }

    #[test]
    fn prop_firewall_source_is_exactly_the_relay_range(
        project in project_id(),
        region in region(),
        password in password(),
    ) {
        let decl = declared(&project, &region, &password);
        let rule = decl.get(&ResourceId::new(ResourceKind::FirewallRule, FIREWALL_NAME)).unwrap();
        match &rule.spec {
            ResourceSpec::FirewallRule(rule) => {
                prop_assert_eq!(&rule.source_ranges, &vec![IAP_RELAY_RANGE.to_string()]);
                prop_assert_eq!(&rule.target_tags, &vec![VM_TAG.to_string()]);
            }
            other => prop_assert!(false, "unexpected spec {:?}", other.kind()),
        }
    }

    #[test]
    fn prop_declaration_passes_policy(
        project in project_id(),
        region in region(),
        password in password(),
    ) {
        let decl = declared(&project, &region, &password);
        prop_assert!(policy::violations(&decl).is_empty());
        prop_assert_eq!(decl.len(), 16);
    }

    #[test]
    fn prop_outputs_follow_variables(
        project in project_id(),
        region in region(),
    ) {
        let decl = declared(&project, &region, "x");
        prop_assert_eq!(
            decl.outputs.db_connection_command.as_str(),
            "psql -h vuln-consolidation-cluster -U postgres -d postgres"
        );
        let zone_flag = format!("--zone {}-a ", region);
        prop_assert!(decl.outputs.iap_tunnel_command.contains(&zone_flag));
        prop_assert!(decl.outputs.iap_tunnel_command.ends_with(&project));
    }
}

#[test]
fn test_policy_rejects_public_vm() {
    let decl = declared("demo", "europe-west2", "x");
    let id = ResourceId::new(ResourceKind::AccessVm, VM_NAME);
    let mut spec = decl.get(&id).unwrap().spec.clone();
    if let ResourceSpec::AccessVm(vm) = &mut spec {
        vm.external_ip = true;
    }
    let decl = decl.with_spec(spec).unwrap();

    let err = policy::check(&decl).unwrap_err();
    assert!(matches!(err, Error::PolicyViolation(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_policy_rejects_widened_firewall() {
    let decl = declared("demo", "europe-west2", "x");
    let id = ResourceId::new(ResourceKind::FirewallRule, FIREWALL_NAME);
    let mut spec = decl.get(&id).unwrap().spec.clone();
    if let ResourceSpec::FirewallRule(rule) = &mut spec {
        rule.source_ranges = vec!["0.0.0.0/0".to_string()];
    }
    let decl = decl.with_spec(spec).unwrap();

    let violations = policy::violations(&decl);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("0.0.0.0/0"));
}
