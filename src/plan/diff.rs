//! Attribute-level diffs between recorded and declared resources.

use serde::Serialize;
use serde_json::Value;

use crate::resources::{Attributes, ResourceSpec, UpdateMode};
use crate::secrets::is_sensitive_field_name;

/// One changed top-level attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// Converging this change needs the object replaced.
    pub forces_replacement: bool,
    /// Values must not be rendered.
    pub sensitive: bool,
}

impl AttributeChange {
    /// Whether the attribute was added by the declaration.
    pub fn is_addition(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }
}

/// Compare the recorded attributes of a resource against its declared spec.
///
/// Attributes are compared at the top level; nested objects change as a
/// whole. Keys present only in the recorded attributes count as removed.
pub fn diff_attributes(spec: &ResourceSpec, recorded: &Attributes) -> Vec<AttributeChange> {
    let declared = spec.attributes();
    let mut changes = Vec::new();

    for (key, new) in &declared {
        let old = recorded.get(key);
        if old.is_some_and(|old| spec.matches_recorded(key, old, new)) {
            continue;
        }
        let forces_replacement = match old {
            Some(old) => spec.update_mode(key, old, new) == UpdateMode::Replace,
            None => spec.update_mode(key, &Value::Null, new) == UpdateMode::Replace,
        };
        changes.push(AttributeChange {
            path: key.clone(),
            old: old.cloned(),
            new: Some(new.clone()),
            forces_replacement,
            sensitive: is_sensitive_value(key, new) || old.is_some_and(|o| is_sensitive_value(key, o)),
        });
    }

    for (key, old) in recorded {
        if declared.contains_key(key) {
            continue;
        }
        changes.push(AttributeChange {
            path: key.clone(),
            old: Some(old.clone()),
            new: None,
            forces_replacement: spec.update_mode(key, old, &Value::Null) == UpdateMode::Replace,
            sensitive: is_sensitive_value(key, old),
        });
    }

    changes
}

/// Whether an attribute (or anything nested in it) is named like a secret.
fn is_sensitive_value(key: &str, value: &Value) -> bool {
    if is_sensitive_field_name(key) {
        return true;
    }
    match value {
        Value::Object(map) => map.iter().any(|(k, v)| is_sensitive_value(k, v)),
        Value::Array(items) => items.iter().any(|v| is_sensitive_value("", v)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::DatabaseInstance;
    use crate::topology::{declare, CLUSTER_NAME};
    use crate::resources::{ResourceId, ResourceKind};
    use crate::variables::Variables;
    use serde_json::json;

    fn instance(cpu_count: u32) -> ResourceSpec {
        DatabaseInstance {
            name: "primary".into(),
            project: "demo".into(),
            location: "europe-west2".into(),
            cluster: "cluster".into(),
            instance_type: "PRIMARY".into(),
            cpu_count,
            availability_type: "ZONAL".into(),
        }
        .into()
    }

    #[test]
    fn test_no_changes() {
        let spec = instance(2);
        assert!(diff_attributes(&spec, &spec.attributes()).is_empty());
    }

    #[test]
    fn test_cpu_count_is_in_place() {
        let recorded = instance(2).attributes();
        let changes = diff_attributes(&instance(4), &recorded);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "cpu_count");
        assert_eq!(changes[0].old, Some(json!(2)));
        assert_eq!(changes[0].new, Some(json!(4)));
        assert!(!changes[0].forces_replacement);
        assert!(!changes[0].sensitive);
    }

    #[test]
    fn test_immutable_field_forces_replacement() {
        let mut recorded = instance(2).attributes();
        recorded.insert("instance_type".into(), json!("READ_POOL"));
        let changes = diff_attributes(&instance(2), &recorded);
        assert!(changes[0].forces_replacement);
    }

    #[test]
    fn test_removed_attribute_reported() {
        let mut recorded = instance(2).attributes();
        recorded.insert("labels".into(), json!({"team": "sec"}));
        let changes = diff_attributes(&instance(2), &recorded);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new, None);
        assert!(!changes[0].is_addition());
    }

    #[test]
    fn test_password_change_is_sensitive() {
        let before = declare(&Variables::new("demo", "europe-west2", "one").unwrap()).unwrap();
        let after = declare(&Variables::new("demo", "europe-west2", "two").unwrap()).unwrap();
        let id = ResourceId::new(ResourceKind::DatabaseCluster, CLUSTER_NAME);

        let recorded = before.get(&id).unwrap().attributes();
        let changes = diff_attributes(&after.get(&id).unwrap().spec, &recorded);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "initial_user");
        assert!(changes[0].sensitive);
        assert!(!changes[0].forces_replacement);
    }
}
