//! Managed database (AlloyDB) cluster and instance.

use serde::Serialize;
use serde_json::Value;

use super::{Declared, Dependency, ResourceKind};
use crate::error::{Error, Result};
use crate::secrets::SensitiveString;

/// Initial database user, as recorded in attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitialUser {
    pub user: String,
    /// Salted argon2id hash (PHC string) of the password. The password
    /// itself is never recorded.
    pub password_hash: String,
}

/// Automated backup policy of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomatedBackupPolicy {
    pub enabled: bool,
    pub days_of_week: Vec<String>,
    pub start_hour: u8,
    pub retention_count: u32,
}

/// The durable database unit: credentials, backups, network binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseCluster {
    pub name: String,
    pub project: String,
    pub location: String,
    pub network: String,
    pub initial_user: InitialUser,
    pub automated_backup_policy: AutomatedBackupPolicy,
    pub deletion_protection: bool,
    #[serde(skip)]
    pub initial_password: SensitiveString,
}

impl DatabaseCluster {
    /// Build the initial user entry for `password`.
    pub fn initial_user(user: impl Into<String>, password: &SensitiveString) -> Result<InitialUser> {
        let password_hash = password.salted_hash().map_err(|e| Error::InvalidVariable {
            name: "db_password".to_string(),
            message: format!("cannot hash password: {}", e),
        })?;
        Ok(InitialUser {
            user: user.into(),
            password_hash,
        })
    }
}

impl Declared for DatabaseCluster {
    const KIND: ResourceKind = ResourceKind::DatabaseCluster;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::Network, &self.network)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["location", "network"]
    }

    /// The recorded user matches when the declared password verifies
    /// against its hash; the salts never agree.
    fn matches_recorded(&self, field: &str, recorded: &Value, declared: &Value) -> bool {
        if field != "initial_user" {
            return recorded == declared;
        }
        let recorded_hash = recorded.get("password_hash").and_then(Value::as_str);
        recorded.get("user") == declared.get("user")
            && recorded_hash.is_some_and(|hash| self.initial_password.verify(hash))
    }
}

/// Compute unit attached to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseInstance {
    pub name: String,
    pub project: String,
    pub location: String,
    pub cluster: String,
    pub instance_type: String,
    pub cpu_count: u32,
    pub availability_type: String,
}

impl Declared for DatabaseInstance {
    const KIND: ResourceKind = ResourceKind::DatabaseInstance;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::DatabaseCluster, &self.cluster)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["location", "cluster", "instance_type"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ResourceSpec, UpdateMode};
    use serde_json::json;

    fn cluster(password: &str) -> DatabaseCluster {
        let password = SensitiveString::new(password);
        DatabaseCluster {
            name: "c".into(),
            project: "demo".into(),
            location: "europe-west2".into(),
            network: "vpc".into(),
            initial_user: DatabaseCluster::initial_user("postgres", &password).unwrap(),
            automated_backup_policy: AutomatedBackupPolicy {
                enabled: true,
                days_of_week: vec!["SUNDAY".into()],
                start_hour: 2,
                retention_count: 7,
            },
            deletion_protection: false,
            initial_password: password,
        }
    }

    #[test]
    fn test_attributes_never_contain_password() {
        let attrs = ResourceSpec::from(cluster("s3cr3t-value")).attributes();
        let rendered = serde_json::to_string(&attrs).unwrap();
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(!attrs.contains_key("initial_password"));
        assert!(rendered.contains("password_hash"));
    }

    #[test]
    fn test_recorded_hash_matches_only_same_password() {
        let recorded = ResourceSpec::from(cluster("one")).attributes();
        let same = ResourceSpec::from(cluster("one"));
        let other = ResourceSpec::from(cluster("two"));

        // Fresh salt per declaration.
        assert_ne!(recorded["initial_user"], same.attributes()["initial_user"]);
        assert!(same.matches_recorded(
            "initial_user",
            &recorded["initial_user"],
            &same.attributes()["initial_user"]
        ));
        assert!(!other.matches_recorded(
            "initial_user",
            &recorded["initial_user"],
            &other.attributes()["initial_user"]
        ));
    }

    #[test]
    fn test_password_change_is_visible_and_in_place() {
        let a = ResourceSpec::from(cluster("one")).attributes();
        let b = ResourceSpec::from(cluster("two")).attributes();
        assert_ne!(a["initial_user"], b["initial_user"]);

        let spec = ResourceSpec::from(cluster("two"));
        assert_eq!(
            spec.update_mode("initial_user", &a["initial_user"], &b["initial_user"]),
            UpdateMode::InPlace
        );
    }

    #[test]
    fn test_cpu_count_is_mutable() {
        let instance = DatabaseInstance {
            name: "i".into(),
            project: "demo".into(),
            location: "europe-west2".into(),
            cluster: "c".into(),
            instance_type: "PRIMARY".into(),
            cpu_count: 2,
            availability_type: "ZONAL".into(),
        };
        assert_eq!(
            instance.update_mode("cpu_count", &json!(2), &json!(4)),
            UpdateMode::InPlace
        );
        assert_eq!(
            instance.update_mode("instance_type", &json!("PRIMARY"), &json!("READ_POOL")),
            UpdateMode::Replace
        );
    }
}
