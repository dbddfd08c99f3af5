//! Service account and project-level IAM grants.

use serde::Serialize;

use super::{Declared, Dependency, ResourceKind};

/// Identity attached to the access VM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceAccount {
    pub account_id: String,
    pub project: String,
    pub display_name: String,
    pub email: String,
}

impl ServiceAccount {
    pub fn new(
        account_id: impl Into<String>,
        project: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let account_id = account_id.into();
        let project = project.into();
        let email = format!("{}@{}.iam.gserviceaccount.com", account_id, project);
        Self {
            account_id,
            project,
            display_name: display_name.into(),
            email,
        }
    }

    /// IAM member string for this account.
    pub fn member(&self) -> String {
        format!("serviceAccount:{}", self.email)
    }
}

impl Declared for ServiceAccount {
    const KIND: ResourceKind = ResourceKind::ServiceAccount;

    fn name(&self) -> &str {
        &self.account_id
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["account_id", "email"]
    }
}

/// One role granted to one member at project scope.
///
/// Grants are additive: applying adds exactly this pair to the project
/// policy, deleting removes exactly this pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IamBinding {
    pub name: String,
    pub project: String,
    pub role: String,
    pub member: String,
    /// Service account the member belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

impl Declared for IamBinding {
    const KIND: ResourceKind = ResourceKind::IamBinding;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        self.service_account
            .iter()
            .map(|sa| Dependency::identity(ResourceKind::ServiceAccount, sa))
            .collect()
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["role", "member", "service_account"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::EdgeKind;

    #[test]
    fn test_service_account_email_and_member() {
        let sa = ServiceAccount::new("vuln-access-vm", "demo", "Access VM");
        assert_eq!(sa.email, "vuln-access-vm@demo.iam.gserviceaccount.com");
        assert_eq!(
            sa.member(),
            "serviceAccount:vuln-access-vm@demo.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn test_binding_refers_to_account_by_identity() {
        let binding = IamBinding {
            name: "b".into(),
            project: "demo".into(),
            role: "roles/alloydb.client".into(),
            member: "serviceAccount:x@demo.iam.gserviceaccount.com".into(),
            service_account: Some("x".into()),
        };
        let deps = binding.references();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, EdgeKind::Identity);
    }
}
