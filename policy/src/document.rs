//! Export and parse of environment policy documents.
//!
//! The storage backend for documents is not part of the core; this module
//! only fixes the JSON shape and the structural rules every document must
//! satisfy, so that exporting a policy and parsing it back yields an
//! equivalent tree.

use crate::group_id::valid_component;
use crate::policy::{ConstraintSet, EnvironmentPolicy};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("malformed policy document: {0}")]
    InvalidDocument(String),

    #[error("policy not available: {0}")]
    Unavailable(String),
}

impl EnvironmentPolicy {
    /// Parses and validates a policy document.
    pub fn from_json(document: &str) -> Result<EnvironmentPolicy, PolicyError> {
        let policy: EnvironmentPolicy = serde_json::from_str(document)
            .map_err(|e| PolicyError::InvalidDocument(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Serializes the policy as a document that [`Self::from_json`] accepts.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        serde_json::to_string_pretty(self).map_err(|e| PolicyError::InvalidDocument(e.to_string()))
    }

    /// Checks the structural rules: valid node names, unique names within
    /// each parent, and well-formed constraints.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |message: String| Err(PolicyError::InvalidDocument(message));

        if !valid_component(&self.name) {
            return invalid(format!("'{}' is not a valid environment name", self.name));
        }
        validate_constraint_set(&self.constraints, &self.name)?;

        let mut system_names = std::collections::BTreeSet::new();
        for system in &self.systems {
            if !valid_component(&system.name) {
                return invalid(format!("'{}' is not a valid system name", system.name));
            }
            if !system_names.insert(&system.name) {
                return invalid(format!(
                    "environment '{}' contains duplicate system '{}'",
                    self.name, system.name
                ));
            }
            validate_constraint_set(
                &system.constraints,
                &format!("{}.{}", self.name, system.name),
            )?;

            let mut group_names = std::collections::BTreeSet::new();
            for group in &system.groups {
                if !valid_component(&group.name) {
                    return invalid(format!("'{}' is not a valid group name", group.name));
                }
                if !group_names.insert(&group.name) {
                    return invalid(format!(
                        "system '{}' contains duplicate group '{}'",
                        system.name, group.name
                    ));
                }
                validate_constraint_set(
                    &group.constraints,
                    &format!("{}.{}.{}", self.name, system.name, group.name),
                )?;
            }
        }
        Ok(())
    }
}

fn validate_constraint_set(set: &ConstraintSet, path: &str) -> Result<(), PolicyError> {
    for constraint in set.join.iter().chain(set.approve.iter()) {
        constraint
            .validate()
            .map_err(|reason| PolicyError::InvalidDocument(format!("{path}: {reason}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::acl::{AclEntry, PermissionMask};
    use crate::constraint::{Constraint, InputKind, InputVariable};
    use crate::policy::{EnvironmentPolicy, JitGroupPolicy, SystemPolicy};
    use crate::principal::Principal;
    use crate::privilege::{Privilege, ResourceId};
    use time::Duration;

    fn sample() -> EnvironmentPolicy {
        let mut group = JitGroupPolicy {
            name: "admins".to_string(),
            description: "Billing administrators".to_string(),
            gke_enabled: true,
            ..JitGroupPolicy::default()
        };
        group.acl.entries.push(AclEntry::allow(
            Principal::EndUser("alice@example.com".into()),
            PermissionMask::VIEW | PermissionMask::JOIN | PermissionMask::APPROVE_SELF,
        ));
        group.acl.entries.push(AclEntry::deny(
            Principal::ServiceAccount("ci@project.iam.gserviceaccount.com".into()),
            PermissionMask::JOIN,
        ));
        group.constraints.join.push(Constraint::Expiry {
            min: Duration::seconds(300),
            max: Duration::seconds(3600),
        });
        group.constraints.approve.push(Constraint::Predicate {
            name: "ticket".to_string(),
            display_name: "Ticket number".to_string(),
            expression: "ticket_number > 0".to_string(),
            variables: vec![InputVariable {
                name: "ticket_number".to_string(),
                display_name: "Ticket number".to_string(),
                kind: InputKind::Long { min: 0, max: 99999 },
            }],
        });
        group.privileges.push(Privilege::IamRoleBinding {
            resource: ResourceId::Project("my-project".into()),
            role: "roles/billing.admin".into(),
            description: None,
            condition: Some("resource.name.startsWith('projects/my-project')".into()),
        });

        let mut system = SystemPolicy::new("billing", "Billing stack");
        system.add_group(group).unwrap();
        let mut environment = EnvironmentPolicy::new("prod", "Production");
        environment.metadata.source = "policies/prod.json".to_string();
        environment.metadata.version = 3;
        environment.add_system(system).unwrap();
        environment
    }

    #[test]
    fn export_then_parse_is_identity() {
        let policy = sample();
        let document = policy.to_json().unwrap();
        let parsed = EnvironmentPolicy::from_json(&document).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn rejects_invalid_node_names() {
        let mut policy = sample();
        policy.systems[0].groups[0].name = "Not Valid".to_string();
        let document = serde_json::to_string(&policy).unwrap();
        assert!(EnvironmentPolicy::from_json(&document).is_err());
    }

    #[test]
    fn rejects_duplicate_siblings() {
        let mut policy = sample();
        let duplicate = policy.systems[0].clone();
        policy.systems.push(duplicate);
        let document = serde_json::to_string(&policy).unwrap();
        assert!(EnvironmentPolicy::from_json(&document).is_err());
    }

    #[test]
    fn rejects_malformed_constraints() {
        let mut policy = sample();
        policy.systems[0].groups[0].constraints.join.push(Constraint::Expiry {
            min: Duration::seconds(600),
            max: Duration::seconds(60),
        });
        let document = serde_json::to_string(&policy).unwrap();
        assert!(EnvironmentPolicy::from_json(&document).is_err());
    }

    #[test]
    fn rejects_non_json_documents() {
        assert!(EnvironmentPolicy::from_json("not json").is_err());
    }

    #[test]
    fn unknown_privileges_survive_parsing() {
        let document = r#"{
            "name": "prod",
            "systems": [{
                "name": "billing",
                "groups": [{
                    "name": "admins",
                    "privileges": [
                        {"type": "sshAccess", "host": "bastion"},
                        {"type": "iamRoleBinding", "resource": "projects/p", "role": "roles/viewer"}
                    ]
                }]
            }]
        }"#;
        let policy = EnvironmentPolicy::from_json(document).unwrap();
        let privileges = &policy.systems[0].groups[0].privileges;
        assert_eq!(privileges.len(), 2);
        assert_eq!(privileges[0], Privilege::Unknown);
    }
}
