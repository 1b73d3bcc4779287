use crate::acl::AccessControlList;
use crate::constraint::{Constraint, ConstraintClass};
use crate::document::PolicyError;
use crate::group_id::JitGroupId;
use crate::privilege::Privilege;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Provenance of a policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMetadata {
    pub source: String,
    pub version: u64,
}

/// Constraints of one policy node, grouped by class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approve: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn class(&self, class: ConstraintClass) -> &[Constraint] {
        match class {
            ConstraintClass::Join => &self.join,
            ConstraintClass::Approve => &self.approve,
        }
    }
}

/// A pre-existing cloud group the policy cannot represent, surfaced by
/// legacy policy sources and passed through reconciliation untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incompatibility {
    pub group_email: String,
    pub detail: String,
}

/// Top-level policy container, mapping 1:1 to a deployment scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub acl: AccessControlList,
    #[serde(default)]
    pub constraints: ConstraintSet,
    #[serde(default)]
    pub systems: Vec<SystemPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incompatibilities: Vec<Incompatibility>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acl: AccessControlList,
    #[serde(default)]
    pub constraints: ConstraintSet,
    #[serde(default)]
    pub groups: Vec<JitGroupPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JitGroupPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Creates the backing group with the GKE-compatible access profile.
    #[serde(default)]
    pub gke_enabled: bool,
    #[serde(default)]
    pub acl: AccessControlList,
    #[serde(default)]
    pub constraints: ConstraintSet,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

impl EnvironmentPolicy {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Adds a system, rejecting duplicate names.
    pub fn add_system(&mut self, system: SystemPolicy) -> Result<(), PolicyError> {
        if self.systems.iter().any(|s| s.name == system.name) {
            return Err(PolicyError::InvalidDocument(format!(
                "environment '{}' already contains a system '{}'",
                self.name, system.name
            )));
        }
        self.systems.push(system);
        Ok(())
    }

    pub fn system(&self, name: &str) -> Option<(usize, &SystemPolicy)> {
        self.systems
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == name)
    }
}

impl SystemPolicy {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Adds a group, rejecting duplicate names.
    pub fn add_group(&mut self, group: JitGroupPolicy) -> Result<(), PolicyError> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(PolicyError::InvalidDocument(format!(
                "system '{}' already contains a group '{}'",
                self.name, group.name
            )));
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<(usize, &JitGroupPolicy)> {
        self.groups
            .iter()
            .enumerate()
            .find(|(_, g)| g.name == name)
    }
}

/// A JIT group policy in the context of its ancestors.
///
/// Children hold no parent pointers; the view addresses a group by index
/// into the shared environment policy and derives the effective ACL and
/// constraints by walking root to leaf.
#[derive(Clone)]
pub struct JitGroupView {
    environment: Arc<EnvironmentPolicy>,
    system_index: usize,
    group_index: usize,
}

impl JitGroupView {
    pub fn new(
        environment: Arc<EnvironmentPolicy>,
        system_index: usize,
        group_index: usize,
    ) -> Option<Self> {
        let system = environment.systems.get(system_index)?;
        system.groups.get(group_index)?;
        Some(Self {
            environment,
            system_index,
            group_index,
        })
    }

    /// Resolves `id` inside `environment`, if the environment matches and
    /// the group exists.
    pub fn resolve(environment: Arc<EnvironmentPolicy>, id: &JitGroupId) -> Option<Self> {
        if environment.name != id.environment() {
            return None;
        }
        let (system_index, system) = environment.system(id.system())?;
        let (group_index, _) = system.group(id.name())?;
        Self::new(environment, system_index, group_index)
    }

    pub fn id(&self) -> JitGroupId {
        // Node names are validated on construction/parse.
        JitGroupId::new(
            &self.environment.name,
            &self.system().name,
            &self.policy().name,
        )
        .expect("policy node names are validated")
    }

    pub fn environment(&self) -> &EnvironmentPolicy {
        &self.environment
    }

    pub fn system(&self) -> &SystemPolicy {
        &self.environment.systems[self.system_index]
    }

    pub fn policy(&self) -> &JitGroupPolicy {
        &self.system().groups[self.group_index]
    }

    pub fn privileges(&self) -> &[Privilege] {
        &self.policy().privileges
    }

    /// Concatenation of the environment, system, and group ACLs, in that
    /// order, so an ancestor deny wins for any intersecting mask.
    pub fn effective_acl(&self) -> AccessControlList {
        AccessControlList::concat([
            &self.environment.acl,
            &self.system().acl,
            &self.policy().acl,
        ])
    }

    /// Union of the constraints of one class across the chain. A child
    /// constraint with the name of an ancestor's replaces it in place, so
    /// evaluation order stays deterministic.
    pub fn effective_constraints(&self, class: ConstraintClass) -> Vec<Constraint> {
        let mut result: Vec<Constraint> = Vec::new();
        let sets = [
            &self.environment.constraints,
            &self.system().constraints,
            &self.policy().constraints,
        ];
        for set in sets {
            for constraint in set.class(class) {
                match result.iter().position(|c| c.name() == constraint.name()) {
                    Some(index) => result[index] = constraint.clone(),
                    None => result.push(constraint.clone()),
                }
            }
        }
        result
    }
}
