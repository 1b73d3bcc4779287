use crate::cloud_identity::CloudIdentity;
use crate::error::{ApiError, ProvisionError};
use crate::resource_manager::{IamBinding, IamCondition, IamPolicy, ResourceManager};
use jit_groups_policy::privilege::{Privilege, ResourceId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A role binding a JIT group is supposed to hold on a resource.
///
/// Ordering is (resource, role, condition, description) so sets normalize
/// deterministically for hashing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RoleBinding {
    pub resource: ResourceId,
    pub role: String,
    pub condition: Option<String>,
    pub description: Option<String>,
}

impl RoleBinding {
    pub fn new(
        resource: ResourceId,
        role: impl Into<String>,
        condition: Option<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            resource,
            role: role.into(),
            // An empty condition is no condition.
            condition: condition.filter(|c| !c.is_empty()),
            description: description.filter(|d| !d.is_empty()),
        }
    }
}

/// Extracts the bindings the IAM provisioner acts on; other privilege
/// variants are skipped.
pub fn desired_bindings(privileges: &[Privilege]) -> BTreeSet<RoleBinding> {
    privileges
        .iter()
        .filter_map(|privilege| match privilege {
            Privilege::IamRoleBinding {
                resource,
                role,
                description,
                condition,
            } => Some(RoleBinding::new(
                resource.clone(),
                role.clone(),
                condition.clone(),
                description.clone(),
            )),
            _ => None,
        })
        .collect()
}

/// Hash of a normalized binding set. The empty set hashes to 0, which
/// doubles as the "no checksum recorded" drift signal.
pub fn checksum(bindings: &BTreeSet<RoleBinding>) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for binding in bindings {
        hasher.update(binding.resource.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(binding.role.as_bytes());
        hasher.update(b"\n");
        hasher.update(binding.condition.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
        hasher.update(binding.description.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize()
}

/// Appends the checksum tag to a group description.
pub fn tagged_description(text: &str, checksum: u32) -> String {
    if text.is_empty() {
        format!("#{checksum:08x}")
    } else {
        format!("{text} #{checksum:08x}")
    }
}

/// Splits a group description into the user text and the recorded
/// checksum. A missing or malformed tag reads as checksum 0.
pub fn parse_description(description: &str) -> (&str, u32) {
    if let Some(index) = description.rfind('#') {
        let tag = &description[index + 1..];
        if tag.len() == 8 && tag.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(checksum) = u32::from_str_radix(tag, 16) {
                return (description[..index].trim_end(), checksum);
            }
        }
    }
    (description, 0)
}

/// Replaces every binding attributed to `member` in `policy` with one
/// binding per (role, condition) from `bindings`.
fn apply_bindings(mut policy: IamPolicy, member: &str, bindings: &[RoleBinding]) -> IamPolicy {
    for binding in policy.bindings.iter_mut() {
        binding.members.retain(|m| m != member);
    }
    policy.bindings.retain(|b| !b.members.is_empty());

    // One binding per (role, condition); the first description wins.
    let mut grouped: BTreeMap<(&str, Option<&str>), Option<&str>> = BTreeMap::new();
    for binding in bindings {
        grouped
            .entry((binding.role.as_str(), binding.condition.as_deref()))
            .or_insert(binding.description.as_deref());
    }
    for ((role, condition), description) in grouped {
        policy.bindings.push(IamBinding {
            role: role.to_string(),
            members: vec![member.to_string()],
            condition: condition.map(|expression| IamCondition {
                title: "JIT group access".to_string(),
                description: description.map(str::to_string),
                expression: expression.to_string(),
            }),
        });
    }
    if policy.bindings.iter().any(|b| b.condition.is_some()) {
        policy.version = 3;
    }
    policy
}

/// Reconciles IAM role bindings for one group and maintains the checksum
/// tag in the group's description.
pub struct IamProvisioner {
    identity: Arc<dyn CloudIdentity>,
    resource_manager: Arc<dyn ResourceManager>,
}

impl IamProvisioner {
    pub fn new(identity: Arc<dyn CloudIdentity>, resource_manager: Arc<dyn ResourceManager>) -> Self {
        Self {
            identity,
            resource_manager,
        }
    }

    /// Brings the bindings attributed to `group_email` in line with
    /// `desired`.
    ///
    /// Per-resource updates run in parallel; the checksum tag is written
    /// only after every update succeeded, so a partial failure keeps the
    /// drift signal and the next reconciliation converges.
    pub async fn provision_access(
        &self,
        group_email: &str,
        desired: &BTreeSet<RoleBinding>,
    ) -> Result<(), ProvisionError> {
        let group = self.identity.get_group(group_email).await?;
        let (text, recorded) = parse_description(&group.description);
        let target = checksum(desired);
        if recorded == target && !desired.is_empty() {
            debug!(group = group_email, checksum = target, "bindings unchanged");
            return Ok(());
        }

        let mut by_resource: BTreeMap<ResourceId, Vec<RoleBinding>> = BTreeMap::new();
        for binding in desired {
            by_resource
                .entry(binding.resource.clone())
                .or_default()
                .push(binding.clone());
        }

        let member = format!("group:{group_email}");
        let mut updates = Vec::new();
        for (resource, bindings) in by_resource {
            let resource_manager = self.resource_manager.clone();
            let member = member.clone();
            updates.push((
                resource.clone(),
                tokio::spawn(async move {
                    resource_manager
                        .modify_iam_policy(
                            &resource,
                            Box::new(move |policy| apply_bindings(policy, &member, &bindings)),
                        )
                        .await
                }),
            ));
        }

        let mut failures = Vec::new();
        for (resource, update) in updates {
            match update.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(group = group_email, resource = %resource, error = %e, "IAM update failed");
                    failures.push(e);
                }
                Err(e) => failures.push(ApiError::Io(std::io::Error::other(e.to_string()))),
            }
        }
        if !failures.is_empty() {
            return Err(ProvisionError::aggregate(failures));
        }

        self.identity
            .patch_group(&group.key, &tagged_description(text, target))
            .await?;
        let checksum_hex = format!("{target:08x}");
        info!(
            group = group_email,
            checksum = %checksum_hex,
            bindings = desired.len(),
            "IAM bindings provisioned"
        );
        Ok(())
    }
}
