use crate::context::{EnvironmentContext, JitGroupContext};
use crate::error::Error;
use crate::source::{EnvironmentHeader, PolicyStore};
use jit_groups_policy::group_id::JitGroupId;
use jit_groups_policy::principal::Subject;
use jit_groups_provision::provisioner::Provisioner;
use std::sync::Arc;

/// Per-request view of the policy catalog for one subject.
///
/// Every lookup is gated by the subject's VIEW permission; a denied lookup
/// is indistinguishable from an absent entry.
pub struct Catalog {
    subject: Subject,
    store: Arc<PolicyStore>,
    provisioner: Arc<Provisioner>,
}

impl Catalog {
    pub fn new(subject: Subject, store: Arc<PolicyStore>, provisioner: Arc<Provisioner>) -> Self {
        Self {
            subject,
            store,
            provisioner,
        }
    }

    /// Environment summaries. No policies are loaded and no VIEW check is
    /// applied; the headers only carry a name and description.
    pub fn environments(&self) -> Vec<EnvironmentHeader> {
        self.store.environments()
    }

    /// Loads an environment. `Ok(None)` when the environment is unknown or
    /// the subject lacks VIEW on its ACL. Any permission implies VIEW for
    /// navigation.
    pub async fn environment(&self, name: &str) -> Result<Option<EnvironmentContext>, Error> {
        let Some(policy) = self.store.policy(name).await? else {
            return Ok(None);
        };
        if policy.acl.allowed_mask(&self.subject).is_empty() {
            return Ok(None);
        }
        Ok(Some(EnvironmentContext::new(
            self.subject.clone(),
            policy,
            self.provisioner.clone(),
        )))
    }

    /// Resolves a group with VIEW gates at the environment, system, and
    /// group level.
    pub async fn group(&self, id: &JitGroupId) -> Result<Option<JitGroupContext>, Error> {
        match self.environment(id.environment()).await? {
            None => Ok(None),
            Some(environment) => Ok(environment
                .system(id.system())
                .and_then(|system| system.group(id.name()))),
        }
    }
}
