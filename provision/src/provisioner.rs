use crate::cloud_identity::{AccessProfile, CloudIdentity, GroupKey};
use crate::error::{ApiError, ProvisionError};
use crate::iam::{desired_bindings, IamProvisioner};
use crate::mapping::GroupMapping;
use crate::resource_manager::ResourceManager;
use jit_groups_policy::group_id::JitGroupId;
use jit_groups_policy::policy::JitGroupView;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Process-wide provisioner configuration.
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    /// Domain under which JIT groups are created.
    pub primary_domain: String,
    /// Owner assigned to newly created groups, typically the broker's own
    /// service account.
    pub owner_email: String,
    /// Host group that GKE-compatible groups must be a member of
    /// (`gke-security-groups@<domain>`), if the deployment uses GKE RBAC.
    pub gke_security_group: Option<String>,
}

/// A cloud group that exists for an environment, as reported by
/// [`Provisioner::provisioned_groups`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedGroup {
    pub id: JitGroupId,
    pub email: String,
}

/// Manages existence and memberships of the backing cloud identity groups.
struct GroupProvisioner {
    identity: Arc<dyn CloudIdentity>,
    mapping: GroupMapping,
    options: ProvisionerOptions,
}

impl GroupProvisioner {
    /// Looks up the backing group, creating it on first use. Creation is
    /// idempotent: losing a creation race degrades to a lookup.
    async fn ensure_group(&self, view: &JitGroupView) -> Result<GroupKey, ProvisionError> {
        let email = self.mapping.group_email(&view.id());
        match self.identity.lookup_group(&email).await {
            Ok(key) => Ok(key),
            Err(ApiError::NotFound(_)) => self.create_group(view, &email).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn create_group(
        &self,
        view: &JitGroupView,
        email: &str,
    ) -> Result<GroupKey, ProvisionError> {
        let policy = view.policy();
        let profile = if policy.gke_enabled {
            AccessProfile::GkeCompatible
        } else {
            AccessProfile::Restricted
        };
        info!(group = email, profile = ?profile, "creating backing group");
        let key = match self
            .identity
            .create_group(email, &policy.description, &self.options.owner_email, profile)
            .await
        {
            Ok(key) => key,
            // A concurrent writer created it first.
            Err(ApiError::AlreadyExists(_)) => self.identity.lookup_group(email).await?,
            Err(e) => return Err(e.into()),
        };

        if policy.gke_enabled {
            if let Some(host) = &self.options.gke_security_group {
                let host_key = self.identity.lookup_group(host).await?;
                self.identity
                    .add_permanent_membership(&host_key, email)
                    .await?;
            }
        }
        Ok(key)
    }

    async fn add_membership(
        &self,
        key: &GroupKey,
        user_email: &str,
        expiry: OffsetDateTime,
    ) -> Result<(), ProvisionError> {
        self.identity
            .add_membership(key, user_email, expiry)
            .await?;
        Ok(())
    }
}

/// Provisions JIT group memberships: backing group, time-bounded
/// membership, IAM role bindings, in that order.
pub struct Provisioner {
    groups: GroupProvisioner,
    iam: IamProvisioner,
    mapping: GroupMapping,
    identity: Arc<dyn CloudIdentity>,
}

impl Provisioner {
    pub fn new(
        identity: Arc<dyn CloudIdentity>,
        resource_manager: Arc<dyn ResourceManager>,
        options: ProvisionerOptions,
    ) -> Self {
        let mapping = GroupMapping::new(options.primary_domain.clone());
        Self {
            groups: GroupProvisioner {
                identity: identity.clone(),
                mapping: mapping.clone(),
                options,
            },
            iam: IamProvisioner::new(identity.clone(), resource_manager),
            mapping,
            identity,
        }
    }

    /// The cloud group email a JIT group maps to. Pure, no I/O.
    pub fn cloud_group_email(&self, id: &JitGroupId) -> String {
        self.mapping.group_email(id)
    }

    /// Whether the backing group exists. `NotFound` means "no"; everything
    /// else propagates.
    pub async fn is_provisioned(&self, id: &JitGroupId) -> Result<bool, ProvisionError> {
        match self.identity.get_group(&self.cloud_group_email(id)).await {
            Ok(_) => Ok(true),
            Err(ApiError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Grants `user_email` a membership in the backing group until
    /// `expiry`, creating the group and reconciling its IAM bindings along
    /// the way.
    pub async fn provision_membership(
        &self,
        view: &JitGroupView,
        user_email: &str,
        expiry: OffsetDateTime,
    ) -> Result<(), ProvisionError> {
        let id = view.id();
        let result = self.provision_membership_inner(view, user_email, expiry).await;
        match &result {
            Ok(()) => info!(group = %id, user = user_email, expiry = %expiry, "membership provisioned"),
            Err(e) if e.is_access_denied() => {
                warn!(group = %id, user = user_email, error = %e, "provisioning denied")
            }
            Err(e) => warn!(group = %id, user = user_email, error = %e, "provisioning failed"),
        }
        result
    }

    async fn provision_membership_inner(
        &self,
        view: &JitGroupView,
        user_email: &str,
        expiry: OffsetDateTime,
    ) -> Result<(), ProvisionError> {
        let key = self.groups.ensure_group(view).await?;
        self.groups.add_membership(&key, user_email, expiry).await?;
        self.iam
            .provision_access(
                &self.cloud_group_email(&view.id()),
                &desired_bindings(view.privileges()),
            )
            .await
    }

    /// Check-only reconciliation of one group. A group that has never been
    /// provisioned is left alone; it is created lazily on first membership.
    pub async fn reconcile(&self, view: &JitGroupView) -> Result<(), ProvisionError> {
        let email = self.cloud_group_email(&view.id());
        match self.identity.get_group(&email).await {
            Err(ApiError::NotFound(_)) => {
                debug!(group = %email, "not provisioned, skipping");
                Ok(())
            }
            Err(e) => Err(e.into()),
            Ok(_) => {
                self.iam
                    .provision_access(&email, &desired_bindings(view.privileges()))
                    .await
            }
        }
    }

    /// Enumerates the groups provisioned for an environment. Groups whose
    /// email does not parse back to a JIT group id are skipped.
    pub async fn provisioned_groups(
        &self,
        environment: &str,
    ) -> Result<Vec<ProvisionedGroup>, ProvisionError> {
        let prefix = self.mapping.environment_prefix(environment);
        let groups = self
            .identity
            .search_groups_by_prefix(&prefix, false)
            .await?;
        let mut result = Vec::new();
        for group in groups {
            match self.mapping.parse(&group.email) {
                Some(id) => result.push(ProvisionedGroup {
                    id,
                    email: group.email,
                }),
                None => debug!(email = %group.email, "skipping malformed group email"),
            }
        }
        Ok(result)
    }
}
