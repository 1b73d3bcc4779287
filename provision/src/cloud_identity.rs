use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Opaque server-side identifier of a cloud identity group
/// (`groups/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(pub String);

/// Access profile applied when a group is created.
///
/// GKE-compatible groups can be referenced in GKE RBAC policies; restricted
/// groups hide membership from non-members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessProfile {
    Restricted,
    GkeCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub key: GroupKey,
    pub email: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub member_email: String,
    /// Absent for permanent memberships.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiry: Option<OffsetDateTime>,
}

/// Capability interface over the cloud identity groups API.
///
/// Implementations are process-wide and internally thread-safe. A
/// [`ApiError::NotFound`] return from the lookup operations signals absence
/// rather than failure.
#[async_trait]
pub trait CloudIdentity: Send + Sync {
    async fn get_group(&self, email: &str) -> Result<Group, ApiError>;

    async fn lookup_group(&self, email: &str) -> Result<GroupKey, ApiError>;

    async fn create_group(
        &self,
        email: &str,
        description: &str,
        owner_email: &str,
        access_profile: AccessProfile,
    ) -> Result<GroupKey, ApiError>;

    async fn patch_group(&self, key: &GroupKey, description: &str) -> Result<(), ApiError>;

    async fn add_membership(
        &self,
        key: &GroupKey,
        user_email: &str,
        expiry: OffsetDateTime,
    ) -> Result<Membership, ApiError>;

    async fn add_permanent_membership(
        &self,
        host_key: &GroupKey,
        member_email: &str,
    ) -> Result<(), ApiError>;

    async fn delete_membership(&self, key: &GroupKey, member_email: &str) -> Result<(), ApiError>;

    /// Lists groups whose email starts with `prefix`, optionally expanding
    /// their memberships.
    async fn search_groups_by_prefix(
        &self,
        prefix: &str,
        expand_members: bool,
    ) -> Result<Vec<Group>, ApiError>;
}
