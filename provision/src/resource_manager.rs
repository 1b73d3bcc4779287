use crate::error::ApiError;
use async_trait::async_trait;
use jit_groups_policy::privilege::ResourceId;
use serde::{Deserialize, Serialize};

/// An IAM policy of a project, folder, or organization.
///
/// Mirrors the resource manager wire shape; conditional bindings require
/// policy version 3.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamPolicy {
    pub version: i32,
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
    #[serde(default)]
    pub etag: String,
}

/// Associates members with a role, optionally gated by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<IamCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamCondition {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub expression: String,
}

/// Transformation applied to a resource's IAM policy under
/// read-modify-write.
pub type IamPolicyTransform = Box<dyn FnOnce(IamPolicy) -> IamPolicy + Send>;

/// Capability interface over the resource manager API.
///
/// `modify_iam_policy` must implement read-modify-write semantics with
/// optimistic concurrency retry (etag) at the transport layer; the core
/// only supplies the transformation.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn modify_iam_policy(
        &self,
        resource: &ResourceId,
        transform: IamPolicyTransform,
    ) -> Result<(), ApiError>;
}
