use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A cloud resource that can carry IAM role bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceId {
    Project(String),
    Folder(String),
    Organization(String),
}

impl ResourceId {
    pub fn id(&self) -> &str {
        match self {
            ResourceId::Project(id) | ResourceId::Folder(id) | ResourceId::Organization(id) => id,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Project(id) => write!(f, "projects/{id}"),
            ResourceId::Folder(id) => write!(f, "folders/{id}"),
            ResourceId::Organization(id) => write!(f, "organizations/{id}"),
        }
    }
}

impl FromStr for ResourceId {
    type Err = InvalidResourceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once('/').ok_or_else(|| InvalidResourceId(s.to_string()))?;
        if id.is_empty() || id.contains('/') {
            return Err(InvalidResourceId(s.to_string()));
        }
        match kind {
            "projects" => Ok(ResourceId::Project(id.to_string())),
            "folders" => Ok(ResourceId::Folder(id.to_string())),
            "organizations" => Ok(ResourceId::Organization(id.to_string())),
            _ => Err(InvalidResourceId(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResourceId {
    type Error = InvalidResourceId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> String {
        id.to_string()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a valid resource id")]
pub struct InvalidResourceId(pub String);

/// A grantable artifact attached to a JIT group.
///
/// The set is open-ended; provisioners act on the variants they understand
/// and skip the rest. The IAM provisioner only consumes
/// [`Privilege::IamRoleBinding`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Privilege {
    #[serde(rename_all = "camelCase")]
    IamRoleBinding {
        resource: ResourceId,
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    /// Privilege variants introduced by newer policy documents.
    #[serde(other)]
    Unknown,
}
