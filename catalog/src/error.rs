use jit_groups_policy::constraint::ConstraintError;
use jit_groups_policy::document::PolicyError;
use jit_groups_provision::error::{ApiError, ProvisionError};

/// Error surfaced by catalog operations.
///
/// Each variant corresponds to one stable error kind at the service
/// boundary; [`Error::id`] yields the identifier used in logs and
/// responses.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    ResourceNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more constraints could not be evaluated. Lists every failed
    /// constraint.
    #[error("constraint evaluation failed: {}", .0.join(", "))]
    ConstraintFailed(Vec<String>),

    /// One or more constraints evaluated to false. Lists every unsatisfied
    /// constraint.
    #[error("constraints not satisfied: {}", .0.join(", "))]
    ConstraintUnsatisfied(Vec<String>),

    #[error("the group does not define an expiry for new memberships")]
    MissingExpiryConstraint,

    #[error("no approvers are available for this group")]
    NoApproversAvailable,

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable identifier of the error kind.
    pub fn id(&self) -> &'static str {
        match self {
            Error::AccessDenied(_) => "ACCESS_DENIED",
            Error::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::ConstraintFailed(_) => "CONSTRAINT_FAILED",
            Error::ConstraintUnsatisfied(_) => "CONSTRAINT_UNSATISFIED",
            Error::MissingExpiryConstraint => "MISSING_EXPIRY_CONSTRAINT",
            Error::NoApproversAvailable => "NO_APPROVERS_AVAILABLE",
            Error::InvalidProposal(_) => "INVALID_PROPOSAL",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

impl From<ProvisionError> for Error {
    fn from(e: ProvisionError) -> Self {
        match &e {
            ProvisionError::Api(api) => api_error(api, &e),
            ProvisionError::Aggregate { primary, .. } => api_error(primary, &e),
        }
    }
}

fn api_error(primary: &ApiError, full: &ProvisionError) -> Error {
    match primary {
        ApiError::AccessDenied(_) => Error::AccessDenied(full.to_string()),
        ApiError::NotFound(_) => Error::ResourceNotFound(full.to_string()),
        ApiError::AlreadyExists(_) | ApiError::BadRequest(_) => {
            Error::InvalidArgument(full.to_string())
        }
        ApiError::Io(_) => Error::Io(std::io::Error::other(full.to_string())),
    }
}

impl From<PolicyError> for Error {
    fn from(e: PolicyError) -> Self {
        match &e {
            PolicyError::InvalidDocument(_) => Error::InvalidArgument(e.to_string()),
            PolicyError::Unavailable(_) => Error::Io(std::io::Error::other(e.to_string())),
        }
    }
}

impl From<ConstraintError> for Error {
    fn from(e: ConstraintError) -> Self {
        match &e {
            ConstraintError::InvalidInput { .. } => Error::InvalidArgument(e.to_string()),
            ConstraintError::EvaluationFailed { name, .. } => {
                Error::ConstraintFailed(vec![name.clone()])
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn provision_errors_map_to_boundary_kinds() {
        let denied: Error = ProvisionError::Api(ApiError::AccessDenied("p".into())).into();
        assert_eq!(denied.id(), "ACCESS_DENIED");

        let aggregate: Error = ProvisionError::Aggregate {
            primary: Box::new(ApiError::NotFound("g".into())),
            suppressed: vec![ApiError::AccessDenied("p".into())],
        }
        .into();
        assert_eq!(aggregate.id(), "RESOURCE_NOT_FOUND");
    }

    #[test]
    fn ids_are_stable() {
        assert_eq!(Error::MissingExpiryConstraint.id(), "MISSING_EXPIRY_CONSTRAINT");
        assert_eq!(Error::NoApproversAvailable.id(), "NO_APPROVERS_AVAILABLE");
        assert_eq!(
            Error::ConstraintUnsatisfied(vec!["ticket".into()]).id(),
            "CONSTRAINT_UNSATISFIED"
        );
    }
}
