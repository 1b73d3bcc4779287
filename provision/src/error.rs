/// Error returned by the cloud capability traits.
///
/// `NotFound` signals absence and is routinely pattern-matched by callers
/// (a missing group means "not provisioned yet", not a failure).
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error surfaced by the provisioner.
#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// One or more parallel resource updates failed. The first failure is
    /// the primary cause; the rest are kept for the log.
    #[error("{} ({} further failures)", .primary, .suppressed.len())]
    Aggregate {
        primary: Box<ApiError>,
        suppressed: Vec<ApiError>,
    },
}

impl ProvisionError {
    /// Folds per-resource failures into one error. `errors` must not be
    /// empty.
    pub(crate) fn aggregate(mut errors: Vec<ApiError>) -> ProvisionError {
        let primary = errors.remove(0);
        if errors.is_empty() {
            ProvisionError::Api(primary)
        } else {
            ProvisionError::Aggregate {
                primary: Box::new(primary),
                suppressed: errors,
            }
        }
    }

    pub fn is_access_denied(&self) -> bool {
        match self {
            ProvisionError::Api(ApiError::AccessDenied(_)) => true,
            ProvisionError::Aggregate { primary, .. } => {
                matches!(**primary, ApiError::AccessDenied(_))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_failure_stays_plain() {
        let err = ProvisionError::aggregate(vec![ApiError::AccessDenied("p1".into())]);
        assert!(matches!(err, ProvisionError::Api(ApiError::AccessDenied(_))));
        assert!(err.is_access_denied());
    }

    #[test]
    fn multiple_failures_keep_the_first_as_primary() {
        let err = ProvisionError::aggregate(vec![
            ApiError::AccessDenied("p1".into()),
            ApiError::NotFound("p2".into()),
        ]);
        match &err {
            ProvisionError::Aggregate { primary, suppressed } => {
                assert!(matches!(**primary, ApiError::AccessDenied(_)));
                assert_eq!(suppressed.len(), 1);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.to_string().contains("1 further failures"));
    }
}
