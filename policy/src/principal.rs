use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A security principal that can appear in an access control list.
///
/// Equality and ordering are by (variant, email) so principals can live in
/// ordered sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Principal {
    /// A human end user, identified by their primary email address.
    EndUser(String),
    /// A group of principals, identified by the group email address.
    Group(String),
    /// A machine identity.
    ServiceAccount(String),
}

impl Principal {
    pub fn email(&self) -> &str {
        match self {
            Principal::EndUser(email) | Principal::Group(email) | Principal::ServiceAccount(email) => email,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::EndUser(email) => write!(f, "user:{email}"),
            Principal::Group(email) => write!(f, "group:{email}"),
            Principal::ServiceAccount(email) => write!(f, "serviceAccount:{email}"),
        }
    }
}

/// The authenticated end user of one request plus all principals they
/// belong to (their own identity and transitively resolved groups).
///
/// Subjects are immutable for the lifetime of a request; group resolution
/// happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    user: String,
    principals: BTreeSet<Principal>,
}

impl Subject {
    /// Creates a subject for `user`. The user's own principal is always
    /// part of the principal set.
    pub fn new(user: impl Into<String>, memberships: impl IntoIterator<Item = Principal>) -> Self {
        let user = user.into();
        let mut principals: BTreeSet<Principal> = memberships.into_iter().collect();
        principals.insert(Principal::EndUser(user.clone()));
        Self { user, principals }
    }

    /// The end user's email address.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn principals(&self) -> &BTreeSet<Principal> {
        &self.principals
    }

    pub fn holds(&self, principal: &Principal) -> bool {
        self.principals.contains(principal)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subject_always_holds_its_own_principal() {
        let subject = Subject::new("alice@example.com", []);
        assert!(subject.holds(&Principal::EndUser("alice@example.com".into())));
        assert!(!subject.holds(&Principal::EndUser("bob@example.com".into())));
    }

    #[test]
    fn subject_holds_resolved_groups() {
        let subject = Subject::new(
            "alice@example.com",
            [Principal::Group("eng@example.com".into())],
        );
        assert!(subject.holds(&Principal::Group("eng@example.com".into())));
        assert!(!subject.holds(&Principal::Group("ops@example.com".into())));
    }

    #[test]
    fn principal_identity_is_variant_and_email() {
        assert_ne!(
            Principal::EndUser("x@example.com".into()),
            Principal::Group("x@example.com".into())
        );
        assert_eq!(
            Principal::EndUser("x@example.com".into()),
            Principal::EndUser("x@example.com".into())
        );
    }

    #[test]
    fn principal_serde_round_trip() {
        let p = Principal::ServiceAccount("svc@project.iam.gserviceaccount.com".into());
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(serde_json::from_str::<Principal>(&json).unwrap(), p);
    }
}
