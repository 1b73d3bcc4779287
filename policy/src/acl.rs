use crate::principal::{Principal, Subject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::BitOr;

/// Bitmask of the permissions a JIT group policy can grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMask(pub u32);

impl PermissionMask {
    /// See the group and its metadata in listings.
    pub const VIEW: PermissionMask = PermissionMask(1);
    /// Request to join the group.
    pub const JOIN: PermissionMask = PermissionMask(2);
    /// Approve one's own join request.
    pub const APPROVE_SELF: PermissionMask = PermissionMask(4);
    /// Approve other users' join requests.
    pub const APPROVE_OTHERS: PermissionMask = PermissionMask(8);
    /// Export the environment policy document.
    pub const EXPORT: PermissionMask = PermissionMask(16);
    /// Run reconciliation for the environment.
    pub const RECONCILE: PermissionMask = PermissionMask(32);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: PermissionMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share at least one bit.
    pub fn intersects(self, other: PermissionMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for PermissionMask {
    type Output = PermissionMask;

    fn bitor(self, rhs: PermissionMask) -> PermissionMask {
        PermissionMask(self.0 | rhs.0)
    }
}

impl fmt::Display for PermissionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PermissionMask, &str); 6] = [
            (PermissionMask::VIEW, "VIEW"),
            (PermissionMask::JOIN, "JOIN"),
            (PermissionMask::APPROVE_SELF, "APPROVE_SELF"),
            (PermissionMask::APPROVE_OTHERS, "APPROVE_OTHERS"),
            (PermissionMask::EXPORT, "EXPORT"),
            (PermissionMask::RECONCILE, "RECONCILE"),
        ];
        let mut first = true;
        for (mask, name) in NAMES {
            if self.contains(mask) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    Allow,
    Deny,
}

/// One ordered entry of an access control list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    pub access: Access,
    pub principal: Principal,
    pub mask: PermissionMask,
}

impl AclEntry {
    pub fn allow(principal: Principal, mask: PermissionMask) -> Self {
        Self {
            access: Access::Allow,
            principal,
            mask,
        }
    }

    pub fn deny(principal: Principal, mask: PermissionMask) -> Self {
        Self {
            access: Access::Deny,
            principal,
            mask,
        }
    }
}

/// Ordered sequence of allow/deny entries.
///
/// Evaluation walks entries in order: a deny entry whose principal the
/// subject holds and whose mask intersects the required mask denies
/// immediately; allow entries accumulate their bits. Access is granted iff
/// the accumulated bits cover the required mask, so an empty list denies
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessControlList {
    pub entries: Vec<AclEntry>,
}

impl AccessControlList {
    pub fn new(entries: Vec<AclEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks whether `subject` holds every bit of `required`.
    ///
    /// `required` must be non-zero; asking for no permission at all is a
    /// programming error.
    pub fn is_access_allowed(&self, subject: &Subject, required: PermissionMask) -> bool {
        debug_assert!(!required.is_empty());
        let mut allowed = PermissionMask::default();
        for entry in &self.entries {
            if !subject.holds(&entry.principal) {
                continue;
            }
            match entry.access {
                Access::Deny if entry.mask.intersects(required) => return false,
                Access::Deny => {}
                Access::Allow => allowed = allowed | entry.mask,
            }
        }
        allowed.contains(required)
    }

    /// The accumulated permissions this list leaves the subject with.
    ///
    /// Allow bits accumulate; a denied bit is removed and cannot be
    /// re-granted by a later entry. Listing paths treat any remaining bit
    /// as implying VIEW.
    pub fn allowed_mask(&self, subject: &Subject) -> PermissionMask {
        let mut allowed = PermissionMask::default();
        let mut denied = PermissionMask::default();
        for entry in &self.entries {
            if !subject.holds(&entry.principal) {
                continue;
            }
            match entry.access {
                Access::Deny => denied = denied | entry.mask,
                Access::Allow => allowed = allowed | entry.mask,
            }
        }
        PermissionMask(allowed.0 & !denied.0)
    }

    /// All principals this list grants every bit of `required`, honoring
    /// deny entries. Used to derive proposal recipients.
    pub fn allowed_principals(&self, required: PermissionMask) -> BTreeSet<Principal> {
        let mut result = BTreeSet::new();
        let candidates: BTreeSet<&Principal> = self
            .entries
            .iter()
            .filter(|e| e.access == Access::Allow)
            .map(|e| &e.principal)
            .collect();
        for candidate in candidates {
            let mut allowed = PermissionMask::default();
            let mut denied = false;
            for entry in &self.entries {
                if entry.principal != *candidate {
                    continue;
                }
                match entry.access {
                    Access::Deny if entry.mask.intersects(required) => {
                        denied = true;
                        break;
                    }
                    Access::Deny => {}
                    Access::Allow => allowed = allowed | entry.mask,
                }
            }
            if !denied && allowed.contains(required) {
                result.insert(candidate.clone());
            }
        }
        result
    }

    /// Concatenates `lists` in order into one effective list.
    pub fn concat<'a>(lists: impl IntoIterator<Item = &'a AccessControlList>) -> AccessControlList {
        let mut entries = Vec::new();
        for list in lists {
            entries.extend(list.entries.iter().cloned());
        }
        AccessControlList { entries }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn subject() -> Subject {
        Subject::new(
            "alice@example.com",
            [Principal::Group("eng@example.com".into())],
        )
    }

    #[test]
    fn empty_acl_denies_all() {
        let acl = AccessControlList::default();
        assert!(!acl.is_access_allowed(&subject(), PermissionMask::VIEW));
    }

    #[test]
    fn allow_must_cover_full_mask() {
        let acl = AccessControlList::new(vec![AclEntry::allow(
            Principal::EndUser("alice@example.com".into()),
            PermissionMask::JOIN,
        )]);
        assert!(acl.is_access_allowed(&subject(), PermissionMask::JOIN));
        assert!(!acl.is_access_allowed(
            &subject(),
            PermissionMask::JOIN | PermissionMask::APPROVE_SELF
        ));
    }

    #[test]
    fn allow_bits_accumulate_across_entries() {
        let acl = AccessControlList::new(vec![
            AclEntry::allow(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::JOIN,
            ),
            AclEntry::allow(
                Principal::Group("eng@example.com".into()),
                PermissionMask::APPROVE_SELF,
            ),
        ]);
        assert!(acl.is_access_allowed(
            &subject(),
            PermissionMask::JOIN | PermissionMask::APPROVE_SELF
        ));
    }

    #[test]
    fn deny_wins_regardless_of_position_of_allow() {
        let acl = AccessControlList::new(vec![
            AclEntry::deny(
                Principal::Group("eng@example.com".into()),
                PermissionMask::JOIN,
            ),
            AclEntry::allow(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::JOIN,
            ),
        ]);
        assert!(!acl.is_access_allowed(&subject(), PermissionMask::JOIN));
    }

    #[test]
    fn deny_applies_only_to_intersecting_masks() {
        let acl = AccessControlList::new(vec![
            AclEntry::deny(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::EXPORT,
            ),
            AclEntry::allow(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::VIEW,
            ),
        ]);
        assert!(acl.is_access_allowed(&subject(), PermissionMask::VIEW));
        assert!(!acl.is_access_allowed(&subject(), PermissionMask::EXPORT));
    }

    #[test]
    fn unmatched_principals_never_contribute() {
        let acl = AccessControlList::new(vec![AclEntry::allow(
            Principal::EndUser("bob@example.com".into()),
            PermissionMask::VIEW,
        )]);
        assert!(!acl.is_access_allowed(&subject(), PermissionMask::VIEW));
    }

    #[test]
    fn allowed_mask_accumulates_and_respects_denies() {
        let acl = AccessControlList::new(vec![
            AclEntry::allow(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::VIEW | PermissionMask::JOIN,
            ),
            AclEntry::deny(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::VIEW,
            ),
            AclEntry::allow(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::VIEW,
            ),
        ]);
        // A denied bit cannot be granted back by a later entry.
        assert_eq!(acl.allowed_mask(&subject()), PermissionMask::JOIN);
        assert_eq!(
            AccessControlList::default().allowed_mask(&subject()),
            PermissionMask::default()
        );
    }

    #[test]
    fn allowed_principals_excludes_denied() {
        let acl = AccessControlList::new(vec![
            AclEntry::allow(
                Principal::EndUser("alice@example.com".into()),
                PermissionMask::APPROVE_OTHERS,
            ),
            AclEntry::allow(
                Principal::EndUser("bob@example.com".into()),
                PermissionMask::APPROVE_OTHERS,
            ),
            AclEntry::deny(
                Principal::EndUser("bob@example.com".into()),
                PermissionMask::APPROVE_OTHERS,
            ),
        ]);
        let allowed = acl.allowed_principals(PermissionMask::APPROVE_OTHERS);
        assert!(allowed.contains(&Principal::EndUser("alice@example.com".into())));
        assert!(!allowed.contains(&Principal::EndUser("bob@example.com".into())));
    }

    #[test]
    fn concat_preserves_order_so_ancestor_deny_wins() {
        let parent = AccessControlList::new(vec![AclEntry::deny(
            Principal::EndUser("alice@example.com".into()),
            PermissionMask::JOIN,
        )]);
        let child = AccessControlList::new(vec![AclEntry::allow(
            Principal::EndUser("alice@example.com".into()),
            PermissionMask::JOIN,
        )]);
        let effective = AccessControlList::concat([&parent, &child]);
        assert!(!effective.is_access_allowed(&subject(), PermissionMask::JOIN));
    }

    #[test]
    fn mask_display_lists_named_bits() {
        let mask = PermissionMask::JOIN | PermissionMask::APPROVE_SELF;
        assert_eq!(mask.to_string(), "JOIN|APPROVE_SELF");
        assert_eq!(PermissionMask::default().to_string(), "NONE");
    }
}
