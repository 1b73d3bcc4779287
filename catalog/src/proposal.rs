use crate::error::Error;
use async_trait::async_trait;
use jit_groups_policy::group_id::JitGroupId;
use jit_groups_policy::principal::Principal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

type OnCompleted = Arc<dyn Fn(&Proposal) + Send + Sync>;

/// A pending join that has been handed to peers for approval.
///
/// Immutable once issued. `recipients` holds the principals allowed to
/// approve, derived from the group's ACL minus the requesting user; the
/// `input` map snapshots the joining user's analysis inputs so the
/// approval can replay them.
#[derive(Clone)]
pub struct Proposal {
    pub user: String,
    pub group: JitGroupId,
    pub recipients: BTreeSet<Principal>,
    pub expiry: OffsetDateTime,
    pub input: BTreeMap<String, String>,
    on_completed: Option<OnCompleted>,
}

impl Proposal {
    pub fn new(
        user: String,
        group: JitGroupId,
        recipients: BTreeSet<Principal>,
        expiry: OffsetDateTime,
        input: BTreeMap<String, String>,
    ) -> Self {
        Self {
            user,
            group,
            recipients,
            expiry,
            input,
            on_completed: None,
        }
    }

    /// Registers a callback fired exactly once when the proposal is
    /// consumed by a successful approval.
    pub fn with_on_completed(mut self, callback: impl Fn(&Proposal) + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Arc::new(callback));
        self
    }

    pub(crate) fn completed(&self) {
        if let Some(callback) = &self.on_completed {
            callback(self);
        }
    }
}

impl fmt::Debug for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proposal")
            .field("user", &self.user)
            .field("group", &self.group)
            .field("recipients", &self.recipients)
            .field("expiry", &self.expiry)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Proposal {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user
            && self.group == other.group
            && self.recipients == other.recipients
            && self.expiry == other.expiry
            && self.input == other.input
    }
}

/// Wire form of a [`Proposal`], carried inside the signed token that
/// notifies approvers. Round-tripping preserves every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalPayload {
    pub user: String,
    pub group: JitGroupId,
    pub recipients: BTreeSet<Principal>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
}

impl From<&Proposal> for ProposalPayload {
    fn from(proposal: &Proposal) -> Self {
        Self {
            user: proposal.user.clone(),
            group: proposal.group.clone(),
            recipients: proposal.recipients.clone(),
            expiry: proposal.expiry,
            input: proposal.input.clone(),
        }
    }
}

impl From<ProposalPayload> for Proposal {
    fn from(payload: ProposalPayload) -> Self {
        Proposal::new(
            payload.user,
            payload.group,
            payload.recipients,
            payload.expiry,
            payload.input,
        )
    }
}

/// Capability that moves proposals between the broker and approvers as
/// opaque signed tokens.
///
/// The token format is the carrier's concern; the core only requires that
/// `verify` rejects tampered or expired tokens and that round-tripping is
/// lossless.
#[async_trait]
pub trait ProposalCarrier: Send + Sync {
    async fn sign(&self, payload: &ProposalPayload) -> Result<String, Error>;

    async fn verify(&self, token: &str) -> Result<ProposalPayload, Error>;
}
