use crate::analysis::{AccessOptions, Analysis, AnalysisResult, InputSlot};
use crate::error::Error;
use crate::proposal::Proposal;
use jit_groups_policy::acl::PermissionMask;
use jit_groups_policy::constraint::ConstraintClass;
use jit_groups_policy::group_id::JitGroupId;
use jit_groups_policy::policy::JitGroupView;
use jit_groups_policy::principal::{Principal, Subject};
use jit_groups_provision::provisioner::Provisioner;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

/// A membership the provisioner has issued: the group joined and the
/// instant at which the membership lapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedMembership {
    pub group: JitGroupId,
    pub expiry: OffsetDateTime,
}

/// A user's attempt to join a group.
///
/// When the subject holds `JOIN | APPROVE_SELF` the operation self-approves
/// and analyzes the union of Join and Approve constraints; otherwise it
/// analyzes Join constraints only and the join must go through
/// [`JoinOperation::propose`].
pub struct JoinOperation {
    analysis: Analysis,
    requires_approval: bool,
    provisioner: Arc<Provisioner>,
}

impl JoinOperation {
    pub(crate) fn new(view: JitGroupView, subject: Subject, provisioner: Arc<Provisioner>) -> Self {
        let self_approval = view.effective_acl().is_access_allowed(
            &subject,
            PermissionMask::JOIN | PermissionMask::APPROVE_SELF,
        );
        let analysis = if self_approval {
            Analysis::new(
                view,
                subject,
                PermissionMask::JOIN | PermissionMask::APPROVE_SELF,
            )
            .with_constraints(ConstraintClass::Join)
            .with_constraints(ConstraintClass::Approve)
        } else {
            Analysis::new(view, subject, PermissionMask::JOIN)
                .with_constraints(ConstraintClass::Join)
        };
        Self {
            analysis,
            requires_approval: !self_approval,
            provisioner,
        }
    }

    /// Whether this join needs a peer approval before it can provision.
    pub fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    pub fn input(&self) -> &[InputSlot] {
        self.analysis.input()
    }

    pub fn set_input(&mut self, name: &str, raw: &str) -> Result<(), Error> {
        self.analysis.set_input(name, raw)
    }

    /// Runs the analysis without provisioning anything.
    pub fn dry_run(&self) -> AnalysisResult {
        self.analysis.execute()
    }

    /// Self-approves the join and provisions the membership.
    pub async fn execute(&self) -> Result<IssuedMembership, Error> {
        if self.requires_approval {
            return Err(Error::AccessDenied(
                "this join requires approval by another user".to_string(),
            ));
        }
        self.analysis.execute().verify_access(AccessOptions::Default)?;

        let values = self.analysis.input_values();
        let duration = Analysis::join_expiry(
            self.analysis.view(),
            values.iter().map(|(n, v)| (n.as_str(), v.as_str())),
        )?;
        let expiry = OffsetDateTime::now_utc() + duration;

        let group = self.analysis.view().id();
        self.provisioner
            .provision_membership(self.analysis.view(), self.analysis.subject().user(), expiry)
            .await?;
        info!(group = %group, user = self.analysis.subject().user(), "join self-approved");
        Ok(IssuedMembership { group, expiry })
    }

    /// Issues a proposal that delegates approval to the principals allowed
    /// `APPROVE_OTHERS` on the group, excluding the requesting user.
    pub fn propose(&self, expiry: OffsetDateTime) -> Result<Proposal, Error> {
        if !self.requires_approval {
            return Err(Error::InvalidArgument(
                "this join can be self-approved, there is nothing to propose".to_string(),
            ));
        }
        if expiry <= OffsetDateTime::now_utc() {
            return Err(Error::InvalidArgument(
                "the proposal expiry must be in the future".to_string(),
            ));
        }
        self.analysis.execute().verify_access(AccessOptions::Default)?;

        let subject = self.analysis.subject();
        let mut recipients = self
            .analysis
            .view()
            .effective_acl()
            .allowed_principals(PermissionMask::APPROVE_OTHERS);
        recipients.remove(&Principal::EndUser(subject.user().to_string()));
        if recipients.is_empty() {
            return Err(Error::NoApproversAvailable);
        }

        let group = self.analysis.view().id();
        info!(group = %group, user = subject.user(), recipients = recipients.len(), "proposal issued");
        Ok(Proposal::new(
            subject.user().to_string(),
            group,
            recipients,
            expiry,
            self.analysis.input_values().into_iter().collect(),
        ))
    }
}

/// An approver's side of a proposed join.
///
/// The analysis runs against the approver with Approve constraints; the
/// membership is provisioned for the proposal's user with the expiry
/// computed from the proposal's inputs.
pub struct ApprovalOperation {
    analysis: Analysis,
    proposal: Proposal,
    provisioner: Arc<Provisioner>,
}

impl ApprovalOperation {
    pub(crate) fn new(
        view: JitGroupView,
        subject: Subject,
        proposal: Proposal,
        provisioner: Arc<Provisioner>,
    ) -> Result<Self, Error> {
        if proposal.group != view.id() {
            return Err(Error::InvalidProposal(format!(
                "the proposal was issued for group '{}'",
                proposal.group
            )));
        }
        if proposal.expiry <= OffsetDateTime::now_utc() {
            return Err(Error::InvalidProposal("the proposal has expired".to_string()));
        }

        let required = if proposal.user == subject.user() {
            PermissionMask::APPROVE_SELF
        } else {
            PermissionMask::APPROVE_OTHERS
        };
        let mut analysis =
            Analysis::new(view, subject, required).with_constraints(ConstraintClass::Approve);
        // Carry over proposal inputs into same-named approve inputs so the
        // approver sees what the requester entered.
        for (name, value) in &proposal.input {
            if analysis.input().iter().any(|slot| slot.variable.name == *name) {
                analysis
                    .set_input(name, value)
                    .map_err(|e| Error::InvalidProposal(e.to_string()))?;
            }
        }
        Ok(Self {
            analysis,
            proposal,
            provisioner,
        })
    }

    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }

    pub fn input(&self) -> &[InputSlot] {
        self.analysis.input()
    }

    pub fn set_input(&mut self, name: &str, raw: &str) -> Result<(), Error> {
        self.analysis.set_input(name, raw)
    }

    pub fn dry_run(&self) -> AnalysisResult {
        self.analysis.execute()
    }

    /// Approves the proposal and provisions the membership for the
    /// joining user, then fires the proposal's completion callback.
    pub async fn execute(&self) -> Result<IssuedMembership, Error> {
        self.analysis.execute().verify_access(AccessOptions::Default)?;

        let duration = match Analysis::join_expiry(
            self.analysis.view(),
            self.proposal.input.iter().map(|(n, v)| (n.as_str(), v.as_str())),
        ) {
            Ok(duration) => duration,
            // The proposal must carry every input the expiry needs.
            Err(Error::InvalidArgument(reason)) => return Err(Error::InvalidProposal(reason)),
            Err(e) => return Err(e),
        };
        let expiry = OffsetDateTime::now_utc() + duration;

        let group = self.analysis.view().id();
        self.provisioner
            .provision_membership(self.analysis.view(), &self.proposal.user, expiry)
            .await?;
        info!(
            group = %group,
            user = %self.proposal.user,
            approver = self.analysis.subject().user(),
            "join approved"
        );
        self.proposal.completed();
        Ok(IssuedMembership { group, expiry })
    }
}
