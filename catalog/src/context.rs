use crate::error::Error;
use crate::operation::{ApprovalOperation, JoinOperation};
use crate::proposal::Proposal;
use crate::reconcile::ComplianceRecord;
use jit_groups_policy::acl::{AccessControlList, PermissionMask};
use jit_groups_policy::policy::{
    EnvironmentPolicy, JitGroupPolicy, JitGroupView, SystemPolicy,
};
use jit_groups_policy::principal::Subject;
use jit_groups_provision::provisioner::Provisioner;
use std::sync::Arc;
use tracing::warn;

/// An environment the subject is allowed to see.
pub struct EnvironmentContext {
    subject: Subject,
    policy: Arc<EnvironmentPolicy>,
    provisioner: Arc<Provisioner>,
}

impl EnvironmentContext {
    pub(crate) fn new(
        subject: Subject,
        policy: Arc<EnvironmentPolicy>,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self {
            subject,
            policy,
            provisioner,
        }
    }

    pub fn policy(&self) -> &EnvironmentPolicy {
        &self.policy
    }

    /// The systems the subject is allowed to see.
    pub fn systems(&self) -> Vec<SystemContext> {
        (0..self.policy.systems.len())
            .filter(|&index| self.system_visible(index))
            .map(|index| self.system_context(index))
            .collect()
    }

    pub fn system(&self, name: &str) -> Option<SystemContext> {
        let (index, _) = self.policy.system(name)?;
        self.system_visible(index).then(|| self.system_context(index))
    }

    fn system_visible(&self, index: usize) -> bool {
        // Any permission implies VIEW for navigation.
        !AccessControlList::concat([&self.policy.acl, &self.policy.systems[index].acl])
            .allowed_mask(&self.subject)
            .is_empty()
    }

    fn system_context(&self, index: usize) -> SystemContext {
        SystemContext {
            subject: self.subject.clone(),
            policy: self.policy.clone(),
            system_index: index,
            provisioner: self.provisioner.clone(),
        }
    }

    pub fn can_export(&self) -> bool {
        self.policy
            .acl
            .is_access_allowed(&self.subject, PermissionMask::EXPORT)
    }

    /// Serializes the environment policy document.
    pub fn export(&self) -> Result<String, Error> {
        if !self.can_export() {
            return Err(Error::AccessDenied(
                "the subject is not allowed to export this environment".to_string(),
            ));
        }
        Ok(self.policy.to_json()?)
    }

    pub fn can_reconcile(&self) -> bool {
        self.policy
            .acl
            .is_access_allowed(&self.subject, PermissionMask::RECONCILE)
    }

    /// Walks every provisioned group of the environment and classifies it.
    ///
    /// Best-effort: a group that cannot be reconciled is reported as
    /// broken, it never aborts the walk. Subjects without RECONCILE get an
    /// empty report.
    pub async fn reconcile(&self) -> Result<Vec<ComplianceRecord>, Error> {
        if !self.can_reconcile() {
            return Ok(Vec::new());
        }
        let provisioned = self
            .provisioner
            .provisioned_groups(&self.policy.name)
            .await?;

        let mut records = Vec::new();
        for group in provisioned {
            match JitGroupView::resolve(self.policy.clone(), &group.id) {
                None => records.push(ComplianceRecord::Orphaned {
                    group: group.id,
                    email: group.email,
                }),
                Some(view) => match self.provisioner.reconcile(&view).await {
                    Ok(()) => records.push(ComplianceRecord::Compliant {
                        group: group.id,
                        email: group.email,
                    }),
                    Err(e) => {
                        warn!(group = %group.id, error = %e, "reconciliation failed");
                        records.push(ComplianceRecord::Broken {
                            group: group.id,
                            email: group.email,
                            error: e.into(),
                        });
                    }
                },
            }
        }
        for incompatibility in &self.policy.incompatibilities {
            records.push(ComplianceRecord::Incompatible {
                email: incompatibility.group_email.clone(),
                detail: incompatibility.detail.clone(),
            });
        }
        Ok(records)
    }
}

/// A system the subject is allowed to see.
pub struct SystemContext {
    subject: Subject,
    policy: Arc<EnvironmentPolicy>,
    system_index: usize,
    provisioner: Arc<Provisioner>,
}

impl SystemContext {
    pub fn policy(&self) -> &SystemPolicy {
        &self.policy.systems[self.system_index]
    }

    /// The groups the subject is allowed to see.
    pub fn groups(&self) -> Vec<JitGroupContext> {
        (0..self.policy().groups.len())
            .filter_map(|index| self.group_context(index))
            .collect()
    }

    pub fn group(&self, name: &str) -> Option<JitGroupContext> {
        let (index, _) = self.policy().group(name)?;
        self.group_context(index)
    }

    fn group_context(&self, group_index: usize) -> Option<JitGroupContext> {
        let view = JitGroupView::new(self.policy.clone(), self.system_index, group_index)?;
        (!view.effective_acl().allowed_mask(&self.subject).is_empty()).then(|| JitGroupContext {
            subject: self.subject.clone(),
            view,
            provisioner: self.provisioner.clone(),
        })
    }
}

/// A JIT group the subject is allowed to see; entry point for the join and
/// approval workflow.
pub struct JitGroupContext {
    subject: Subject,
    view: JitGroupView,
    provisioner: Arc<Provisioner>,
}

impl JitGroupContext {
    pub fn id(&self) -> jit_groups_policy::group_id::JitGroupId {
        self.view.id()
    }

    pub fn policy(&self) -> &JitGroupPolicy {
        self.view.policy()
    }

    /// Starts a join attempt for the subject.
    pub fn join(&self) -> JoinOperation {
        JoinOperation::new(
            self.view.clone(),
            self.subject.clone(),
            self.provisioner.clone(),
        )
    }

    /// Starts an approval of `proposal` by the subject.
    pub fn approve(&self, proposal: Proposal) -> Result<ApprovalOperation, Error> {
        ApprovalOperation::new(
            self.view.clone(),
            self.subject.clone(),
            proposal,
            self.provisioner.clone(),
        )
    }
}
