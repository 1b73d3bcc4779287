use crate::error::Error;
use jit_groups_policy::group_id::JitGroupId;

/// Outcome of reconciling one provisioned group against the policy.
#[derive(Debug)]
pub enum ComplianceRecord {
    /// The cloud state matches the policy.
    Compliant { group: JitGroupId, email: String },

    /// A cloud group exists but the policy has no group with its id.
    Orphaned { group: JitGroupId, email: String },

    /// The policy has the group but reconciliation failed.
    Broken {
        group: JitGroupId,
        email: String,
        error: Error,
    },

    /// Surfaced untouched from a legacy policy's incompatibilities.
    Incompatible { email: String, detail: String },
}

impl ComplianceRecord {
    pub fn is_compliant(&self) -> bool {
        matches!(self, ComplianceRecord::Compliant { .. })
    }

    pub fn email(&self) -> &str {
        match self {
            ComplianceRecord::Compliant { email, .. }
            | ComplianceRecord::Orphaned { email, .. }
            | ComplianceRecord::Broken { email, .. }
            | ComplianceRecord::Incompatible { email, .. } => email,
        }
    }
}
