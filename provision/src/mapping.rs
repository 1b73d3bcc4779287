use jit_groups_policy::group_id::JitGroupId;

const GROUP_PREFIX: &str = "jit";

/// Deterministic mapping between JIT group ids and cloud identity group
/// emails: `jit.<environment>.<system>.<name>@<primary-domain>`.
///
/// Pure string work, no I/O.
#[derive(Debug, Clone)]
pub struct GroupMapping {
    primary_domain: String,
}

impl GroupMapping {
    pub fn new(primary_domain: impl Into<String>) -> Self {
        Self {
            primary_domain: primary_domain.into(),
        }
    }

    pub fn group_email(&self, id: &JitGroupId) -> String {
        format!(
            "{GROUP_PREFIX}.{}.{}.{}@{}",
            id.environment(),
            id.system(),
            id.name(),
            self.primary_domain
        )
    }

    /// Email prefix shared by every provisioned group of an environment.
    pub fn environment_prefix(&self, environment: &str) -> String {
        format!("{GROUP_PREFIX}.{environment}.")
    }

    /// Parses a group email back into its id. Only addresses produced by
    /// [`Self::group_email`] for the configured domain are accepted.
    pub fn parse(&self, email: &str) -> Option<JitGroupId> {
        let (local, domain) = email.split_once('@')?;
        if !domain.eq_ignore_ascii_case(&self.primary_domain) {
            return None;
        }
        let mut parts = local.split('.');
        match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(GROUP_PREFIX), Some(environment), Some(system), Some(name), None) => {
                JitGroupId::new(environment, system, name).ok()
            }
            _ => None,
        }
    }
}
