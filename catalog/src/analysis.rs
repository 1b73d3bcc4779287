use crate::error::Error;
use jit_groups_policy::acl::PermissionMask;
use jit_groups_policy::constraint::{
    Constraint, ConstraintClass, ConstraintError, Facts, InputVariable,
};
use jit_groups_policy::policy::JitGroupView;
use jit_groups_policy::principal::Subject;
use time::Duration;

/// How strictly [`AnalysisResult::is_access_allowed`] interprets the
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOptions {
    /// ACL allows, no failed constraints, no unsatisfied constraints.
    Default,
    /// ACL allows; constraint outcomes are ignored.
    IgnoreConstraints,
}

/// One user-facing input of an analysis, published so callers can collect
/// a value before execution.
#[derive(Debug, Clone)]
pub struct InputSlot {
    pub variable: InputVariable,
    pub value: Option<String>,
}

/// Combined permission check and constraint evaluation for one subject
/// against one group.
///
/// Build with the required permission mask, append constraint classes,
/// populate the published inputs, then [`Analysis::execute`].
pub struct Analysis {
    view: JitGroupView,
    subject: Subject,
    required: PermissionMask,
    constraints: Vec<Constraint>,
    inputs: Vec<InputSlot>,
}

impl Analysis {
    pub fn new(view: JitGroupView, subject: Subject, required: PermissionMask) -> Self {
        Self {
            view,
            subject,
            required,
            constraints: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Appends the group's effective constraints of `class`. Constraints
    /// already present (by name) are kept, so `Join ∪ Approve` unions
    /// cleanly.
    pub fn with_constraints(mut self, class: ConstraintClass) -> Self {
        for constraint in self.view.effective_constraints(class) {
            if self.constraints.iter().any(|c| c.name() == constraint.name()) {
                continue;
            }
            for variable in constraint.variables() {
                if !self.inputs.iter().any(|slot| slot.variable.name == variable.name) {
                    self.inputs.push(InputSlot {
                        variable,
                        value: None,
                    });
                }
            }
            self.constraints.push(constraint);
        }
        self
    }

    /// The union of the input variables of all appended constraints.
    pub fn input(&self) -> &[InputSlot] {
        &self.inputs
    }

    /// Binds a raw value to a published input. The value is validated
    /// against the variable's declared type and bounds.
    pub fn set_input(&mut self, name: &str, raw: &str) -> Result<(), Error> {
        let slot = self
            .inputs
            .iter_mut()
            .find(|slot| slot.variable.name == name)
            .ok_or_else(|| Error::InvalidArgument(format!("no input named '{name}'")))?;
        slot.variable.parse(raw)?;
        slot.value = Some(raw.to_string());
        Ok(())
    }

    pub(crate) fn subject(&self) -> &Subject {
        &self.subject
    }

    pub(crate) fn view(&self) -> &JitGroupView {
        &self.view
    }

    /// Snapshot of the inputs that have been set, for proposals.
    pub(crate) fn input_values(&self) -> Vec<(String, String)> {
        self.inputs
            .iter()
            .filter_map(|slot| {
                slot.value
                    .as_ref()
                    .map(|value| (slot.variable.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Evaluates the ACL and every constraint in declaration order.
    pub fn execute(&self) -> AnalysisResult {
        let allowed_by_acl = self
            .view
            .effective_acl()
            .is_access_allowed(&self.subject, self.required);

        let group_id = self.view.id();
        let facts = Facts {
            subject_email: self.subject.user(),
            group: &group_id,
        };

        let mut result = AnalysisResult {
            allowed_by_acl,
            satisfied: Vec::new(),
            unsatisfied: Vec::new(),
            failed: Vec::new(),
        };
        for constraint in &self.constraints {
            let mut check = constraint.new_check();
            let mut bind_error = None;
            for slot in &self.inputs {
                if check.variables().iter().any(|v| v.name == slot.variable.name) {
                    if let Some(value) = &slot.value {
                        if let Err(e) = check.set(&slot.variable.name, value) {
                            bind_error = Some(e);
                            break;
                        }
                    }
                }
            }
            let outcome = match bind_error {
                Some(e) => Err(e),
                None => check.evaluate(facts),
            };
            match outcome {
                Ok(true) => result.satisfied.push(constraint.clone()),
                Ok(false) => result.unsatisfied.push(constraint.clone()),
                Err(e) => {
                    // A failed constraint is also an unsatisfied one.
                    result.unsatisfied.push(constraint.clone());
                    result.failed.push((constraint.clone(), e));
                }
            }
        }
        result
    }

    /// Resolves the membership duration from the effective Join expiry
    /// constraint and `inputs`.
    pub(crate) fn join_expiry<'a>(
        view: &JitGroupView,
        inputs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Duration, Error> {
        let constraints = view.effective_constraints(ConstraintClass::Join);
        let expiry = constraints
            .iter()
            .find(|c| matches!(c, Constraint::Expiry { .. }))
            .ok_or(Error::MissingExpiryConstraint)?;

        let mut check = expiry.new_check();
        for (name, raw) in inputs {
            if check.variables().iter().any(|v| v.name == name) {
                check.set(name, raw)?;
            }
        }
        let duration = expiry
            .membership_duration(&check)
            .expect("expiry constraints always yield a duration")?;
        if !duration.is_positive() {
            return Err(Error::InvalidArgument(
                "the membership duration must be positive".to_string(),
            ));
        }
        Ok(duration)
    }
}

/// Outcome of an [`Analysis`].
///
/// The partitions always cover every evaluated constraint; a constraint
/// whose evaluation raised appears in both `failed` and `unsatisfied`.
pub struct AnalysisResult {
    allowed_by_acl: bool,
    satisfied: Vec<Constraint>,
    unsatisfied: Vec<Constraint>,
    failed: Vec<(Constraint, ConstraintError)>,
}

impl AnalysisResult {
    pub fn is_allowed_by_acl(&self) -> bool {
        self.allowed_by_acl
    }

    pub fn satisfied(&self) -> &[Constraint] {
        &self.satisfied
    }

    pub fn unsatisfied(&self) -> &[Constraint] {
        &self.unsatisfied
    }

    pub fn failed(&self) -> &[(Constraint, ConstraintError)] {
        &self.failed
    }

    pub fn is_access_allowed(&self, options: AccessOptions) -> bool {
        match options {
            AccessOptions::IgnoreConstraints => self.allowed_by_acl,
            AccessOptions::Default => {
                self.allowed_by_acl && self.failed.is_empty() && self.unsatisfied.is_empty()
            }
        }
    }

    /// Returns the first applicable error: denial, then failed
    /// constraints, then unsatisfied constraints. The error lists all
    /// constraints of its kind.
    pub fn verify_access(&self, options: AccessOptions) -> Result<(), Error> {
        if !self.allowed_by_acl {
            return Err(Error::AccessDenied(
                "the subject is not allowed to perform this operation".to_string(),
            ));
        }
        if options == AccessOptions::IgnoreConstraints {
            return Ok(());
        }
        if !self.failed.is_empty() {
            return Err(Error::ConstraintFailed(
                self.failed.iter().map(|(c, _)| c.name().to_string()).collect(),
            ));
        }
        if !self.unsatisfied.is_empty() {
            return Err(Error::ConstraintUnsatisfied(
                self.unsatisfied.iter().map(|c| c.name().to_string()).collect(),
            ));
        }
        Ok(())
    }
}
