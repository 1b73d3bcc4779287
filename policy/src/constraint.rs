use crate::group_id::JitGroupId;
use minijinja::value::ValueKind;
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::Duration;

/// Name of the well-known input through which a joining user picks the
/// membership duration for range expiry constraints.
pub const EXPIRY_INPUT: &str = "expiry";

/// The point in the workflow at which a constraint is enforced.
///
/// `Join` constraints apply when a user requests to join; `Approve`
/// constraints apply when the join is approved, which includes the join
/// itself when the user self-approves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintClass {
    Join,
    Approve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum InputKind {
    Bool,
    #[serde(rename_all = "camelCase")]
    Text { min_len: usize, max_len: usize },
    #[serde(rename_all = "camelCase")]
    Long { min: i64, max: i64 },
}

/// A typed input a constraint expects the user to populate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputVariable {
    pub name: String,
    pub display_name: String,
    #[serde(flatten)]
    pub kind: InputKind,
}

impl InputVariable {
    /// Parses a raw value against the declared type and bounds.
    pub fn parse(&self, raw: &str) -> Result<InputValue, ConstraintError> {
        parse_input(self, raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Bool(bool),
    Text(String),
    Long(i64),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// An input value failed to parse or violated its declared bounds.
    #[error("invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    /// The predicate expression could not be evaluated. Distinct from the
    /// predicate evaluating to false.
    #[error("evaluation of constraint '{name}' failed: {reason}")]
    EvaluationFailed { name: String, reason: String },
}

/// A policy constraint.
///
/// Predicate constraints evaluate a boolean expression over their declared
/// inputs plus contextual facts about the subject and the group. Expiry
/// constraints bound the duration of the provisioned membership; `min ==
/// max` models a fixed duration, anything else lets the joining user pick a
/// value through the [`EXPIRY_INPUT`] input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Constraint {
    #[serde(rename_all = "camelCase")]
    Predicate {
        name: String,
        display_name: String,
        expression: String,
        #[serde(default)]
        variables: Vec<InputVariable>,
    },
    #[serde(rename_all = "camelCase")]
    Expiry {
        #[serde(with = "duration_seconds")]
        min: Duration,
        #[serde(with = "duration_seconds")]
        max: Duration,
    },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::Predicate { name, .. } => name,
            Constraint::Expiry { .. } => EXPIRY_INPUT,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Constraint::Predicate { display_name, .. } => display_name,
            Constraint::Expiry { .. } => "Membership duration",
        }
    }

    /// The input variables callers must surface to the user.
    pub fn variables(&self) -> Vec<InputVariable> {
        match self {
            Constraint::Predicate { variables, .. } => variables.clone(),
            Constraint::Expiry { min, max } if min == max => Vec::new(),
            Constraint::Expiry { min, max } => vec![InputVariable {
                name: EXPIRY_INPUT.to_string(),
                display_name: "Duration in seconds".to_string(),
                kind: InputKind::Long {
                    min: min.whole_seconds(),
                    max: max.whole_seconds(),
                },
            }],
        }
    }

    /// Creates a single-shot check for this constraint.
    pub fn new_check(&self) -> Check<'_> {
        Check {
            constraint: self,
            variables: self.variables(),
            values: Vec::new(),
        }
    }

    /// Resolves the membership duration from a bound check. `None` for
    /// predicate constraints.
    pub fn membership_duration(&self, check: &Check<'_>) -> Option<Result<Duration, ConstraintError>> {
        match self {
            Constraint::Predicate { .. } => None,
            Constraint::Expiry { min, max } if min == max => Some(Ok(*min)),
            Constraint::Expiry { .. } => Some(match check.value(EXPIRY_INPUT) {
                // Bounds were enforced when the value was set.
                Some(InputValue::Long(seconds)) => Ok(Duration::seconds(*seconds)),
                _ => Err(ConstraintError::InvalidInput {
                    name: EXPIRY_INPUT.to_string(),
                    reason: "no duration provided".to_string(),
                }),
            }),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Constraint::Predicate {
                name,
                expression,
                variables,
                ..
            } => {
                if name.is_empty() {
                    return Err("predicate constraint without a name".to_string());
                }
                if expression.trim().is_empty() {
                    return Err(format!("constraint '{name}' has an empty expression"));
                }
                for variable in variables {
                    if variable.name.is_empty()
                        || !variable
                            .name
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(format!(
                            "constraint '{name}' declares invalid variable '{}'",
                            variable.name
                        ));
                    }
                    match variable.kind {
                        InputKind::Text { min_len, max_len } if min_len > max_len => {
                            return Err(format!(
                                "variable '{}' has inverted length bounds",
                                variable.name
                            ));
                        }
                        InputKind::Long { min, max } if min > max => {
                            return Err(format!("variable '{}' has inverted bounds", variable.name));
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
            Constraint::Expiry { min, max } => {
                if !min.is_positive() {
                    return Err("expiry constraint must have a positive minimum".to_string());
                }
                if min > max {
                    return Err("expiry constraint has min > max".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Contextual facts every predicate expression can reference, next to its
/// declared input variables.
#[derive(Debug, Clone, Copy)]
pub struct Facts<'a> {
    pub subject_email: &'a str,
    pub group: &'a JitGroupId,
}

/// A single-shot evaluation of one constraint.
///
/// Inputs are bound by name through [`Check::set`]; variables left unset
/// evaluate with their declared defaults (false, "", 0).
pub struct Check<'a> {
    constraint: &'a Constraint,
    variables: Vec<InputVariable>,
    values: Vec<(String, InputValue)>,
}

impl Check<'_> {
    pub fn variables(&self) -> &[InputVariable] {
        &self.variables
    }

    /// Parses and binds `raw` to the variable `name`.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(), ConstraintError> {
        let variable = self
            .variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ConstraintError::InvalidInput {
                name: name.to_string(),
                reason: "not declared by this constraint".to_string(),
            })?;
        let value = parse_input(variable, raw)?;
        self.values.retain(|(n, _)| n != name);
        self.values.push((name.to_string(), value));
        Ok(())
    }

    fn value(&self, name: &str) -> Option<&InputValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Evaluates the constraint. `Ok(false)` means the constraint is
    /// unsatisfied; `Err` means evaluation itself failed.
    pub fn evaluate(&self, facts: Facts<'_>) -> Result<bool, ConstraintError> {
        match self.constraint {
            Constraint::Predicate { name, expression, .. } => {
                self.evaluate_expression(name, expression, facts)
            }
            Constraint::Expiry { min, max } => {
                if min == max {
                    return Ok(true);
                }
                match self.value(EXPIRY_INPUT) {
                    Some(InputValue::Long(_)) => Ok(true),
                    // Default of 0 is never a valid duration.
                    _ => Ok(false),
                }
            }
        }
    }

    fn evaluate_expression(
        &self,
        name: &str,
        expression: &str,
        facts: Facts<'_>,
    ) -> Result<bool, ConstraintError> {
        let failed = |reason: String| ConstraintError::EvaluationFailed {
            name: name.to_string(),
            reason,
        };

        let mut context = serde_json::Map::new();
        for variable in &self.variables {
            let value = match self.value(&variable.name) {
                Some(InputValue::Bool(b)) => json!(b),
                Some(InputValue::Text(s)) => json!(s),
                Some(InputValue::Long(n)) => json!(n),
                None => match &variable.kind {
                    InputKind::Bool => json!(false),
                    InputKind::Text { .. } => json!(""),
                    InputKind::Long { .. } => json!(0),
                },
            };
            context.insert(variable.name.clone(), value);
        }
        // Facts shadow same-named variables.
        context.insert("subject".to_string(), json!({ "email": facts.subject_email }));
        context.insert(
            "group".to_string(),
            json!({
                "environment": facts.group.environment(),
                "system": facts.group.system(),
                "name": facts.group.name(),
                "id": facts.group.to_string(),
            }),
        );

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        let expr = env
            .compile_expression(expression)
            .map_err(|e| failed(e.to_string()))?;
        let value = expr.eval(&context).map_err(|e| failed(e.to_string()))?;
        if value.kind() != ValueKind::Bool {
            return Err(failed(format!(
                "expression produced {} instead of a boolean",
                value.kind()
            )));
        }
        Ok(value.is_true())
    }
}

fn parse_input(variable: &InputVariable, raw: &str) -> Result<InputValue, ConstraintError> {
    let invalid = |reason: String| ConstraintError::InvalidInput {
        name: variable.name.clone(),
        reason,
    };
    match &variable.kind {
        InputKind::Bool => raw
            .parse::<bool>()
            .map(InputValue::Bool)
            .map_err(|_| invalid(format!("'{raw}' is not a boolean"))),
        InputKind::Text { min_len, max_len } => {
            if raw.len() < *min_len || raw.len() > *max_len {
                Err(invalid(format!(
                    "length must be between {min_len} and {max_len}"
                )))
            } else {
                Ok(InputValue::Text(raw.to_string()))
            }
        }
        InputKind::Long { min, max } => {
            let value = raw
                .parse::<i64>()
                .map_err(|_| invalid(format!("'{raw}' is not a number")))?;
            if value < *min || value > *max {
                Err(invalid(format!("must be between {min} and {max}")))
            } else {
                Ok(InputValue::Long(value))
            }
        }
    }
}

mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(d.whole_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(seconds))
    }
}
