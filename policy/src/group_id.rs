use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_COMPONENT_LENGTH: usize = 64;

/// Identifier of a JIT group: the (environment, system, name) triple.
///
/// The external representation is `environment.system.name`. Components are
/// lowercase alphanumeric plus `-`, at most 64 characters, and never empty,
/// which keeps the derived cloud group email well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JitGroupId {
    environment: String,
    system: String,
    name: String,
}

impl JitGroupId {
    pub fn new(
        environment: impl Into<String>,
        system: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, InvalidJitGroupId> {
        let id = Self {
            environment: environment.into(),
            system: system.into(),
            name: name.into(),
        };
        for component in [&id.environment, &id.system, &id.name] {
            if !valid_component(component) {
                return Err(InvalidJitGroupId(id.to_string()));
            }
        }
        Ok(id)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn valid_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_COMPONENT_LENGTH
        && s.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl fmt::Display for JitGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.environment, self.system, self.name)
    }
}

impl FromStr for JitGroupId {
    type Err = InvalidJitGroupId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(environment), Some(system), Some(name), None) => {
                JitGroupId::new(environment, system, name).map_err(|_| InvalidJitGroupId(s.to_string()))
            }
            _ => Err(InvalidJitGroupId(s.to_string())),
        }
    }
}

impl TryFrom<String> for JitGroupId {
    type Error = InvalidJitGroupId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<JitGroupId> for String {
    fn from(id: JitGroupId) -> String {
        id.to_string()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a valid JIT group id")]
pub struct InvalidJitGroupId(pub String);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = JitGroupId::new("prod", "billing", "admins").unwrap();
        assert_eq!(id.to_string(), "prod.billing.admins");
        assert_eq!("prod.billing.admins".parse::<JitGroupId>().unwrap(), id);
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!("prod.billing".parse::<JitGroupId>().is_err());
        assert!("prod.billing.admins.extra".parse::<JitGroupId>().is_err());
        assert!("".parse::<JitGroupId>().is_err());
    }

    #[test]
    fn rejects_invalid_components() {
        assert!(JitGroupId::new("", "billing", "admins").is_err());
        assert!(JitGroupId::new("Prod", "billing", "admins").is_err());
        assert!(JitGroupId::new("prod", "billing", "team admins").is_err());
        assert!(JitGroupId::new("prod", "billing", "-admins").is_err());
        assert!(JitGroupId::new("prod", "billing", "a".repeat(65)).is_err());
    }

    #[test]
    fn accepts_digits_and_dashes() {
        assert!(JitGroupId::new("prod-1", "billing2", "team-admins").is_ok());
    }

    #[test]
    fn serde_uses_the_dotted_form() {
        let id = JitGroupId::new("prod", "billing", "admins").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"prod.billing.admins\"");
        let parsed: JitGroupId = serde_json::from_str("\"prod.billing.admins\"").unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<JitGroupId>("\"prod.billing\"").is_err());
    }
}
