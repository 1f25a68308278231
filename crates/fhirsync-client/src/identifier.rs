//! Business identifiers (`system` + `value`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    pub system: String,
    pub value: String,
}

impl Identifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
        }
    }

    /// First identifier of a record, which acts as its canonical key.
    ///
    /// Accepts both the list form and a lone identifier object. Returns
    /// `None` when either part is missing.
    pub fn first_of(record: &Value) -> Option<Self> {
        let identifier = match record.get("identifier")? {
            Value::Array(items) => items.first()?,
            other => other,
        };
        Some(Self::new(
            identifier.get("system")?.as_str()?,
            identifier.get("value")?.as_str()?,
        ))
    }

    /// Search token form, `system|value`.
    pub fn token(&self) -> String {
        format!("{}|{}", self.system, self.value)
    }

    /// Whether the system's last path segment names `resource_type`,
    /// ignoring case (`.../study/patient` for `Patient`).
    pub fn system_matches_type(&self, resource_type: &str) -> bool {
        self.system
            .rsplit('/')
            .next()
            .is_some_and(|segment| segment.eq_ignore_ascii_case(resource_type))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system, self.value)
    }
}

impl FromStr for Identifier {
    type Err = ClientError;

    /// Splits on the first `|`; the value may contain further `|`s.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.split_once('|') {
            Some((system, value)) if !system.is_empty() => Ok(Self::new(system, value)),
            _ => Err(ClientError::InvalidIdentifier(token.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_token() {
        let id: Identifier = "https://example.org/study/patient|P-1|extra".parse().unwrap();
        assert_eq!(id.system, "https://example.org/study/patient");
        assert_eq!(id.value, "P-1|extra");
        assert_eq!(id.to_string(), "https://example.org/study/patient|P-1|extra");

        assert!("no-separator".parse::<Identifier>().is_err());
        assert!("|value-only".parse::<Identifier>().is_err());
    }

    #[test]
    fn test_first_of_list_and_object() {
        let record = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "s1", "value": "v1"},
                {"system": "s2", "value": "v2"}
            ]
        });
        assert_eq!(Identifier::first_of(&record), Some(Identifier::new("s1", "v1")));

        let single = json!({"identifier": {"system": "s", "value": "v"}});
        assert_eq!(Identifier::first_of(&single), Some(Identifier::new("s", "v")));

        assert_eq!(Identifier::first_of(&json!({"identifier": []})), None);
        assert_eq!(Identifier::first_of(&json!({"identifier": [{"value": "v"}]})), None);
        assert_eq!(Identifier::first_of(&json!({"id": "x"})), None);
    }

    #[test]
    fn test_system_matches_type() {
        let id = Identifier::new("https://example.org/study/patient", "P-1");
        assert!(id.system_matches_type("Patient"));
        assert!(!id.system_matches_type("Observation"));

        let other = Identifier::new("https://example.org/study/participant", "P-1");
        assert!(!other.system_matches_type("Patient"));
    }
}
