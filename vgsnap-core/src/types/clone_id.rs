//! Clone identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Separator between the timestamp prefix and the environment tag.
pub const COPY_SEPARATOR: &str = "-copy-";

/// Name of a clone volume group: `{timestamp}-copy-{environment}`.
///
/// Ordering is by creation timestamp, then by the rendered identifier, so sorting
/// a set of identifiers yields creation order with a deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CloneIdentifier {
    timestamp: u64,
    environment: String,
}

impl CloneIdentifier {
    /// Create an identifier for a clone taken at `timestamp` (seconds since epoch).
    pub fn new(timestamp: u64, environment: impl Into<String>) -> Self {
        Self { timestamp, environment: environment.into() }
    }

    /// Parse a volume-group name. Returns `None` for names outside the clone namespace.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let (prefix, environment) = name.split_once(COPY_SEPARATOR)?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if environment.is_empty() || environment.contains(COPY_SEPARATOR) {
            return None;
        }
        let timestamp = prefix.parse().ok()?;
        Some(Self { timestamp, environment: environment.to_string() })
    }

    /// Creation timestamp embedded in the identifier.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Environment tag embedded in the identifier.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Whether the identifier lives in `environment`'s namespace.
    #[must_use]
    pub fn belongs_to(&self, environment: &str) -> bool {
        self.environment == environment
    }
}

impl fmt::Display for CloneIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.timestamp, COPY_SEPARATOR, self.environment)
    }
}

impl Ord for CloneIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl PartialOrd for CloneIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for CloneIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CloneIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid clone identifier: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id = CloneIdentifier::parse("1000-copy-prd").unwrap();
        assert_eq!(id.timestamp(), 1000);
        assert_eq!(id.environment(), "prd");
        assert_eq!(id.to_string(), "1000-copy-prd");
        assert!(id.belongs_to("prd"));
        assert!(!id.belongs_to("tst"));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(CloneIdentifier::parse("db01-data"), None);
        assert_eq!(CloneIdentifier::parse("-copy-prd"), None);
        assert_eq!(CloneIdentifier::parse("12a-copy-prd"), None);
        assert_eq!(CloneIdentifier::parse("1000-copy-"), None);
        assert_eq!(CloneIdentifier::parse("1000-copy-prd-copy-tst"), None);
    }

    #[test]
    fn test_ordering_is_numeric_then_lexicographic() {
        let mut ids = vec![
            CloneIdentifier::new(900, "prd"),
            CloneIdentifier::new(1000, "tst"),
            CloneIdentifier::new(1000, "prd"),
            CloneIdentifier::new(20, "prd"),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["20-copy-prd", "900-copy-prd", "1000-copy-prd", "1000-copy-tst"]);
    }

    #[test]
    fn test_serde_as_string() {
        let id = CloneIdentifier::new(4000, "prd");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"4000-copy-prd\"");
        let back: CloneIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<CloneIdentifier>("\"nope\"").is_err());
    }
}
