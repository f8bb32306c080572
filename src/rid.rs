use rusty_ulid::Ulid;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

/// Record identifier. A ULID string: time-sortable, so listing records by id
/// yields insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Rid(String);

impl Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Rid {
    type Err = rusty_ulid::DecodingError;

    /// Parses and validates a ULID; rejects malformed identifiers from the API.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_str(s)?;
        Ok(Rid(ulid.to_string()))
    }
}

impl Deref for Rid {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Rid> for String {
    fn from(fr: Rid) -> Self {
        fr.0
    }
}

impl Rid {
    #[inline]
    pub fn new() -> Rid {
        Rid(Ulid::generate().to_string())
    }
}

impl Default for Rid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rids_are_unique() {
        let a = Rid::new();
        let b = Rid::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        let rid = Rid::new();
        let parsed = Rid::from_str(&rid).unwrap();
        assert_eq!(rid, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Rid::from_str("not-a-ulid").is_err());
        assert!(Rid::from_str("").is_err());
    }
}
