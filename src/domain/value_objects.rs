//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use std::fmt;

/// Canonical case-insensitive key for a user identifier.
///
/// The cache, the bounty set, and the identifier hash all key on the
/// trimmed, lower-cased form so that `@Alice`, `alice` and `ALICE `
/// refer to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey(String);

impl UserKey {
    pub fn new(identifier: &str) -> Self {
        Self(identifier.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_key_case_insensitive() {
        assert_eq!(UserKey::new("Alice"), UserKey::new("alice"));
        assert_eq!(UserKey::new("ALICE"), UserKey::new("alice"));
    }

    #[test]
    fn test_user_key_trims() {
        assert_eq!(UserKey::new("  bob  "), UserKey::new("bob"));
    }

    #[test]
    fn test_user_key_distinct_identifiers() {
        assert_ne!(UserKey::new("alice"), UserKey::new("alicia"));
    }

    #[test]
    fn test_user_key_hash_consistency() {
        let mut set = HashSet::new();
        set.insert(UserKey::new("Carol"));
        assert!(set.contains(&UserKey::new("carol")));
        assert!(!set.contains(&UserKey::new("dave")));
    }

    #[test]
    fn test_user_key_display() {
        assert_eq!(UserKey::new("Mallory").to_string(), "mallory");
    }
}
