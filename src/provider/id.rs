//! Validated provider/group identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A validated provider or group id: non-empty, `[A-Za-z0-9_.-]`, ≤64 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Validate and wrap a raw id string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the id is empty, longer than 64 chars,
    /// or contains characters outside `[A-Za-z0-9_.-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > 64 {
            return Err(Error::Config(format!(
                "provider id must be 1-64 chars: {raw:?}"
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c)) {
            return Err(Error::Config(format!(
                "provider id contains invalid characters: {raw:?}"
            )));
        }
        Ok(Self(raw))
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProviderId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::borrow::Borrow<str> for ProviderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_id() {
        assert!(ProviderId::new("math-server_01").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(ProviderId::new("").is_err());
    }

    #[test]
    fn rejects_too_long() {
        assert!(ProviderId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn rejects_invalid_chars() {
        assert!(ProviderId::new("math server").is_err());
        assert!(ProviderId::new("math/server").is_err());
    }

    #[test]
    fn accepts_max_length() {
        assert!(ProviderId::new("a".repeat(64)).is_ok());
    }
}
