//! Logical queue names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable logical name of a queue: a relating type plus a discriminating
/// postfix, written `relating:postfix` (e.g. `callback:/node/heron/client/joe/2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageId {
    relating: String,
    postfix: String,
}

impl StorageId {
    /// Relating type of subscriber callback queues.
    pub const CALLBACK: &'static str = "callback";
    /// Relating type of topic history queues.
    pub const HISTORY: &'static str = "history";
    /// Relating type of point-to-point subject queues.
    pub const SUBJECT: &'static str = "subject";
    /// Relating type of client side connection queues.
    pub const CONNECTION: &'static str = "connection";

    /// Creates a storage id from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `relating` is empty or contains `:`.
    pub fn new(relating: impl Into<String>, postfix: impl Into<String>) -> Result<Self> {
        let relating = relating.into().trim().to_string();
        if relating.is_empty() || relating.contains(':') {
            return Err(Error::InvalidInput(format!(
                "invalid relating type '{relating}'"
            )));
        }
        Ok(Self {
            relating,
            postfix: postfix.into().trim().to_string(),
        })
    }

    /// Parses `relating:postfix`; the first `:` separates the parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the separator is missing.
    pub fn parse(id: &str) -> Result<Self> {
        let Some((relating, postfix)) = id.split_once(':') else {
            return Err(Error::InvalidInput(format!(
                "separator ':' not found in storage id '{id}'"
            )));
        };
        Self::new(relating, postfix)
    }

    /// Returns the relating type.
    #[must_use]
    pub fn relating(&self) -> &str {
        &self.relating
    }

    /// Returns the postfix.
    #[must_use]
    pub fn postfix(&self) -> &str {
        &self.postfix
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.relating, self.postfix)
    }
}

impl TryFrom<String> for StorageId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StorageId> for String {
    fn from(id: StorageId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id = StorageId::parse("callback:/node/heron/client/joe/2").unwrap();
        assert_eq!(id.relating(), "callback");
        assert_eq!(id.postfix(), "/node/heron/client/joe/2");
        assert_eq!(id.to_string(), "callback:/node/heron/client/joe/2");
    }

    #[test]
    fn test_parse_requires_separator() {
        assert!(matches!(
            StorageId::parse("no-separator"),
            Err(Error::InvalidInput(_))
        ));
        assert!(StorageId::parse(":postfix").is_err());
    }

    #[test]
    fn test_postfix_may_contain_colons() {
        let id = StorageId::parse("history:http://xy:8080").unwrap();
        assert_eq!(id.postfix(), "http://xy:8080");
    }

    #[test]
    fn test_serde_as_string() {
        let id = StorageId::new(StorageId::SUBJECT, "joe").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"subject:joe\"");
        let back: StorageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
