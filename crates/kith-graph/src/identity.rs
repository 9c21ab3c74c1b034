//! Identity keys and profile metadata.
//!
//! Every entity in the graph is correlated by its [`IdentityKey`], the
//! participant's public key in whatever textual form the network uses.
//! Nothing else about a participant is assumed to be stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of leading characters kept by [`IdentityKey::short`].
const SHORT_LEN: usize = 8;

/// Opaque, globally unique participant identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Wrap a key without validation.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parse a key, rejecting empty or whitespace-only input.
    pub fn parse(key: &str) -> Result<Self> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyIdentity);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated display form, used as the fallback label when no
    /// profile can be resolved.
    pub fn short(&self) -> String {
        let mut chars = self.0.chars();
        let head: String = chars.by_ref().take(SHORT_LEN).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for IdentityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Profile metadata published by a participant.
///
/// Decoded from the JSON document carried by profile events. Fields the
/// graph does not understand are retained in `extra` so a renderer can
/// still show them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,

    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Profile {
    /// Decode a profile from its raw JSON metadata document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let profile: Profile = serde_json::from_str(raw).map_err(Error::InvalidProfile)?;
        Ok(profile)
    }

    /// Preferred human-readable name, if the profile carries one.
    ///
    /// `display_name` wins over `name`; blank values are ignored.
    pub fn preferred_name(&self) -> Option<&str> {
        [self.display_name.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Label for a node owned by `id`, falling back to the short key.
    pub fn label_for(&self, id: &IdentityKey) -> String {
        self.preferred_name()
            .map(str::to_string)
            .unwrap_or_else(|| id.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_blank() {
        assert!(IdentityKey::parse("   ").is_err());
        assert_eq!(IdentityKey::parse(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn short_form_truncates_long_keys() {
        let key = IdentityKey::new("0123456789abcdef");
        assert_eq!(key.short(), "01234567...");

        let tiny = IdentityKey::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn profile_decodes_and_keeps_unknown_fields() {
        let raw = r#"{"name":"alice","about":"hi","image":"https://x/a.png","lud16":"a@b"}"#;
        let profile = Profile::from_json(raw).unwrap();

        assert_eq!(profile.name.as_deref(), Some("alice"));
        assert_eq!(profile.picture.as_deref(), Some("https://x/a.png"));
        assert!(profile.extra.contains_key("lud16"));
    }

    #[test]
    fn profile_rejects_malformed_json() {
        assert!(matches!(
            Profile::from_json("{not json"),
            Err(Error::InvalidProfile(_))
        ));
    }

    #[test]
    fn preferred_name_skips_blank_display_name() {
        let profile = Profile {
            display_name: Some("  ".into()),
            name: Some("bob".into()),
            ..Default::default()
        };
        assert_eq!(profile.preferred_name(), Some("bob"));

        let id = IdentityKey::new("ffffffffffffffff");
        assert_eq!(Profile::default().label_for(&id), "ffffffff...");
    }
}
