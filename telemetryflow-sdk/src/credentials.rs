//! API key credentials used to authenticate against the collector.
use crate::error::{Error, Result};
use std::fmt;

/// Prefix every API key id must carry.
pub const KEY_ID_PREFIX: &str = "tfk_";
/// Prefix every API key secret must carry.
pub const KEY_SECRET_PREFIX: &str = "tfs_";

/// An immutable, validated API key pair.
///
/// The secret is never rendered by [`fmt::Display`] or [`fmt::Debug`].
///
/// ```
/// use telemetryflow_sdk::Credentials;
///
/// let credentials = Credentials::new("tfk_abc", "tfs_xyz").unwrap();
/// assert_eq!(credentials.to_string(), "tfk_abc:****");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    key_id: String,
    key_secret: String,
}

impl Credentials {
    /// Creates a new key pair, checking both fields for their required prefix.
    ///
    /// Both fields must be visible ASCII.
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Result<Self> {
        let key_id = key_id.into();
        let key_secret = key_secret.into();

        if key_id.is_empty() {
            return Err(Error::CredentialFormat("API key id is empty".into()));
        }
        if !key_id.starts_with(KEY_ID_PREFIX) {
            return Err(Error::CredentialFormat(format!(
                "API key id must start with '{KEY_ID_PREFIX}'"
            )));
        }
        if key_secret.is_empty() {
            return Err(Error::CredentialFormat("API key secret is empty".into()));
        }
        if !key_secret.starts_with(KEY_SECRET_PREFIX) {
            return Err(Error::CredentialFormat(format!(
                "API key secret must start with '{KEY_SECRET_PREFIX}'"
            )));
        }
        if !key_id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(Error::CredentialFormat(
                "API key id must be visible ASCII".into(),
            ));
        }
        if !key_secret.chars().all(|c| c.is_ascii_graphic()) {
            return Err(Error::CredentialFormat(
                "API key secret must be visible ASCII".into(),
            ));
        }

        Ok(Credentials { key_id, key_secret })
    }

    /// The API key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The API key secret.
    pub fn key_secret(&self) -> &str {
        &self.key_secret
    }

    /// The value sent as the `authorization` header or metadata entry.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}:{}", self.key_id, self.key_secret)
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:****", self.key_id)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"****")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn accessors_round_trip() {
        let credentials = Credentials::new("tfk_x", "tfs_y").unwrap();
        assert_eq!(credentials.key_id(), "tfk_x");
        assert_eq!(credentials.key_secret(), "tfs_y");
    }

    #[rstest]
    #[case("", "tfs_y")]
    #[case("invalid_key", "tfs_y")]
    #[case("TFK_x", "tfs_y")]
    #[case("tfk_x", "")]
    #[case("tfk_x", "secret")]
    #[case("tfk_x", "tfk_y")]
    #[case("tfk_é", "tfs_y")]
    #[case("tfk_x", "tfs_ y")]
    #[case("tfk_x", "tfs_y\n")]
    fn rejects_malformed_pairs(#[case] key_id: &str, #[case] key_secret: &str) {
        let result = Credentials::new(key_id, key_secret);
        assert!(
            matches!(result, Err(Error::CredentialFormat(_))),
            "expected a format error for ({key_id:?}, {key_secret:?})"
        );
    }

    #[test]
    fn authorization_header_is_deterministic() {
        let a = Credentials::new("tfk_x", "tfs_y").unwrap();
        let b = Credentials::new("tfk_x", "tfs_y").unwrap();
        assert_eq!(a.authorization_header(), b.authorization_header());
        assert_eq!(a.authorization_header(), "Bearer tfk_x:tfs_y");
        assert_eq!(a, b);
    }

    #[test]
    fn rendering_masks_the_secret() {
        let credentials = Credentials::new("tfk_x", "tfs_supersecret").unwrap();
        assert!(!credentials.to_string().contains("supersecret"));
        assert!(!format!("{credentials:?}").contains("supersecret"));
    }
}
