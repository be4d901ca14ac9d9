//! Remote targets and their credentials.

use std::fmt;
use std::path::PathBuf;

/// How to authenticate to a target.
///
/// The dispatcher only reads credentials; they are never written to disk
/// or put on a command line.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication
    Password(String),
    /// Key-based authentication, with the agent or default keys when no file is given
    Key { identity_file: Option<PathBuf> },
}

impl Credential {
    /// Key authentication with the default identities.
    pub fn default_key() -> Self {
        Self::Key {
            identity_file: None,
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Self::Password(_))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Key { identity_file } => f
                .debug_struct("Key")
                .field("identity_file", identity_file)
                .finish(),
        }
    }
}

/// A remote host to run a payload on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl RemoteTarget {
    /// Target on port 22 as root, authenticating with default keys.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: 22,
            username: "root".to_string(),
            credential: Credential::default_key(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// `user@address`, as used by ssh and scp.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let target = RemoteTarget::new("pve1", "10.0.0.1")
            .with_credential(Credential::Password("hunter2".to_string()));
        let debug = format!("{target:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_builder_and_destination() {
        let target = RemoteTarget::new("pve2", "pve2.lan")
            .with_port(2222)
            .with_username("admin");
        assert_eq!(target.destination(), "admin@pve2.lan");
        assert_eq!(target.to_string(), "pve2 (pve2.lan:2222)");
        assert!(!target.credential.is_password());
    }
}
