//! Basic authentication of devices.
//!
//! Passwords are kept as SHA-256 digests of `user:password` and compared
//! against the digest of what a device sends in its header credentials.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use syncml_engine::{AuthOutcome, Authenticator};
use syncml_protocol::Cred;
use tracing::debug;

fn digest(user: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Checks `syncml:auth-basic` credentials against a user table.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthenticator {
    users: HashMap<String, [u8; 32]>,
}

impl BasicAuthenticator {
    /// Creates an authenticator without users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user.
    pub fn with_user(mut self, user: impl Into<String>, password: &str) -> Self {
        let user = user.into();
        let hash = digest(&user, password);
        self.users.insert(user, hash);
        self
    }

    /// Returns the number of known users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, device_id: &str, cred: Option<&Cred>) -> AuthOutcome {
        let Some(cred) = cred else {
            return AuthOutcome::Missing;
        };
        let Some((user, password)) = cred.decode_basic() else {
            debug!(device = device_id, auth_type = cred.auth_type(), "unusable credentials");
            return AuthOutcome::Rejected;
        };
        match self.users.get(&user) {
            Some(expected) if *expected == digest(&user, &password) => AuthOutcome::Accepted,
            _ => {
                debug!(device = device_id, user = %user, "credentials rejected");
                AuthOutcome::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_protocol::Meta;

    fn authenticator() -> BasicAuthenticator {
        BasicAuthenticator::new()
            .with_user("alice", "secret")
            .with_user("bob", "hunter2")
    }

    #[test]
    fn accepts_known_user() {
        let auth = authenticator();
        assert_eq!(auth.user_count(), 2);
        let cred = Cred::basic("alice", "secret");
        assert_eq!(auth.authenticate("IMEI:1", Some(&cred)), AuthOutcome::Accepted);
    }

    #[test]
    fn rejects_wrong_password_and_unknown_user() {
        let auth = authenticator();
        let wrong = Cred::basic("alice", "hunter2");
        assert_eq!(auth.authenticate("IMEI:1", Some(&wrong)), AuthOutcome::Rejected);
        let unknown = Cred::basic("mallory", "secret");
        assert_eq!(auth.authenticate("IMEI:1", Some(&unknown)), AuthOutcome::Rejected);
    }

    #[test]
    fn missing_credentials() {
        assert_eq!(authenticator().authenticate("IMEI:1", None), AuthOutcome::Missing);
    }

    #[test]
    fn rejects_other_auth_types() {
        let cred = Cred {
            meta: Meta::with_type("syncml:auth-md5"),
            data: "Zm9v".to_string(),
        };
        assert_eq!(authenticator().authenticate("IMEI:1", Some(&cred)), AuthOutcome::Rejected);
    }

    #[test]
    fn password_may_contain_colons() {
        let auth = BasicAuthenticator::new().with_user("carol", "a:b:c");
        let cred = Cred::basic("carol", "a:b:c");
        assert_eq!(auth.authenticate("IMEI:2", Some(&cred)), AuthOutcome::Accepted);
    }
}
