//! Server-side authentication of devices.

use syncml_protocol::Cred;

/// Result of checking the credentials of a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The credentials are valid.
    Accepted,
    /// Authentication is required but the header carries no credentials.
    Missing,
    /// The credentials are invalid.
    Rejected,
    /// No authentication takes place.
    NotRequired,
}

/// Checks device credentials.
pub trait Authenticator: Send + Sync {
    /// Checks the credentials a device sent in its header.
    fn authenticate(&self, device_id: &str, cred: Option<&Cred>) -> AuthOutcome;
}

/// Accepts any device that sends credentials, whatever they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyCredentials;

impl Authenticator for AnyCredentials {
    fn authenticate(&self, _device_id: &str, cred: Option<&Cred>) -> AuthOutcome {
        match cred {
            Some(_) => AuthOutcome::Accepted,
            None => AuthOutcome::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_credentials_needs_some() {
        let auth = AnyCredentials;
        assert_eq!(auth.authenticate("dev", None), AuthOutcome::Missing);
        let cred = Cred::basic("a", "b");
        assert_eq!(auth.authenticate("dev", Some(&cred)), AuthOutcome::Accepted);
    }
}
