//! Authentication collaborator boundary.
//!
//! A [`Session`] describes who is asking the metadata repository for
//! documents. The engine never talks to the repository; it only carries the
//! session for the caller.

use std::fmt;

/// Credentials for repository requests.
///
/// Without a subject or token the session is public. The token is never
/// printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    subject: Option<String>,
    token: Option<String>,
}

impl Session {
    /// Build a session; blank values count as absent.
    pub fn new(subject: Option<&str>, token: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        let session = Self {
            subject: clean(subject),
            token: clean(token),
        };
        if session.is_public() {
            tracing::debug!("using public session");
        } else {
            tracing::debug!(
                subject = session.subject.as_deref().unwrap_or("<token subject>"),
                "using authenticated session"
            );
        }
        session
    }

    #[must_use]
    pub fn public() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.subject.is_none() && self.token.is_none()
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Value for an HTTP `Authorization` header.
    #[must_use]
    pub fn bearer_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.subject)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_session() {
        assert!(Session::new(None, None).is_public());
        assert!(Session::new(Some("  "), Some("")).is_public());
        assert_eq!(Session::public().bearer_header(), None);
    }

    #[test]
    fn test_token_session() {
        let session = Session::new(Some("CN=curator,DC=dataone,DC=org"), Some("eyJhbGciOi.secret"));
        assert!(!session.is_public());
        assert_eq!(session.subject(), Some("CN=curator,DC=dataone,DC=org"));
        assert_eq!(session.bearer_header().as_deref(), Some("Bearer eyJhbGciOi.secret"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::new(None, Some("eyJhbGciOi.secret"));
        let printed = format!("{session:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("secret"));
    }
}
