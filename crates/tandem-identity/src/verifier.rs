use thiserror::Error;

use tandem_types::api::Claims;

/// Credential verification failures. These are always surfaced to the caller
/// and never retried by the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,
}

impl AuthError {
    /// Stable snake_case code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidToken => "invalid_token",
            Self::Expired => "token_expired",
            Self::Revoked => "token_revoked",
        }
    }
}

/// Identity resolved from an opaque credential.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub claims: Claims,
}

/// Verify an opaque credential into a stable user identifier. The gateway and
/// the HTTP middleware both consume this seam; tests substitute their own.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}
