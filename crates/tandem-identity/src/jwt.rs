use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use tracing::debug;

use tandem_types::api::Claims;

use crate::verifier::{AuthError, IdentityVerifier, VerifiedIdentity};

/// JWT-backed Identity Verifier. `sub` is the stable user identifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("token verification failed: {e}");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            }
        })?;

        Ok(VerifiedIdentity {
            user_id: data.claims.sub.clone(),
            email: data.claims.email.clone(),
            claims: data.claims,
        })
    }
}
