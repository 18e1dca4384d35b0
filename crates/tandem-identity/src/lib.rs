pub mod cache;
pub mod jwt;
pub mod verifier;

pub use cache::{CachingVerifier, TokenCache};
pub use jwt::JwtVerifier;
pub use verifier::{AuthError, IdentityVerifier, VerifiedIdentity};
