use std::sync::Arc;

use tandem_db::Database;
use tandem_identity::IdentityVerifier;

/// Shared state for the HTTP read surfaces: the durable stores plus the
/// injected Identity Verifier (no ambient secrets in handlers).
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(db: Arc<Database>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { db, verifier }
    }
}
