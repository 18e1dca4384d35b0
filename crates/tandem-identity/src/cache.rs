//! Explicit credential-verification cache. A mapping from token to
//! (identity, expiry) with explicit invalidation — owned by the verifier
//! wrapper, never ambient process state.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::verifier::{AuthError, IdentityVerifier, VerifiedIdentity};

struct CacheEntry {
    identity: VerifiedIdentity,
    expires_at: Instant,
}

pub struct TokenCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, token: &str) -> Option<VerifiedIdentity> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(token) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.identity.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    /// Cache an identity. The entry lives for the cache TTL or until the
    /// token itself expires, whichever comes first.
    pub fn insert(&self, token: &str, identity: VerifiedIdentity) {
        let ttl = self.ttl.min(remaining_token_life(identity.claims.exp));
        if ttl.is_zero() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                token.to_string(),
                CacheEntry {
                    identity,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    pub fn invalidate(&self, token: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(token);
        }
    }

    pub fn purge_expired(&self) {
        let now = Instant::now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, entry| entry.expires_at > now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remaining_token_life(exp: usize) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Duration::from_secs((exp as u64).saturating_sub(now))
}

/// Wraps any verifier with the cache and an explicit revocation set. Revoked
/// tokens fail `Revoked` even while a cached entry is still live.
pub struct CachingVerifier<V> {
    inner: V,
    cache: TokenCache,
    revoked: Mutex<HashSet<String>>,
}

impl<V> CachingVerifier<V> {
    pub fn new(inner: V, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TokenCache::new(ttl),
            revoked: Mutex::new(HashSet::new()),
        }
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut revoked) = self.revoked.lock() {
            revoked.insert(token.to_string());
        }
        self.cache.invalidate(token);
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    fn is_revoked(&self, token: &str) -> bool {
        self.revoked
            .lock()
            .map(|revoked| revoked.contains(token))
            .unwrap_or(false)
    }
}

impl<V: IdentityVerifier> IdentityVerifier for CachingVerifier<V> {
    fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        if self.is_revoked(token) {
            return Err(AuthError::Revoked);
        }
        if let Some(identity) = self.cache.get(token) {
            return Ok(identity);
        }

        let identity = self.inner.verify(token)?;
        self.cache.insert(token, identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_types::api::Claims;

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl CountingVerifier {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl IdentityVerifier for CountingVerifier {
        fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == "bad" {
                return Err(AuthError::InvalidToken);
            }
            Ok(identity(token))
        }
    }

    fn identity(user_id: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: user_id.into(),
            email: None,
            claims: Claims {
                sub: user_id.into(),
                email: None,
                exp: (SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap()
                    .as_secs()
                    + 3600) as usize,
            },
        }
    }

    #[test]
    fn second_verify_hits_the_cache() {
        let verifier = CachingVerifier::new(CountingVerifier::new(), Duration::from_secs(60));

        verifier.verify("tok").unwrap();
        verifier.verify("tok").unwrap();
        assert_eq!(verifier.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let verifier = CachingVerifier::new(CountingVerifier::new(), Duration::from_secs(60));

        assert!(verifier.verify("bad").is_err());
        assert!(verifier.verify("bad").is_err());
        assert_eq!(verifier.inner.calls.load(Ordering::SeqCst), 2);
        assert!(verifier.cache().is_empty());
    }

    #[test]
    fn revoked_token_fails_even_when_cached() {
        let verifier = CachingVerifier::new(CountingVerifier::new(), Duration::from_secs(60));

        verifier.verify("tok").unwrap();
        verifier.revoke("tok");
        assert_eq!(verifier.verify("tok").unwrap_err(), AuthError::Revoked);
    }

    #[test]
    fn invalidate_forces_reverification() {
        let verifier = CachingVerifier::new(CountingVerifier::new(), Duration::from_secs(60));

        verifier.verify("tok").unwrap();
        verifier.cache().invalidate("tok");
        verifier.verify("tok").unwrap();
        assert_eq!(verifier.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn entry_expiry_is_capped_by_token_exp() {
        let cache = TokenCache::new(Duration::from_secs(3600));
        let mut expired = identity("u1");
        expired.claims.exp = 0;

        cache.insert("tok", expired);
        assert!(cache.get("tok").is_none());
        assert!(cache.is_empty());
    }
}
