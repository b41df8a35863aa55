//! Credential resolution: proxy-key gating plus round-robin rotation over the
//! configured upstream key pool.

use crate::config::AccessConfig;
use crate::error::{GatewayError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-wide credential state, constructed once at startup and shared
/// through `AppState`. The rotation cursor is a single atomic counter so
/// concurrent resolutions never observe a torn read.
pub struct KeyRing {
    pool: Vec<String>,
    proxy_keys: HashSet<String>,
    cursor: AtomicUsize,
}

impl KeyRing {
    pub fn new(pool: Vec<String>, proxy_keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            pool,
            proxy_keys: proxy_keys.into_iter().collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_access(pool: Vec<String>, access: &AccessConfig) -> Self {
        Self::new(pool, access.proxy_keys.iter().cloned())
    }

    /// Resolve the upstream credential for one request.
    ///
    /// Precedence:
    /// 1. proxy-key header matches the key set: accepted as a proxy key, and a
    ///    bearer token that differs from it becomes the upstream credential;
    /// 2. the bearer token itself matches the key set: treated as a proxy key,
    ///    upstream credential falls through to rotation;
    /// 3. key set is non-empty, nothing matched it, and no bearer token was
    ///    supplied at all: rejected;
    /// 4. a bearer token not consumed as a proxy key is used directly;
    /// 5. otherwise the next pool key is drawn by rotation.
    pub fn resolve(&self, bearer: Option<&str>, header_key: Option<&str>) -> Result<String> {
        let bearer = bearer.filter(|s| !s.is_empty());
        let header_key = header_key.filter(|s| !s.is_empty());

        if let Some(hk) = header_key {
            if self.proxy_keys.contains(hk) {
                if let Some(b) = bearer {
                    if b != hk {
                        return Ok(b.to_string());
                    }
                }
                return self.next_pool_key();
            }
        }

        if let Some(b) = bearer {
            if self.proxy_keys.contains(b) {
                return self.next_pool_key();
            }
        }

        if !self.proxy_keys.is_empty() && bearer.is_none() {
            return Err(GatewayError::auth("missing or invalid proxy key"));
        }

        if let Some(b) = bearer {
            return Ok(b.to_string());
        }

        self.next_pool_key()
    }

    /// The cursor advances by exactly one per fallthrough resolution,
    /// modulo the pool size, monotonic across the process lifetime.
    fn next_pool_key(&self) -> Result<String> {
        if self.pool.is_empty() {
            return Err(GatewayError::auth(
                "missing_key: no upstream credential available",
            ));
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.pool.len();
        Ok(self.pool[idx].clone())
    }
}
