//! Session Cache
//!
//! In-process mapping from a connection identity to a currently-valid
//! Service Layer session token. Injectable (constructor-owned `Arc`), so
//! tests get an isolated instance and a future shared store can replace it
//! without touching call sites.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::{ConnectionConfig, SESSION_SWEEP_INTERVAL_SECS, SESSION_TTL_SECS};

/// Cache key for one logical connection.
///
/// The password is intentionally NOT part of the key: two requests that
/// differ only in password map to the same identity, so a rotated password
/// keeps serving the stale session until natural expiry. Callers that rotate
/// credentials should call [`SessionCache::invalidate_all`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    server: String,
    company_db: String,
    username: String,
}

impl ConnectionIdentity {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            server: config.base_url().to_lowercase(),
            company_db: config.company_db.clone(),
            username: config.username.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub token: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

pub struct SessionCache {
    entries: DashMap<ConnectionIdentity, SessionEntry>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(SESSION_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached token only while it is still valid; an expired
    /// entry is evicted on the way out.
    pub fn get(&self, identity: &ConnectionIdentity) -> Option<String> {
        let expired = match self.entries.get(identity) {
            Some(entry) => {
                if Instant::now() < entry.expires_at {
                    debug!(user = %identity.username, "session cache hit");
                    return Some(entry.token.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(identity);
            debug!(user = %identity.username, "evicted expired session");
        }
        None
    }

    /// Overwrites any existing entry for the identity.
    pub fn put(&self, identity: ConnectionIdentity, token: String) {
        let now = Instant::now();
        self.entries.insert(
            identity,
            SessionEntry {
                token,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Idempotent removal.
    pub fn invalidate(&self, identity: &ConnectionIdentity) {
        self.entries.remove(identity);
    }

    /// Drops every cached session. Intended for credential-rotation callers,
    /// since the cache key does not include the password.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Evicts all expired entries; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodic hygiene task. Correctness never depends on it (eviction on
    /// `get` already handles expiry); it only bounds memory.
    pub fn spawn_sweeper(cache: Arc<SessionCache>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    info!(evicted, "session sweep evicted expired entries");
                }
            }
        })
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}
