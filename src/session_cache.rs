//! In-memory cache of login sessions.
//!
//! A successful login issues a 128-bit session guid from the process CSPRNG
//! (uuid v4) and maps it to the authenticated account for a bounded TTL. A
//! token is valid iff it is present, unexpired, and mapped to the asserting
//! user. Disconnects do not delete the entry; they shorten its TTL so a quick
//! reconnect can keep the session.

use crate::xplatform::XPlatformId;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: XPlatformId,
    expires_at: Instant,
}

pub struct SessionCache {
    entries: DashMap<Uuid, SessionEntry>,
    ttl: Duration,
    disconnected_ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration, disconnected_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            disconnected_ttl,
        }
    }

    /// Issues a fresh session guid for a user and stores it at full TTL.
    pub fn issue(&self, user_id: XPlatformId) -> Uuid {
        let guid = Uuid::new_v4();
        self.entries.insert(
            guid,
            SessionEntry {
                user_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
        debug!("Issued session {guid} for {user_id}");
        guid
    }

    /// True iff the guid maps to this user and has not expired.
    pub fn validate(&self, guid: &Uuid, user_id: &XPlatformId) -> bool {
        match self.entries.get(guid) {
            Some(entry) => entry.user_id == *user_id && entry.expires_at > Instant::now(),
            None => false,
        }
    }

    /// Drops a session outright (re-login invalidates the prior session).
    pub fn remove(&self, guid: &Uuid) {
        self.entries.remove(guid);
    }

    /// Shortens a session's remaining TTL after its peer disconnected.
    ///
    /// An entry already closer to expiry than the disconnected TTL keeps its
    /// earlier deadline.
    pub fn mark_disconnected(&self, guid: &Uuid) {
        if let Some(mut entry) = self.entries.get_mut(guid) {
            let shortened = Instant::now() + self.disconnected_ttl;
            if shortened < entry.expires_at {
                entry.expires_at = shortened;
            }
        }
    }

    /// Evicts expired entries. Called periodically by the server.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u64) -> XPlatformId {
        XPlatformId::new(7, n)
    }

    fn cache() -> SessionCache {
        SessionCache::new(Duration::from_secs(3600), Duration::from_secs(300))
    }

    #[test]
    fn test_issued_session_validates_for_its_user_only() {
        let cache = cache();
        let guid = cache.issue(user(1));

        assert!(cache.validate(&guid, &user(1)));
        assert!(!cache.validate(&guid, &user(2)));
        assert!(!cache.validate(&Uuid::new_v4(), &user(1)));
    }

    #[test]
    fn test_issued_guids_are_unique() {
        let cache = cache();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(cache.issue(user(1))));
        }
    }

    #[test]
    fn test_removed_session_stops_validating() {
        let cache = cache();
        let guid = cache.issue(user(1));
        cache.remove(&guid);
        assert!(!cache.validate(&guid, &user(1)));
    }

    #[test]
    fn test_expired_session_stops_validating() {
        let cache = SessionCache::new(Duration::ZERO, Duration::ZERO);
        let guid = cache.issue(user(1));
        assert!(!cache.validate(&guid, &user(1)));

        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disconnect_shortens_but_keeps_the_session() {
        let cache = cache();
        let guid = cache.issue(user(1));
        cache.mark_disconnected(&guid);

        // Still valid within the disconnected window.
        assert!(cache.validate(&guid, &user(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disconnect_never_extends_expiry() {
        let cache = SessionCache::new(Duration::ZERO, Duration::from_secs(300));
        let guid = cache.issue(user(1));
        cache.mark_disconnected(&guid);
        // Already expired; the disconnect window must not revive it.
        assert!(!cache.validate(&guid, &user(1)));
    }
}
