use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use super::host::HostIdentity;
use crate::auth::TrustLevel;
use crate::container::{ContainerId, ContainerRef};
use crate::policy::PermissionSet;

pub type SessionToken = String;

/// Log-safe prefix of a session token.
pub fn token_hint(token: &str) -> &str {
    let end = token.char_indices().nth(8).map(|(i, _)| i).unwrap_or(token.len());
    &token[..end]
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub host: Arc<HostIdentity>,
    pub container: ContainerRef,
    pub trust_level: TrustLevel,
    pub permissions: PermissionSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }
    pub fn is_expired(&self) -> bool { self.is_expired_at(Utc::now()) }
}

/// Result of a raw store lookup. Expired entries are removed as they are found.
#[derive(Debug)]
pub enum Lookup {
    Live(Session),
    Expired(Session),
    Missing,
}

/// Token-keyed session map split into independently locked shards.
pub struct SessionStore {
    shards: Box<[RwLock<HashMap<SessionToken, Session>>]>,
}

impl Default for SessionStore {
    fn default() -> Self { Self::new(16) }
}

impl SessionStore {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect::<Vec<_>>().into_boxed_slice();
        Self { shards }
    }

    fn shard(&self, token: &str) -> &RwLock<HashMap<SessionToken, Session>> {
        let idx = (xxh3_64(token.as_bytes()) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Store a session, returning any session previously held under the same token.
    pub fn put(&self, session: Session) -> Option<Session> {
        debug!(target: "hostgate::session", token = token_hint(&session.token), host = %session.host.host_id(), expires_at = %session.expires_at, "session stored");
        self.shard(&session.token).write().insert(session.token.clone(), session)
    }

    pub fn lookup(&self, token: &str) -> Lookup {
        let now = Utc::now();
        let shard = self.shard(token);
        {
            let map = shard.read();
            match map.get(token) {
                None => return Lookup::Missing,
                Some(s) if !s.is_expired_at(now) => return Lookup::Live(s.clone()),
                Some(_) => {}
            }
        }
        // re-check under the write lock; a concurrent lookup may already have removed it
        let mut map = shard.write();
        match map.get(token) {
            None => return Lookup::Missing,
            Some(s) if !s.is_expired_at(now) => return Lookup::Live(s.clone()),
            Some(_) => {}
        }
        match map.remove(token) {
            Some(s) => {
                debug!(target: "hostgate::session", token = token_hint(token), "expired session removed on lookup");
                Lookup::Expired(s)
            }
            None => Lookup::Missing,
        }
    }

    /// Live session for the token, if any.
    pub fn get(&self, token: &str) -> Option<Session> {
        match self.lookup(token) {
            Lookup::Live(s) => Some(s),
            _ => None,
        }
    }

    pub fn invalidate(&self, token: &str) -> Option<Session> { self.shard(token).write().remove(token) }

    /// Remove and return every expired session.
    pub fn drain_expired(&self) -> Vec<Session> {
        let now = Utc::now();
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let mut map = shard.write();
            let expired: Vec<SessionToken> = map.iter().filter(|(_, s)| s.is_expired_at(now)).map(|(k, _)| k.clone()).collect();
            for k in expired {
                if let Some(s) = map.remove(&k) {
                    out.push(s);
                }
            }
        }
        if !out.is_empty() {
            debug!(target: "hostgate::session", removed = out.len(), "expired sessions swept");
        }
        out
    }

    pub fn sweep_expired(&self) -> usize { self.drain_expired().len() }

    /// Remove and return everything.
    pub fn drain(&self) -> Vec<Session> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.write().drain().map(|(_, s)| s));
        }
        out
    }

    /// True if any unexpired session still points at the container.
    pub fn references_container(&self, id: &ContainerId) -> bool {
        let now = Utc::now();
        self.shards.iter().any(|shard| shard.read().values().any(|s| s.container.id() == id && !s.is_expired_at(now)))
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize { self.shards.iter().map(|s| s.read().len()).sum() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn expired_pending(&self) -> usize {
        let now = Utc::now();
        self.shards.iter().map(|s| s.read().values().filter(|x| x.is_expired_at(now)).count()).sum()
    }

    pub fn shard_count(&self) -> usize { self.shards.len() }
}
