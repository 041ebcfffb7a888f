use std::collections::HashMap;

use crate::entities::{AccountId, ServiceMetadata, WatchedPairKey};
use crate::session::SessionHandle;

/// Tracked state of one watched pair
#[derive(Debug)]
pub struct TrackedEntry {
    pub key: WatchedPairKey,
    pub service: ServiceMetadata,
    /// Last known enablement; `false` until first observed
    pub enabled: bool,
    pub session: Option<SessionHandle>,
    /// Fingerprint of the last state handed to the observer
    pub last_notified: Option<u64>,
}

impl TrackedEntry {
    pub fn new(key: WatchedPairKey, service: ServiceMetadata) -> Self {
        Self {
            key,
            service,
            enabled: false,
            session: None,
            last_notified: None,
        }
    }

    /// Cancel and discard the current session, if any
    pub fn clear_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cancel();
        }
    }

    /// Replace the current session, cancelling the previous one first
    pub fn install_session(&mut self, session: SessionHandle) {
        self.clear_session();
        self.session = Some(session);
    }

    pub fn has_running_session(&self) -> bool {
        self.session.as_ref().is_some_and(SessionHandle::is_running)
    }
}

/// Watched-pair registry. Only the reconciliation engine mutates it.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<WatchedPairKey, TrackedEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key`, creating it with `constructor` if absent.
    ///
    /// The flag is `true` when the entry was created by this call.
    pub fn upsert<F>(&mut self, key: WatchedPairKey, constructor: F) -> (&mut TrackedEntry, bool)
    where
        F: FnOnce() -> TrackedEntry,
    {
        let created = !self.entries.contains_key(&key);
        (self.entries.entry(key).or_insert_with(constructor), created)
    }

    pub fn get(&self, key: &WatchedPairKey) -> Option<&TrackedEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &WatchedPairKey) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(key)
    }

    /// Evict an entry, cancelling its session first
    pub fn remove(&mut self, key: &WatchedPairKey) -> Option<TrackedEntry> {
        let mut entry = self.entries.remove(key)?;
        entry.clear_session();
        Some(entry)
    }

    /// Evict every entry belonging to `account_id`; returns how many went
    pub fn remove_account(&mut self, account_id: AccountId) -> usize {
        let keys = self.keys_for_account(account_id);
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn keys_for_account(&self, account_id: AccountId) -> Vec<WatchedPairKey> {
        let mut keys: Vec<_> = self
            .entries
            .keys()
            .filter(|k| k.account_id == account_id)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Point-in-time copy of the registered keys
    pub fn snapshot(&self) -> Vec<WatchedPairKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict everything, cancelling all sessions
    pub fn clear(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.clear_session();
        }
    }
}
