use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::entities::AccountState;
use crate::ports::AccountObserver;
use crate::registry::TrackedEntry;

/// Build the observer-facing state of an entry from its current session.
///
/// A failed attempt carries no credential fields at all; a disabled entry
/// carries none either, since its session has been cleared.
pub fn account_state(entry: &TrackedEntry) -> AccountState {
    let session = entry.session.as_ref();
    let error = session.and_then(|s| s.failure()).cloned();
    let parameters = session
        .and_then(|s| s.auth_parameters())
        .filter(|_| error.is_none());
    let data = session.and_then(|s| s.result());

    AccountState {
        account_id: entry.key.account_id,
        service_type: entry.service.service_type.clone(),
        service_name: entry.service.name().to_string(),
        enabled: entry.enabled,
        error,
        client_id: parameters.and_then(|p| p.client_id.clone()),
        client_secret: parameters.and_then(|p| p.client_secret.clone()),
        access_token: data.and_then(|d| d.access_token.clone()),
        token_secret: data.and_then(|d| d.token_secret.clone()),
        user_name: data.and_then(|d| d.user_name.clone()),
        secret: data.and_then(|d| d.secret.clone()),
    }
}

/// Fingerprint of the parts of a state the observer cares about.
pub fn signature(state: &AccountState) -> u64 {
    let mut hasher = DefaultHasher::new();
    state.enabled.hash(&mut hasher);
    state.error.is_some().hash(&mut hasher);
    state.client_id.hash(&mut hasher);
    state.client_secret.hash(&mut hasher);
    state.access_token.hash(&mut hasher);
    state.token_secret.hash(&mut hasher);
    state.user_name.hash(&mut hasher);
    state.secret.hash(&mut hasher);
    hasher.finish()
}

/// Delivers account states to the single observer, once per distinct state.
pub struct NotificationDispatcher<O> {
    observer: O,
}

impl<O: AccountObserver> NotificationDispatcher<O> {
    pub fn new(observer: O) -> Self {
        Self { observer }
    }

    /// Notify the observer about `entry` unless it already saw this state.
    ///
    /// Returns whether the observer was called.
    pub fn notify(&self, entry: &mut TrackedEntry) -> bool {
        let state = account_state(entry);
        let signature = signature(&state);

        if entry.last_notified == Some(signature) {
            debug!(key = %entry.key, "state unchanged, not notifying");
            return false;
        }

        trace!(key = %entry.key, enabled = state.enabled, error = state.is_error(), "notifying observer");
        entry.last_notified = Some(signature);
        self.observer.on_account_state(&state);
        true
    }
}

/// Observer forwarding every state into a channel.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<AccountState>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<AccountState>) -> Self {
        Self { tx }
    }

    /// Create an observer together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AccountState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl AccountObserver for ChannelObserver {
    fn on_account_state(&self, state: &AccountState) {
        if self.tx.send(state.clone()).is_err() {
            debug!("account state receiver dropped");
        }
    }
}
