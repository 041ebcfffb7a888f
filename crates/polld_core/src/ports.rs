use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entities::{
    AccountId, AccountState, AuthMetadata, DirectoryEvent, LoginParameters, ServiceId,
    ServiceMetadata, SessionData, SessionRef, WatchedPairKey,
};
use crate::error::Error;

// ============================================================================
// Account Directory Ports
// ============================================================================

/// External account directory (accounts, their services and enablement)
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// List every account the directory knows about
    async fn list_accounts(&self) -> Result<Vec<AccountId>, Error>;

    /// List every (account, service) pair currently enabled
    async fn list_enabled_pairs(&self) -> Result<Vec<(AccountId, ServiceId)>, Error>;

    /// List the services configured for one account
    async fn list_services(&self, account_id: AccountId) -> Result<Vec<ServiceMetadata>, Error>;

    /// Describe a service by identifier
    async fn get_service(&self, service_id: &ServiceId) -> Result<ServiceMetadata, Error>;

    /// Auth method, mechanism and raw login parameters for a pair
    async fn get_auth_metadata(&self, key: &WatchedPairKey) -> Result<AuthMetadata, Error>;

    /// Current enablement flag of a pair
    async fn is_enabled(&self, key: &WatchedPairKey) -> Result<bool, Error>;

    /// Start receiving enablement-change and deletion events
    async fn subscribe(&self) -> Result<DirectorySubscription, Error>;
}

/// Live event feed from the directory.
///
/// Dropping the subscription releases whatever the directory holds for it.
pub struct DirectorySubscription {
    events: mpsc::UnboundedReceiver<DirectoryEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DirectorySubscription {
    pub fn new(events: mpsc::UnboundedReceiver<DirectoryEvent>) -> Self {
        Self {
            events,
            release: None,
        }
    }

    /// Run `release` when the subscription is dropped
    pub fn on_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub async fn recv(&mut self) -> Option<DirectoryEvent> {
        self.events.recv().await
    }
}

impl Drop for DirectorySubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// ============================================================================
// Credential Session Ports
// ============================================================================

/// Sign-on service that turns stored credentials into fresh secrets
#[async_trait]
pub trait CredentialSessionProvider: Send + Sync {
    /// Create a session for the given credentials and method
    fn start_session(&self, credentials_id: u32, method: &str) -> Result<SessionRef, Error>;

    /// Run the session to completion
    async fn process(
        &self,
        session: &SessionRef,
        parameters: &LoginParameters,
        mechanism: &str,
    ) -> Result<SessionData, Error>;

    /// Ask the provider to abandon a session; results may still arrive
    fn cancel(&self, session: &SessionRef);
}

// ============================================================================
// Observer Port
// ============================================================================

/// Receiver of account state notifications.
///
/// Called on the watcher's engine task; implementations must not block.
pub trait AccountObserver: Send + Sync {
    fn on_account_state(&self, state: &AccountState);
}

impl<F> AccountObserver for F
where
    F: Fn(&AccountState) + Send + Sync,
{
    fn on_account_state(&self, state: &AccountState) {
        self(state)
    }
}
