use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::config::WatchStrategy;
use crate::directory::DirectoryAdapter;
use crate::entities::{
    AccountId, DirectoryEvent, ServiceMetadata, SessionData, SupportedServices, UiPolicy,
    WatchedPairKey,
};
use crate::error::{Error, LoginFailure};
use crate::notification::NotificationDispatcher;
use crate::ports::{
    AccountDirectory, AccountObserver, CredentialSessionProvider, DirectorySubscription,
};
use crate::registry::{Registry, TrackedEntry};
use crate::session::SessionHandle;

/// Requests fed to the engine by the watcher's control surface
#[derive(Debug)]
pub(crate) enum WatchCommand {
    /// Re-run the poll-and-diff pass
    Rescan,
    /// Force a new login for a tracked pair
    Refresh(WatchedPairKey),
    Shutdown(oneshot::Sender<()>),
}

/// Result of one credential session, reported back to the engine
#[derive(Debug)]
pub(crate) struct SessionCompletion {
    key: WatchedPairKey,
    generation: u64,
    outcome: Result<SessionData, Error>,
}

/// Reconciliation engine.
///
/// Owns the registry and runs as a single task: directory events, control
/// commands and session completions are handled one at a time, so registry
/// mutations never overlap. Credential sessions run on their own tasks and
/// report back through the completion channel.
pub(crate) struct ReconcileEngine<D, P, O> {
    directory: DirectoryAdapter<D>,
    provider: Arc<P>,
    dispatcher: NotificationDispatcher<O>,
    services: SupportedServices,
    strategy: WatchStrategy,
    registry: Registry,
    generation: u64,
    completions: mpsc::UnboundedSender<SessionCompletion>,
}

impl<D, P, O> ReconcileEngine<D, P, O>
where
    D: AccountDirectory + 'static,
    P: CredentialSessionProvider + 'static,
    O: AccountObserver + 'static,
{
    pub(crate) fn new(
        directory: Arc<D>,
        provider: Arc<P>,
        observer: O,
        services: SupportedServices,
        strategy: WatchStrategy,
        completions: mpsc::UnboundedSender<SessionCompletion>,
    ) -> Self {
        Self {
            directory: DirectoryAdapter::new(directory),
            provider,
            dispatcher: NotificationDispatcher::new(observer),
            services,
            strategy,
            registry: Registry::new(),
            generation: 0,
            completions,
        }
    }

    pub(crate) fn services_mut(&mut self) -> &mut SupportedServices {
        &mut self.services
    }

    /// Engine main loop; returns once shut down or once every command
    /// sender is gone.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<WatchCommand>,
        mut completions: mpsc::UnboundedReceiver<SessionCompletion>,
    ) {
        if self.services.is_empty() {
            warn!("no services are watched; no account will be reported");
        }

        let mut subscription = match self.strategy {
            WatchStrategy::Reactive => match self.directory.subscribe().await {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!(error = %e, kind = ?e.kind(), "could not subscribe to account changes, polling only");
                    None
                }
            },
            WatchStrategy::Poll => None,
        };

        self.poll_and_diff().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WatchCommand::Rescan) => self.poll_and_diff().await,
                    Some(WatchCommand::Refresh(key)) => self.refresh(&key).await,
                    Some(WatchCommand::Shutdown(ack)) => {
                        self.teardown(subscription.take());
                        let _ = ack.send(());
                        return;
                    }
                    None => break,
                },
                event = next_event(&mut subscription), if subscription.is_some() => match event {
                    Some(event) => self.handle_directory_event(event).await,
                    None => {
                        warn!("account directory closed its event feed");
                        subscription = None;
                    }
                },
                Some(completion) = completions.recv() => self.complete_login(completion),
            }
        }

        self.teardown(subscription.take());
    }

    /// Bring the registry in line with the directory's enabled pairs.
    ///
    /// Every surviving or new pair gets a fresh login; pairs no longer
    /// listed are dropped without a notification.
    #[instrument(skip(self))]
    async fn poll_and_diff(&mut self) {
        let enabled = match self.directory.enabled_pairs(&self.services).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "could not list enabled accounts");
                return;
            }
        };

        let mut stale: HashSet<WatchedPairKey> = self.registry.snapshot().into_iter().collect();

        for (key, service) in enabled {
            let (entry, created) = self
                .registry
                .upsert(key.clone(), || TrackedEntry::new(key.clone(), service));
            entry.enabled = true;
            if created {
                info!(%key, "adding account");
            } else {
                stale.remove(&key);
            }
            self.login(&key).await;
        }

        for key in stale {
            info!(%key, "removing account");
            self.registry.remove(&key);
        }
    }

    async fn handle_directory_event(&mut self, event: DirectoryEvent) {
        match event {
            DirectoryEvent::EnablementChanged(account_id) => {
                self.enablement_changed(account_id).await
            }
            DirectoryEvent::AccountDeleted(account_id) => {
                let removed = self.registry.remove_account(account_id);
                if removed > 0 {
                    info!(%account_id, removed, "account deleted");
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn enablement_changed(&mut self, account_id: AccountId) {
        let keys = self.registry.keys_for_account(account_id);
        if keys.is_empty() {
            self.track_new_account(account_id).await;
            return;
        }

        for key in keys {
            match self.directory.is_enabled(&key).await {
                Ok(enabled) => self.apply_enablement(&key, enabled).await,
                Err(e) => warn!(%key, error = %e, kind = ?e.kind(), "could not read enablement"),
            }
        }
    }

    async fn track_new_account(&mut self, account_id: AccountId) {
        let service = match self.find_watched_service(account_id).await {
            Ok(Some(service)) => service,
            Ok(None) => {
                debug!(%account_id, "account has no watched service");
                return;
            }
            Err(e) => {
                warn!(%account_id, error = %e, kind = ?e.kind(), "could not inspect account");
                return;
            }
        };

        let key = WatchedPairKey::new(account_id, service.id.clone());
        let enabled = match self.directory.is_enabled(&key).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(%key, error = %e, kind = ?e.kind(), "could not read enablement");
                return;
            }
        };

        info!(%key, "adding account");
        self.registry
            .upsert(key.clone(), || TrackedEntry::new(key.clone(), service));
        self.apply_enablement(&key, enabled).await;
    }

    async fn find_watched_service(
        &self,
        account_id: AccountId,
    ) -> Result<Option<ServiceMetadata>, Error> {
        if !self.directory.account_exists(account_id).await? {
            return Err(Error::AccountNotFound(account_id));
        }
        self.directory
            .first_supported_service(account_id, &self.services)
            .await
    }

    async fn apply_enablement(&mut self, key: &WatchedPairKey, enabled: bool) {
        let Some(entry) = self.registry.get_mut(key) else {
            return;
        };
        if entry.enabled == enabled {
            debug!(%key, enabled, "enablement unchanged");
            return;
        }

        entry.enabled = enabled;
        entry.clear_session();
        if enabled {
            info!(%key, "account enabled");
            self.login(key).await;
        } else {
            info!(%key, "account disabled");
            self.dispatcher.notify(entry);
        }
    }

    async fn refresh(&mut self, key: &WatchedPairKey) {
        match self.registry.get(key) {
            Some(entry) if entry.enabled => {
                debug!(%key, superseding = entry.has_running_session(), "refreshing credentials");
                self.login(key).await;
            }
            Some(_) => debug!(%key, "ignoring refresh for disabled account"),
            None => debug!(%key, "ignoring refresh for unknown account"),
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Start a fresh credential session for `key`.
    #[instrument(skip(self))]
    async fn login(&mut self, key: &WatchedPairKey) {
        let Some(entry) = self.registry.get_mut(key) else {
            return;
        };
        entry.clear_session();

        let metadata = match self.directory.auth_metadata(key).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(%key, error = %e, kind = ?e.kind(), "could not read auth data");
                return;
            }
        };

        let mut session = SessionHandle::new(self.next_generation());
        let Some(entry) = self.registry.get_mut(key) else {
            return;
        };

        debug!(%key, credentials_id = metadata.credentials_id, "starting authentication session");
        let session_ref = match self
            .provider
            .start_session(metadata.credentials_id, &metadata.method)
        {
            Ok(session_ref) => session_ref,
            Err(e) => {
                warn!(%key, error = %e, kind = ?e.kind(), "could not set up auth session");
                session.fail(LoginFailure::setup(&e));
                entry.install_session(session);
                self.dispatcher.notify(entry);
                return;
            }
        };

        // No UI is available; the session must fail rather than prompt.
        let parameters = metadata
            .parameters
            .with_ui_policy(UiPolicy::NoUserInteraction);
        let cancelled = session.start(session_ref.clone(), parameters.clone());
        let generation = session.generation();
        entry.install_session(session);

        let provider = Arc::clone(&self.provider);
        let completions = self.completions.clone();
        let key = key.clone();
        let mechanism = metadata.mechanism;
        tokio::spawn(async move {
            // Pinned outside the select so the attempt is still in flight when
            // the provider is asked to cancel it.
            let process = provider.process(&session_ref, &parameters, &mechanism);
            tokio::pin!(process);
            tokio::select! {
                outcome = &mut process => {
                    let _ = completions.send(SessionCompletion { key, generation, outcome });
                }
                _ = cancelled.cancelled() => {
                    debug!(%key, session = %session_ref, "authentication cancelled");
                    provider.cancel(&session_ref);
                    if let Err(e) = process.await {
                        debug!(%key, error = %e, kind = ?e.kind(), "cancelled session wound down");
                    }
                }
            }
        });
    }

    fn complete_login(&mut self, completion: SessionCompletion) {
        let SessionCompletion {
            key,
            generation,
            outcome,
        } = completion;

        let Some(entry) = self.registry.get_mut(&key) else {
            debug!(%key, "discarding result for untracked account");
            return;
        };
        let Some(session) = entry.session.as_mut().filter(|s| s.accepts(generation)) else {
            debug!(%key, generation, "discarding stale authentication result");
            return;
        };

        match outcome {
            Ok(data) => {
                info!(%key, "authentication complete");
                session.succeed(data);
            }
            Err(e) => {
                warn!(%key, error = %e, kind = ?e.kind(), "authentication failed");
                session.fail(LoginFailure::process(&e));
            }
        }
        self.dispatcher.notify(entry);
    }

    fn teardown(&mut self, subscription: Option<DirectorySubscription>) {
        drop(subscription);
        let tracked = self.registry.len();
        self.registry.clear();
        info!(tracked, "account watcher stopped");
    }
}

async fn next_event(subscription: &mut Option<DirectorySubscription>) -> Option<DirectoryEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
