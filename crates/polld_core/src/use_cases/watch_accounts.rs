use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::reconcile::{ReconcileEngine, SessionCompletion, WatchCommand};
use crate::config::WatchStrategy;
use crate::entities::{AccountId, ServiceId, SupportedServices, WatchedPairKey};
use crate::error::Error;
use crate::ports::{AccountDirectory, AccountObserver, CredentialSessionProvider};

/// Engine waiting for its first `run()`
struct PendingEngine<D, P, O> {
    engine: ReconcileEngine<D, P, O>,
    commands: mpsc::UnboundedReceiver<WatchCommand>,
    completions: mpsc::UnboundedReceiver<SessionCompletion>,
}

/// Watches (account, service) pairs and keeps one observer informed of
/// their credentials.
///
/// Flow:
/// 1. `run()` starts the engine on the tokio runtime the watcher was built in
/// 2. The engine scans the directory's enabled pairs and logs each one in
/// 3. Directory events, refreshes and rescans are processed in order
/// 4. Every distinct account state reaches the observer exactly once
pub struct AccountWatcher<D, P, O>
where
    D: AccountDirectory + 'static,
    P: CredentialSessionProvider + 'static,
    O: AccountObserver + 'static,
{
    commands: mpsc::UnboundedSender<WatchCommand>,
    pending: Mutex<Option<PendingEngine<D, P, O>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl<D, P, O> AccountWatcher<D, P, O>
where
    D: AccountDirectory + 'static,
    P: CredentialSessionProvider + 'static,
    O: AccountObserver + 'static,
{
    /// Build a watcher bound to the current tokio runtime.
    pub fn new(
        directory: Arc<D>,
        provider: Arc<P>,
        services: SupportedServices,
        strategy: WatchStrategy,
        observer: O,
    ) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let engine = ReconcileEngine::new(
            directory,
            provider,
            observer,
            services,
            strategy,
            completions_tx,
        );

        Ok(Self {
            commands: commands_tx,
            pending: Mutex::new(Some(PendingEngine {
                engine,
                commands,
                completions,
            })),
            task: Mutex::new(None),
            runtime,
        })
    }

    /// Watch one more service. Only possible before the first `run()`.
    pub fn add_watched_service(&mut self, service_id: impl Into<String>) -> Result<(), Error> {
        let pending = self
            .pending
            .get_mut()
            .map_err(|_| Error::Other("watcher state poisoned".to_string()))?;
        match pending {
            Some(pending) => pending
                .engine
                .services_mut()
                .insert(ServiceId::new(service_id)),
            None => Err(Error::AlreadyRunning),
        }
    }

    /// Start watching, or re-scan the directory if already started.
    ///
    /// May be called from any thread; the scan always runs on the engine task.
    pub fn run(&self) -> Result<(), Error> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| Error::Other("watcher state poisoned".to_string()))?
            .take();

        match pending {
            Some(PendingEngine {
                engine,
                commands,
                completions,
            }) => {
                info!("starting account watcher");
                let task = self.runtime.spawn(engine.run(commands, completions));
                *self
                    .task
                    .lock()
                    .map_err(|_| Error::Other("watcher state poisoned".to_string()))? = Some(task);
                Ok(())
            }
            None => self.send(WatchCommand::Rescan),
        }
    }

    /// Force new credentials for a tracked pair; ignored for unknown pairs.
    pub fn refresh(&self, account_id: AccountId, service_id: impl Into<String>) -> Result<(), Error> {
        let key = WatchedPairKey::new(account_id, ServiceId::new(service_id));
        debug!(%key, "refresh requested");
        self.send(WatchCommand::Refresh(key))
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the engine: release the directory subscription and cancel
    /// every outstanding session.
    pub async fn shutdown(self) -> Result<(), Error> {
        let task = self
            .task
            .lock()
            .map_err(|_| Error::Other("watcher state poisoned".to_string()))?
            .take();
        let Some(task) = task else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(WatchCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        task.await
            .map_err(|e| Error::Other(format!("watcher task failed: {}", e)))
    }

    fn send(&self, command: WatchCommand) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| Error::Shutdown)
    }
}
