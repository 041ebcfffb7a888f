//! In-memory fakes of the directory and session provider ports.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use crate::entities::{
    AccountId, AuthMetadata, DirectoryEvent, LoginParameters, ServiceId, ServiceMetadata,
    SessionData, SessionRef, WatchedPairKey,
};
use crate::error::Error;
use crate::ports::{AccountDirectory, CredentialSessionProvider, DirectorySubscription};

struct FakeAccount {
    services: Vec<(ServiceMetadata, bool)>,
    auth: AuthMetadata,
}

#[derive(Default)]
pub struct FakeDirectory {
    accounts: Mutex<BTreeMap<u32, FakeAccount>>,
    broken_auth: Mutex<HashSet<u32>>,
    hidden_services: Mutex<HashSet<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<DirectoryEvent>>>,
    released: Arc<AtomicBool>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn default_auth(account: u32) -> AuthMetadata {
        AuthMetadata {
            credentials_id: account,
            method: "oauth2".to_string(),
            mechanism: "web_server".to_string(),
            parameters: LoginParameters::from_pairs([("ClientId", format!("client-{account}"))]),
        }
    }

    pub fn add_account(&self, account: u32, service: &str, service_type: &str, enabled: bool) {
        self.accounts.lock().unwrap().insert(
            account,
            FakeAccount {
                services: vec![(ServiceMetadata::new(service, service_type), enabled)],
                auth: Self::default_auth(account),
            },
        );
    }

    pub fn add_service(&self, account: u32, service: &str, service_type: &str, enabled: bool) {
        let mut accounts = self.accounts.lock().unwrap();
        let entry = accounts.entry(account).or_insert_with(|| FakeAccount {
            services: Vec::new(),
            auth: Self::default_auth(account),
        });
        entry
            .services
            .push((ServiceMetadata::new(service, service_type), enabled));
    }

    pub fn set_login_parameters<const N: usize>(&self, account: u32, pairs: [(&str, &str); N]) {
        if let Some(entry) = self.accounts.lock().unwrap().get_mut(&account) {
            entry.auth.parameters = LoginParameters::from_pairs(pairs);
        }
    }

    pub fn set_method(&self, account: u32, method: &str) {
        if let Some(entry) = self.accounts.lock().unwrap().get_mut(&account) {
            entry.auth.method = method.to_string();
        }
    }

    pub fn break_auth(&self, account: u32) {
        self.broken_auth.lock().unwrap().insert(account);
    }

    /// Keeps the service bound to its accounts but drops it from `get_service`
    pub fn hide_service(&self, service: &str) {
        self.hidden_services
            .lock()
            .unwrap()
            .insert(service.to_string());
    }

    pub fn set_enabled(&self, account: u32, service: &str, enabled: bool) {
        if let Some(entry) = self.accounts.lock().unwrap().get_mut(&account) {
            for (metadata, flag) in entry.services.iter_mut() {
                if metadata.id.as_str() == service {
                    *flag = enabled;
                }
            }
        }
    }

    pub fn delete_account(&self, account: u32) {
        self.accounts.lock().unwrap().remove(&account);
    }

    pub fn emit(&self, event: DirectoryEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub async fn wait_subscribed(&self) {
        for _ in 0..200 {
            if self.is_subscribed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("watcher never subscribed to the directory");
    }
}

#[async_trait]
impl AccountDirectory for FakeDirectory {
    async fn list_accounts(&self) -> Result<Vec<AccountId>, Error> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .keys()
            .map(|id| AccountId::new(*id))
            .collect())
    }

    async fn list_enabled_pairs(&self) -> Result<Vec<(AccountId, ServiceId)>, Error> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .iter()
            .flat_map(|(id, account)| {
                account
                    .services
                    .iter()
                    .filter(|(_, enabled)| *enabled)
                    .map(move |(service, _)| (AccountId::new(*id), service.id.clone()))
            })
            .collect())
    }

    async fn list_services(&self, account_id: AccountId) -> Result<Vec<ServiceMetadata>, Error> {
        let accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get(&account_id.get())
            .ok_or(Error::AccountNotFound(account_id))?;
        Ok(account.services.iter().map(|(s, _)| s.clone()).collect())
    }

    async fn get_service(&self, service_id: &ServiceId) -> Result<ServiceMetadata, Error> {
        if self.hidden_services.lock().unwrap().contains(service_id.as_str()) {
            return Err(Error::ServiceNotFound(service_id.clone()));
        }
        let accounts = self.accounts.lock().unwrap();
        accounts
            .values()
            .flat_map(|a| a.services.iter())
            .find(|(s, _)| &s.id == service_id)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| Error::ServiceNotFound(service_id.clone()))
    }

    async fn get_auth_metadata(&self, key: &WatchedPairKey) -> Result<AuthMetadata, Error> {
        if self.broken_auth.lock().unwrap().contains(&key.account_id.get()) {
            return Err(Error::Directory("auth data unavailable".to_string()));
        }
        let accounts = self.accounts.lock().unwrap();
        accounts
            .get(&key.account_id.get())
            .map(|a| a.auth.clone())
            .ok_or(Error::AccountNotFound(key.account_id))
    }

    async fn is_enabled(&self, key: &WatchedPairKey) -> Result<bool, Error> {
        let accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get(&key.account_id.get())
            .ok_or(Error::AccountNotFound(key.account_id))?;
        Ok(account
            .services
            .iter()
            .any(|(s, enabled)| s.id == key.service_id && *enabled))
    }

    async fn subscribe(&self) -> Result<DirectorySubscription, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        let released = self.released.clone();
        Ok(DirectorySubscription::new(rx).on_release(move || released.store(true, Ordering::SeqCst)))
    }
}

/// Session provider answering from a table, optionally holding every
/// `process` call until [`FakeProvider::release`] lets it through.
pub struct FakeProvider {
    responses: Mutex<HashMap<u32, Result<SessionData, String>>>,
    broken_methods: Mutex<HashSet<String>>,
    held: AtomicBool,
    gate: Semaphore,
    serial: AtomicU64,
    processed: AtomicUsize,
    active: Mutex<HashSet<SessionRef>>,
    cancelled: Mutex<Vec<SessionRef>>,
    cancelled_in_flight: Mutex<Vec<SessionRef>>,
    last_parameters: Mutex<Option<LoginParameters>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            broken_methods: Mutex::new(HashSet::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            serial: AtomicU64::new(0),
            processed: AtomicUsize::new(0),
            active: Mutex::new(HashSet::new()),
            cancelled: Mutex::new(Vec::new()),
            cancelled_in_flight: Mutex::new(Vec::new()),
            last_parameters: Mutex::new(None),
        }
    }

    /// A provider whose sessions wait until released
    pub fn held() -> Self {
        let provider = Self::new();
        provider.held.store(true, Ordering::SeqCst);
        provider
    }

    pub fn release(&self, sessions: usize) {
        self.gate.add_permits(sessions);
    }

    pub fn respond(&self, credentials_id: u32, response: Result<SessionData, String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(credentials_id, response);
    }

    pub fn break_method(&self, method: &str) {
        self.broken_methods
            .lock()
            .unwrap()
            .insert(method.to_string());
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<SessionRef> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Sessions cancelled while their `process` call was still running
    pub fn cancelled_in_flight(&self) -> Vec<SessionRef> {
        self.cancelled_in_flight.lock().unwrap().clone()
    }

    pub fn last_parameters(&self) -> Option<LoginParameters> {
        self.last_parameters.lock().unwrap().clone()
    }
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSessionProvider for FakeProvider {
    fn start_session(&self, credentials_id: u32, method: &str) -> Result<SessionRef, Error> {
        if self.broken_methods.lock().unwrap().contains(method) {
            return Err(Error::SessionSetup(format!("unknown method '{method}'")));
        }
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        Ok(SessionRef::new(credentials_id, method, serial))
    }

    async fn process(
        &self,
        session: &SessionRef,
        parameters: &LoginParameters,
        _mechanism: &str,
    ) -> Result<SessionData, Error> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        *self.last_parameters.lock().unwrap() = Some(parameters.clone());
        self.active.lock().unwrap().insert(session.clone());

        if self.held.load(Ordering::SeqCst) {
            let permit = self.gate.acquire().await.map_err(|_| Error::Cancelled)?;
            permit.forget();
        }

        self.active.lock().unwrap().remove(session);
        if self.cancelled.lock().unwrap().contains(session) {
            return Err(Error::Cancelled);
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&session.credentials_id())
            .cloned();
        match response {
            Some(Ok(data)) => Ok(data),
            Some(Err(message)) => Err(Error::SessionProcess(message)),
            None => Ok(SessionData::default()
                .with_access_token(format!("token-{}", session.credentials_id()))),
        }
    }

    fn cancel(&self, session: &SessionRef) {
        if self.active.lock().unwrap().contains(session) {
            self.cancelled_in_flight
                .lock()
                .unwrap()
                .push(session.clone());
        }
        self.cancelled.lock().unwrap().push(session.clone());
    }
}
