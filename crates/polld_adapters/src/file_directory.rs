use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use polld_core::entities::{
    AccountId, AuthMetadata, DirectoryEvent, LoginParameters, ServiceId, ServiceMetadata,
    WatchedPairKey,
};
use polld_core::ports::{AccountDirectory, DirectorySubscription};
use polld_core::Error;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, trace, warn};

const DOCUMENT_NAME: &str = "accounts.json";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Service catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub service_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub method: String,
    pub mechanism: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// One service configured on an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub service: String,
    pub enabled: bool,
    /// Overrides the account-level auth data for this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub credentials_id: u32,
    pub auth: AuthRecord,
    #[serde(default)]
    pub services: Vec<ServiceBinding>,
}

impl AccountRecord {
    fn binding(&self, service: &ServiceId) -> Option<&ServiceBinding> {
        self.services.iter().find(|b| b.service == service.as_str())
    }

    /// Fingerprint of the account's enablement flags
    fn enablement_hash(&self) -> u64 {
        let mut flags: Vec<(&str, bool)> = self
            .services
            .iter()
            .map(|b| (b.service.as_str(), b.enabled))
            .collect();
        flags.sort_unstable();

        let mut hasher = DefaultHasher::new();
        flags.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryDocument {
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
}

impl DirectoryDocument {
    fn account(&self, id: AccountId) -> Result<&AccountRecord, Error> {
        self.accounts
            .iter()
            .find(|a| a.id == id.get())
            .ok_or(Error::AccountNotFound(id))
    }

    fn service(&self, id: &ServiceId) -> Result<ServiceMetadata, Error> {
        self.services
            .iter()
            .find(|s| s.id == id.as_str())
            .map(|s| ServiceMetadata::new(s.id.clone(), s.service_type.clone()))
            .ok_or_else(|| Error::ServiceNotFound(id.clone()))
    }

    /// Fails on the first binding whose service is not catalogued
    fn check_catalogued<'a>(
        &self,
        services: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), Error> {
        for service in services {
            if !self.services.iter().any(|s| s.id == service) {
                return Err(Error::ServiceNotFound(ServiceId::new(service)));
            }
        }
        Ok(())
    }

    fn fingerprints(&self) -> HashMap<u32, u64> {
        self.accounts
            .iter()
            .map(|a| (a.id, a.enablement_hash()))
            .collect()
    }
}

/// Account directory backed by a JSON document on disk.
///
/// Subscribers are fed by a polling task that re-reads the document and
/// compares per-account enablement fingerprints.
pub struct FileAccountDirectory {
    store_path: PathBuf,
    poll_interval: Duration,
    write_lock: Mutex<()>,
}

impl FileAccountDirectory {
    /// Directory stored as `accounts.json` inside `data_dir`
    pub fn new(data_dir: PathBuf) -> Self {
        Self::from_path(data_dir.join(DOCUMENT_NAME))
    }

    pub fn from_path(store_path: PathBuf) -> Self {
        Self {
            store_path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub async fn document(&self) -> Result<DirectoryDocument, Error> {
        load(&self.store_path).await
    }

    async fn save(&self, document: &DirectoryDocument) -> Result<(), Error> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| Error::Directory(format!("failed to serialize accounts: {}", e)))?;

        // Pollers must never observe a half-written document.
        let staging = self.store_path.with_extension("json.tmp");
        fs::write(&staging, content).await?;
        fs::rename(&staging, &self.store_path).await?;
        Ok(())
    }

    /// Add or replace a service in the catalogue
    #[instrument(skip(self, service), fields(service = %service.id))]
    pub async fn save_service(&self, service: ServiceRecord) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.document().await?;

        match document.services.iter_mut().find(|s| s.id == service.id) {
            Some(existing) => *existing = service,
            None => document.services.push(service),
        }
        self.save(&document).await
    }

    /// Add or replace an account
    #[instrument(skip(self, account), fields(account_id = account.id))]
    pub async fn save_account(&self, account: AccountRecord) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.document().await?;

        document.check_catalogued(account.services.iter().map(|b| b.service.as_str()))?;
        debug!("saving account");
        match document.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => document.accounts.push(account),
        }
        self.save(&document).await
    }

    #[instrument(skip(self))]
    pub async fn set_enabled(
        &self,
        account_id: AccountId,
        service_id: &ServiceId,
        enabled: bool,
    ) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.document().await?;
        // Disabling stays possible after a service leaves the catalogue.
        if enabled {
            document.check_catalogued([service_id.as_str()])?;
        }

        let account = document
            .accounts
            .iter_mut()
            .find(|a| a.id == account_id.get())
            .ok_or(Error::AccountNotFound(account_id))?;
        let binding = account
            .services
            .iter_mut()
            .find(|b| b.service == service_id.as_str())
            .ok_or_else(|| Error::ServiceNotFound(service_id.clone()))?;

        binding.enabled = enabled;
        self.save(&document).await
    }

    /// Remove an account; returns whether it existed
    #[instrument(skip(self))]
    pub async fn delete_account(&self, account_id: AccountId) -> Result<bool, Error> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.document().await?;

        let before = document.accounts.len();
        document.accounts.retain(|a| a.id != account_id.get());
        if document.accounts.len() == before {
            return Ok(false);
        }
        self.save(&document).await?;
        Ok(true)
    }
}

async fn load(path: &Path) -> Result<DirectoryDocument, Error> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(DirectoryDocument::default());
    }

    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Directory(format!("failed to parse accounts file: {}", e)))
}

/// Events turning `previous` fingerprints into `current` ones
fn diff_fingerprints(
    previous: &HashMap<u32, u64>,
    current: &HashMap<u32, u64>,
) -> Vec<DirectoryEvent> {
    let mut events = Vec::new();

    let mut changed: Vec<u32> = current
        .iter()
        .filter(|(id, hash)| previous.get(id) != Some(hash))
        .map(|(id, _)| *id)
        .collect();
    changed.sort_unstable();
    events.extend(
        changed
            .into_iter()
            .map(|id| DirectoryEvent::EnablementChanged(AccountId::new(id))),
    );

    let mut deleted: Vec<u32> = previous
        .keys()
        .filter(|id| !current.contains_key(id))
        .copied()
        .collect();
    deleted.sort_unstable();
    events.extend(
        deleted
            .into_iter()
            .map(|id| DirectoryEvent::AccountDeleted(AccountId::new(id))),
    );

    events
}

#[async_trait]
impl AccountDirectory for FileAccountDirectory {
    #[instrument(skip(self))]
    async fn list_accounts(&self) -> Result<Vec<AccountId>, Error> {
        let document = self.document().await?;
        Ok(document
            .accounts
            .iter()
            .map(|a| AccountId::new(a.id))
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_enabled_pairs(&self) -> Result<Vec<(AccountId, ServiceId)>, Error> {
        let document = self.document().await?;
        Ok(document
            .accounts
            .iter()
            .flat_map(|a| {
                a.services
                    .iter()
                    .filter(|b| b.enabled)
                    .map(move |b| (AccountId::new(a.id), ServiceId::new(b.service.clone())))
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_services(&self, account_id: AccountId) -> Result<Vec<ServiceMetadata>, Error> {
        let document = self.document().await?;
        let account = document.account(account_id)?;
        account
            .services
            .iter()
            .map(|b| document.service(&ServiceId::new(b.service.clone())))
            .collect()
    }

    async fn get_service(&self, service_id: &ServiceId) -> Result<ServiceMetadata, Error> {
        self.document().await?.service(service_id)
    }

    #[instrument(skip(self))]
    async fn get_auth_metadata(&self, key: &WatchedPairKey) -> Result<AuthMetadata, Error> {
        let document = self.document().await?;
        let account = document.account(key.account_id)?;
        let binding = account.binding(&key.service_id).ok_or_else(|| {
            Error::Directory(format!(
                "service '{}' is not configured for account {}",
                key.service_id, key.account_id
            ))
        })?;

        let auth = binding.auth.as_ref().unwrap_or(&account.auth);
        Ok(AuthMetadata {
            credentials_id: account.credentials_id,
            method: auth.method.clone(),
            mechanism: auth.mechanism.clone(),
            parameters: LoginParameters::from_map(auth.parameters.clone()),
        })
    }

    async fn is_enabled(&self, key: &WatchedPairKey) -> Result<bool, Error> {
        let document = self.document().await?;
        let account = document.account(key.account_id)?;
        Ok(account
            .binding(&key.service_id)
            .is_some_and(|b| b.enabled))
    }

    async fn subscribe(&self) -> Result<DirectorySubscription, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let path = self.store_path.clone();
        let poll_interval = self.poll_interval;

        // Baseline taken now, so changes made after subscribing are reported.
        let mut last = load(&path).await?.fingerprints();

        let task = tokio::spawn(async move {
            info!(path = %path.display(), interval_ms = poll_interval.as_millis() as u64, "account directory poller started");
            let mut interval = tokio::time::interval(poll_interval);
            interval.tick().await;

            loop {
                interval.tick().await;

                let current = match load(&path).await {
                    Ok(document) => document.fingerprints(),
                    Err(e) => {
                        warn!(error = %e, "could not reload account directory");
                        continue;
                    }
                };

                let events = diff_fingerprints(&last, &current);
                if events.is_empty() {
                    trace!("account directory unchanged");
                    continue;
                }
                last = current;

                for event in events {
                    debug!(?event, "account directory changed");
                    if tx.send(event).is_err() {
                        debug!("subscriber gone, stopping account directory poller");
                        return;
                    }
                }
            }
        });

        Ok(DirectorySubscription::new(rx).on_release(move || task.abort()))
    }
}
