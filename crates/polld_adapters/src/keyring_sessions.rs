use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keyring::Entry;
use polld_core::entities::{LoginParameters, SessionData, SessionRef};
use polld_core::ports::CredentialSessionProvider;
use polld_core::Error;
use tracing::{debug, instrument};

const SERVICE_NAME: &str = "account-polld";
const CREDENTIALS_PREFIX: &str = "credentials";

pub const METHOD_OAUTH2: &str = "oauth2";
pub const METHOD_OAUTH: &str = "oauth";
pub const METHOD_PASSWORD: &str = "password";

const SUPPORTED_METHODS: [&str; 3] = [METHOD_OAUTH2, METHOD_OAUTH, METHOD_PASSWORD];

/// Blocking storage for per-credentials secrets, one JSON blob each
pub trait SecretStore: Send + Sync + 'static {
    fn read(&self, credentials_id: u32) -> Result<Option<String>, Error>;
    fn write(&self, credentials_id: u32, secret: &str) -> Result<(), Error>;
    fn delete(&self, credentials_id: u32) -> Result<(), Error>;
}

/// System keyring (libsecret on Linux)
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry(credentials_id: u32) -> Result<Entry, Error> {
        let key = format!("{}:{}", CREDENTIALS_PREFIX, credentials_id);
        Entry::new(SERVICE_NAME, &key)
            .map_err(|e| Error::CredentialStorage(format!("failed to create keyring entry: {}", e)))
    }
}

impl SecretStore for KeyringStore {
    fn read(&self, credentials_id: u32) -> Result<Option<String>, Error> {
        match Self::entry(credentials_id)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::CredentialStorage(format!(
                "failed to read credentials: {}",
                e
            ))),
        }
    }

    fn write(&self, credentials_id: u32, secret: &str) -> Result<(), Error> {
        Self::entry(credentials_id)?
            .set_password(secret)
            .map_err(|e| Error::CredentialStorage(format!("failed to store credentials: {}", e)))
    }

    fn delete(&self, credentials_id: u32) -> Result<(), Error> {
        match Self::entry(credentials_id)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(Error::CredentialStorage(format!(
                "failed to delete credentials: {}",
                e
            ))),
        }
    }
}

/// Credential session provider answering from secrets kept in a
/// [`SecretStore`].
///
/// A session never prompts: if nothing usable is stored and the caller's
/// UI policy forbids interaction, the session fails with
/// [`Error::UserInteractionRequired`].
pub struct KeyringSessionProvider<S = KeyringStore> {
    store: Arc<S>,
    serial: AtomicU64,
    in_flight: Mutex<HashSet<SessionRef>>,
    cancelled: Mutex<HashSet<SessionRef>>,
}

impl KeyringSessionProvider<KeyringStore> {
    pub fn new() -> Self {
        Self::with_store(KeyringStore)
    }
}

impl Default for KeyringSessionProvider<KeyringStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SecretStore> KeyringSessionProvider<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store: Arc::new(store),
            serial: AtomicU64::new(0),
            in_flight: Mutex::new(HashSet::new()),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, Error> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| Error::CredentialStorage(format!("task join error: {}", e)))?
    }

    /// Store the secrets a later session for `credentials_id` returns
    #[instrument(skip(self, data))]
    pub async fn store_secret(&self, credentials_id: u32, data: &SessionData) -> Result<(), Error> {
        let json = serde_json::to_string(data).map_err(|e| {
            Error::CredentialStorage(format!("failed to serialize credentials: {}", e))
        })?;
        debug!("storing credentials in keyring");
        self.blocking(move |store| store.write(credentials_id, &json))
            .await
    }

    #[instrument(skip(self))]
    pub async fn read_secret(&self, credentials_id: u32) -> Result<Option<SessionData>, Error> {
        let json = self
            .blocking(move |store| store.read(credentials_id))
            .await?;
        json.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                Error::CredentialStorage(format!("failed to deserialize credentials: {}", e))
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    pub async fn delete_secret(&self, credentials_id: u32) -> Result<(), Error> {
        self.blocking(move |store| store.delete(credentials_id))
            .await
    }

    fn is_cancelled(&self, session: &SessionRef) -> bool {
        self.cancelled
            .lock()
            .map(|cancelled| cancelled.contains(session))
            .unwrap_or(false)
    }
}

/// Validate stored secrets against what the method needs
fn check_secrets(method: &str, data: &SessionData) -> Result<(), Error> {
    let missing = match method {
        METHOD_PASSWORD if data.user_name.is_none() => Some("user name"),
        METHOD_PASSWORD if data.secret.is_none() => Some("password"),
        METHOD_OAUTH2 | METHOD_OAUTH if data.access_token.is_none() => Some("access token"),
        _ => None,
    };
    match missing {
        Some(field) => Err(Error::SessionProcess(format!(
            "stored credentials have no {}",
            field
        ))),
        None => Ok(()),
    }
}

/// Unregisters an in-flight session however `process` ends
struct InFlight<'a> {
    in_flight: &'a Mutex<HashSet<SessionRef>>,
    cancelled: &'a Mutex<HashSet<SessionRef>>,
    session: SessionRef,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.session);
        }
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.remove(&self.session);
        }
    }
}

#[async_trait]
impl<S: SecretStore> CredentialSessionProvider for KeyringSessionProvider<S> {
    fn start_session(&self, credentials_id: u32, method: &str) -> Result<SessionRef, Error> {
        if !SUPPORTED_METHODS.contains(&method) {
            return Err(Error::SessionSetup(format!(
                "unsupported authentication method '{}'",
                method
            )));
        }
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        Ok(SessionRef::new(credentials_id, method, serial))
    }

    #[instrument(skip(self, session, parameters), fields(session = %session))]
    async fn process(
        &self,
        session: &SessionRef,
        parameters: &LoginParameters,
        mechanism: &str,
    ) -> Result<SessionData, Error> {
        self.in_flight
            .lock()
            .map_err(|_| Error::Other("session table poisoned".to_string()))?
            .insert(session.clone());
        let _in_flight = InFlight {
            in_flight: &self.in_flight,
            cancelled: &self.cancelled,
            session: session.clone(),
        };

        debug!(mechanism, "processing authentication session");
        let stored = self.read_secret(session.credentials_id()).await?;

        if self.is_cancelled(session) {
            return Err(Error::Cancelled);
        }

        let data = match stored {
            Some(data) => data,
            None if !parameters.ui_policy.allows_interaction() => {
                return Err(Error::UserInteractionRequired)
            }
            None => {
                return Err(Error::SessionProcess(format!(
                    "no credentials stored for {}",
                    session.credentials_id()
                )))
            }
        };

        check_secrets(session.method(), &data)?;
        Ok(data)
    }

    fn cancel(&self, session: &SessionRef) {
        let running = self
            .in_flight
            .lock()
            .map(|in_flight| in_flight.contains(session))
            .unwrap_or(false);
        if !running {
            return;
        }
        debug!(%session, "cancelling authentication session");
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.insert(session.clone());
        }
    }
}
