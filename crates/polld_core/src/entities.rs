use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, LoginFailure};

/// Numeric account identifier assigned by the account directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u32);

impl AccountId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service identifier as known to the account directory (e.g. `google-caldav`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of one watched (account, service) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchedPairKey {
    pub account_id: AccountId,
    pub service_id: ServiceId,
}

impl WatchedPairKey {
    pub fn new(account_id: AccountId, service_id: ServiceId) -> Self {
        Self {
            account_id,
            service_id,
        }
    }
}

impl fmt::Display for WatchedPairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.service_id)
    }
}

/// Directory-supplied description of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub id: ServiceId,
    pub service_type: String,
}

impl ServiceMetadata {
    pub fn new(id: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            id: ServiceId::new(id),
            service_type: service_type.into(),
        }
    }

    /// Name reported to the observer; the directory's service identifier.
    pub fn name(&self) -> &str {
        self.id.as_str()
    }
}

/// Services a watcher instance cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportedServices {
    /// An explicit set of service identifiers.
    Ids(BTreeSet<ServiceId>),
    /// Every service of one fixed service type.
    ServiceType(String),
}

impl SupportedServices {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(ServiceId::new).collect())
    }

    pub fn service_type(service_type: impl Into<String>) -> Self {
        Self::ServiceType(service_type.into())
    }

    pub fn insert(&mut self, id: ServiceId) -> Result<(), Error> {
        match self {
            Self::Ids(ids) => {
                ids.insert(id);
                Ok(())
            }
            Self::ServiceType(service_type) => Err(Error::FixedServiceSet(service_type.clone())),
        }
    }

    pub fn matches(&self, service: &ServiceMetadata) -> bool {
        match self {
            Self::Ids(ids) => ids.contains(&service.id),
            Self::ServiceType(service_type) => &service.service_type == service_type,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Ids(ids) if ids.is_empty())
    }
}

impl Default for SupportedServices {
    fn default() -> Self {
        Self::Ids(BTreeSet::new())
    }
}

/// Whether a credential session may interact with the user.
///
/// Discriminants follow the sign-on daemon's numeric policy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiPolicy {
    #[default]
    Default = 0,
    RequestPassword = 1,
    NoUserInteraction = 2,
    Validation = 3,
}

impl UiPolicy {
    pub fn allows_interaction(self) -> bool {
        !matches!(self, UiPolicy::NoUserInteraction | UiPolicy::Validation)
    }
}

/// Login parameters for one credential session.
///
/// OAuth 2 names (`ClientId`/`ClientSecret`) win over the OAuth 1 names
/// (`ConsumerKey`/`ConsumerSecret`); the fallback is resolved once, here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginParameters {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub ui_policy: UiPolicy,
    /// Everything else the directory supplied (scopes, endpoints, ...)
    pub extra: BTreeMap<String, String>,
}

impl LoginParameters {
    pub const CLIENT_ID: &'static str = "ClientId";
    pub const CLIENT_SECRET: &'static str = "ClientSecret";
    pub const CONSUMER_KEY: &'static str = "ConsumerKey";
    pub const CONSUMER_SECRET: &'static str = "ConsumerSecret";
    pub const UI_POLICY: &'static str = "UiPolicy";

    pub fn from_map(mut map: BTreeMap<String, String>) -> Self {
        let oauth2_id = map.remove(Self::CLIENT_ID);
        let oauth2_secret = map.remove(Self::CLIENT_SECRET);
        let oauth1_id = map.remove(Self::CONSUMER_KEY);
        let oauth1_secret = map.remove(Self::CONSUMER_SECRET);
        // The policy is always imposed by the caller, never by the directory.
        map.remove(Self::UI_POLICY);

        Self {
            client_id: oauth2_id.or(oauth1_id),
            client_secret: oauth2_secret.or(oauth1_secret),
            ui_policy: UiPolicy::Default,
            extra: map,
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn with_ui_policy(mut self, policy: UiPolicy) -> Self {
        self.ui_policy = policy;
        self
    }

    /// Flatten back into the sign-on key/value form.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        if let Some(id) = &self.client_id {
            map.insert(Self::CLIENT_ID.to_string(), id.clone());
        }
        if let Some(secret) = &self.client_secret {
            map.insert(Self::CLIENT_SECRET.to_string(), secret.clone());
        }
        map.insert(
            Self::UI_POLICY.to_string(),
            (self.ui_policy as i32).to_string(),
        );
        map
    }
}

/// Authentication metadata the directory holds for a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMetadata {
    pub credentials_id: u32,
    pub method: String,
    pub mechanism: String,
    pub parameters: LoginParameters,
}

/// Provider-issued reference to one credential session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionRef {
    credentials_id: u32,
    method: String,
    serial: u64,
}

impl SessionRef {
    pub fn new(credentials_id: u32, method: impl Into<String>, serial: u64) -> Self {
        Self {
            credentials_id,
            method: method.into(),
            serial,
        }
    }

    pub fn credentials_id(&self) -> u32 {
        self.credentials_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.credentials_id, self.method, self.serial)
    }
}

/// Secrets returned by a successful credential session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: Option<String>,
    pub token_secret: Option<String>,
    pub user_name: Option<String>,
    pub secret: Option<String>,
}

impl SessionData {
    pub const ACCESS_TOKEN: &'static str = "AccessToken";
    pub const TOKEN_SECRET: &'static str = "TokenSecret";
    pub const USER_NAME: &'static str = "UserName";
    pub const SECRET: &'static str = "Secret";

    pub fn from_map(mut map: BTreeMap<String, String>) -> Self {
        Self {
            access_token: map.remove(Self::ACCESS_TOKEN),
            token_secret: map.remove(Self::TOKEN_SECRET),
            user_name: map.remove(Self::USER_NAME),
            secret: map.remove(Self::SECRET),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Push notification emitted by the account directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// Some service's enablement flag changed for this account.
    EnablementChanged(AccountId),
    /// The account no longer exists.
    AccountDeleted(AccountId),
}

/// One observer notification: the state of a watched pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: AccountId,
    pub service_type: String,
    pub service_name: String,
    pub enabled: bool,
    pub error: Option<LoginFailure>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub token_secret: Option<String>,
    pub user_name: Option<String>,
    pub secret: Option<String>,
}

impl AccountState {
    pub fn key(&self) -> WatchedPairKey {
        WatchedPairKey::new(self.account_id, ServiceId::new(self.service_name.clone()))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
