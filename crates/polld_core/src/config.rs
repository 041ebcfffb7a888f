use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::entities::SupportedServices;

pub const SERVICENAME_GMAIL: &str = "com.ubuntu.developer.webapps.webapp-gmail_webapp-gmail";
pub const SERVICENAME_TWITTER: &str =
    "com.ubuntu.developer.webapps.webapp-twitter_webapp-twitter";
pub const SERVICENAME_GCALENDAR: &str = "google-caldav";

/// How the watcher learns about directory changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchStrategy {
    /// Subscribe to directory events after a bootstrap scan.
    #[default]
    Reactive,
    /// Re-scan the enabled pairs on every run request.
    Poll,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub watcher: WatcherSettings,
    pub directory: DirectorySettings,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherSettings {
    /// Explicit service identifiers to watch
    pub services: Vec<String>,
    /// Watch every service of this type instead of `services`
    pub service_type: Option<String>,
    pub strategy: WatchStrategy,
    /// Re-run the bootstrap scan this often, if set
    pub rescan_interval_secs: Option<u64>,
}

impl WatcherSettings {
    pub fn supported_services(&self) -> SupportedServices {
        match &self.service_type {
            Some(service_type) => SupportedServices::service_type(service_type.clone()),
            None => SupportedServices::ids(self.services.iter().cloned()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DirectorySettings {
    /// Location of the account directory document
    pub path: Option<PathBuf>,
    /// How often a subscribed directory checks for changes
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watcher: WatcherSettings::default(),
            directory: DirectorySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            services: vec![
                SERVICENAME_GMAIL.to_string(),
                SERVICENAME_GCALENDAR.to_string(),
                SERVICENAME_TWITTER.to_string(),
            ],
            service_type: None,
            strategy: WatchStrategy::default(),
            rescan_interval_secs: None,
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: 2000,
        }
    }
}
