use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::entities::{
    AccountId, AuthMetadata, ServiceId, ServiceMetadata, SupportedServices, WatchedPairKey,
};
use crate::error::Error;
use crate::ports::{AccountDirectory, DirectorySubscription};

/// Translates account directory queries into the shapes the engine needs.
///
/// Holds no state besides the directory handle; the subscription it hands
/// out releases itself when dropped.
pub struct DirectoryAdapter<D> {
    directory: Arc<D>,
}

impl<D: AccountDirectory> DirectoryAdapter<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    /// Enabled pairs whose service is watched, with their service metadata
    #[instrument(skip(self, supported))]
    pub async fn enabled_pairs(
        &self,
        supported: &SupportedServices,
    ) -> Result<Vec<(WatchedPairKey, ServiceMetadata)>, Error> {
        let pairs = self.directory.list_enabled_pairs().await?;
        let mut services: HashMap<ServiceId, ServiceMetadata> = HashMap::new();
        let mut watched = Vec::new();

        for (account_id, service_id) in pairs {
            let service = match services.get(&service_id) {
                Some(service) => service.clone(),
                None => match self.directory.get_service(&service_id).await {
                    Ok(service) => {
                        services.insert(service_id.clone(), service.clone());
                        service
                    }
                    Err(e) => {
                        // Only this pair is skipped; the rest of the pass goes on.
                        warn!(%account_id, service = %service_id, error = %e, kind = ?e.kind(), "skipping pair with unknown service");
                        continue;
                    }
                },
            };

            if !supported.matches(&service) {
                continue;
            }
            watched.push((WatchedPairKey::new(account_id, service_id), service));
        }

        debug!(count = watched.len(), "enabled watched pairs");
        Ok(watched)
    }

    /// First service of `account_id` that the watcher supports
    pub async fn first_supported_service(
        &self,
        account_id: AccountId,
        supported: &SupportedServices,
    ) -> Result<Option<ServiceMetadata>, Error> {
        let services = self.directory.list_services(account_id).await?;
        Ok(services.into_iter().find(|s| supported.matches(s)))
    }

    pub async fn account_exists(&self, account_id: AccountId) -> Result<bool, Error> {
        Ok(self.directory.list_accounts().await?.contains(&account_id))
    }

    pub async fn auth_metadata(&self, key: &WatchedPairKey) -> Result<AuthMetadata, Error> {
        self.directory.get_auth_metadata(key).await
    }

    pub async fn is_enabled(&self, key: &WatchedPairKey) -> Result<bool, Error> {
        self.directory.is_enabled(key).await
    }

    pub async fn subscribe(&self) -> Result<DirectorySubscription, Error> {
        self.directory.subscribe().await
    }
}
