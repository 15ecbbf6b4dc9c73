//! Credential resolution and validation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::chat::client::ChatClient;
use crate::chat::core::config::{CredentialMode, CredentialSettings};
use crate::chat::core::conversation::Credential;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::storage::{ADAPTER_NAME_KEY, API_KEY_KEY, API_URL_KEY, KeyValueStore};

/// Arguments of a credential configuration call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigureRequest {
    /// Server endpoint; the configured default when absent.
    pub api_url: Option<String>,
    /// API key (direct-key mode).
    pub api_key: Option<String>,
    /// Session id to bind the conversation to.
    pub session_id: Option<String>,
    /// Adapter name (adapter mode).
    pub adapter_name: Option<String>,
}

impl ConfigureRequest {
    /// Request binding an API key.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Request binding an adapter.
    #[must_use]
    pub fn adapter(name: impl Into<String>) -> Self {
        Self {
            adapter_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Override the endpoint.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }
}

/// Credential and endpoint accepted by [`CredentialResolver::resolve`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedCredential {
    /// Endpoint.
    pub api_url: String,
    /// Validated credential.
    pub credential: Credential,
}

/// Scalar values persisted by earlier sessions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StoredCredentials {
    /// Last configured API key.
    pub api_key: Option<String>,
    /// Last configured API URL.
    pub api_url: Option<String>,
    /// Last configured adapter name.
    pub adapter_name: Option<String>,
}

/// Decides which credential a conversation uses.
///
/// The mode lives in a swappable settings value; operations take one
/// [`CredentialResolver::settings`] snapshot and pass it along, so a mode
/// switch only affects operations started after it.
pub struct CredentialResolver {
    settings: ArcSwap<CredentialSettings>,
    storage: Arc<dyn KeyValueStore>,
}

impl CredentialResolver {
    /// Create a resolver over the given settings and persisted storage.
    #[must_use]
    pub fn new(settings: CredentialSettings, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            storage,
        }
    }

    /// Snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> Arc<CredentialSettings> {
        self.settings.load_full()
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> CredentialMode {
        self.settings.load().mode
    }

    /// Switch the mode for subsequent operations.
    pub fn set_mode(&self, mode: CredentialMode) -> Arc<CredentialSettings> {
        self.settings.rcu(|current| CredentialSettings {
            mode,
            ..CredentialSettings::clone(current)
        });
        self.settings()
    }

    async fn load(&self, key: &str) -> Option<String> {
        match self.storage.get(key).await {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(err) => {
                warn!(key, error = %err, "failed to read stored credential");
                None
            }
        }
    }

    async fn store(&self, key: &str, value: &str) {
        if let Err(err) = self.storage.set(key, value.to_string()).await {
            warn!(key, error = %err, "failed to persist credential");
        }
    }

    /// Scalar credential values persisted by earlier sessions.
    pub async fn stored(&self) -> StoredCredentials {
        StoredCredentials {
            api_key: self.load(API_KEY_KEY).await,
            api_url: self.load(API_URL_KEY).await,
            adapter_name: self.load(ADAPTER_NAME_KEY).await,
        }
    }

    /// Last-used adapter name; only consulted in adapter mode.
    pub async fn stored_adapter_name(&self, settings: &CredentialSettings) -> Option<String> {
        match settings.mode {
            CredentialMode::Adapter => self.load(ADAPTER_NAME_KEY).await,
            CredentialMode::DirectKey => None,
        }
    }

    /// Credential seeded into a new conversation.
    pub async fn default_credential(&self, settings: &CredentialSettings) -> Credential {
        match settings.mode {
            CredentialMode::DirectKey => Credential::ApiKey(settings.default_api_key.clone()),
            CredentialMode::Adapter => self
                .stored_adapter_name(settings)
                .await
                .map_or(Credential::Unset, Credential::AdapterName),
        }
    }

    /// Validate a configuration request.
    ///
    /// `current` is the credential of the selected conversation, reused in
    /// direct-key mode when no key is supplied.
    ///
    /// # Errors
    /// `AdapterRequired` in adapter mode without a name; in direct-key mode
    /// the validation call's error verbatim, `InvalidApiKey`,
    /// `InactiveApiKey` or `MissingCredential`.
    pub async fn resolve(
        &self,
        request: &ConfigureRequest,
        current: Option<&Credential>,
        settings: &CredentialSettings,
        client: &dyn ChatClient,
    ) -> ChatResult<ResolvedCredential> {
        let api_url = request
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(settings.default_api_url.as_str())
            .to_string();

        let credential = match settings.mode {
            CredentialMode::Adapter => {
                let name = request
                    .adapter_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or(ChatError::AdapterRequired)?;
                Credential::AdapterName(name.to_string())
            }
            CredentialMode::DirectKey => {
                let supplied = request
                    .api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|key| !key.is_empty());
                match supplied {
                    Some(key) => {
                        let status = client.validate_api_key(&api_url, key).await?;
                        if !status.exists {
                            return Err(ChatError::InvalidApiKey);
                        }
                        if !status.active {
                            return Err(ChatError::InactiveApiKey);
                        }
                        debug!(client_name = ?status.client_name, "API key validated");
                        Credential::ApiKey(key.to_string())
                    }
                    None => match current {
                        Some(credential) if credential.is_usable_in(settings.mode) => {
                            credential.clone()
                        }
                        _ if !settings.default_api_key.trim().is_empty() => {
                            Credential::ApiKey(settings.default_api_key.clone())
                        }
                        _ => return Err(ChatError::MissingCredential),
                    },
                }
            }
        };

        Ok(ResolvedCredential {
            api_url,
            credential,
        })
    }

    /// Persist the values of `resolved` that differ from the defaults.
    pub async fn persist(&self, resolved: &ResolvedCredential, settings: &CredentialSettings) {
        if resolved.api_url != settings.default_api_url {
            self.store(API_URL_KEY, &resolved.api_url).await;
        }
        match &resolved.credential {
            Credential::ApiKey(key) if key != &settings.default_api_key => {
                self.store(API_KEY_KEY, key).await;
            }
            Credential::AdapterName(name) => self.store(ADAPTER_NAME_KEY, name).await,
            _ => {}
        }
    }

    /// Rebind `credential` to the active mode, clearing the unused field.
    #[must_use]
    pub fn normalize(
        credential: &Credential,
        settings: &CredentialSettings,
        stored: &StoredCredentials,
    ) -> Credential {
        if credential.is_usable_in(settings.mode) {
            return credential.clone();
        }
        match settings.mode {
            CredentialMode::DirectKey => Credential::ApiKey(
                stored
                    .api_key
                    .clone()
                    .unwrap_or_else(|| settings.default_api_key.clone()),
            ),
            CredentialMode::Adapter => stored
                .adapter_name
                .clone()
                .map_or(Credential::Unset, Credential::AdapterName),
        }
    }
}
