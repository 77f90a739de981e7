//! Provider profile factory. One cached profile per provider.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use super::registry::{get_descriptor, ProviderDescriptor, ProviderId};

/// Provider configuration baked into a client: where the credential and
/// base URL come from, and the name used in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub provider: ProviderId,
    pub api_name: &'static str,
    pub api_key_env: &'static str,
    pub api_base_env: &'static str,
    pub default_base_url: Option<&'static str>,
    pub model_name: &'static str,
}

impl ClientProfile {
    /// The generic profile: `CUSTOM_API_KEY` / `CUSTOM_API_BASE`, no default URL.
    pub fn custom() -> Self {
        Self::from_descriptor(get_descriptor(ProviderId::Custom))
    }

    pub fn from_descriptor(descriptor: &ProviderDescriptor) -> Self {
        Self {
            provider: descriptor.id,
            api_name: descriptor.api_name,
            api_key_env: descriptor.api_key_env,
            api_base_env: descriptor.api_base_env,
            default_base_url: descriptor.default_base_url,
            model_name: descriptor.model_name,
        }
    }

    /// `chat-<api name>-model`, e.g. `chat-deepseek-model`.
    pub fn llm_type(&self) -> String {
        format!("chat-{}-model", self.api_name.to_lowercase())
    }

    /// Environment variable holding the credential.
    pub fn secret_env_var(&self) -> &'static str {
        self.api_key_env
    }
}

fn profiles() -> &'static RwLock<HashMap<ProviderId, Arc<ClientProfile>>> {
    static PROFILES: OnceLock<RwLock<HashMap<ProviderId, Arc<ClientProfile>>>> = OnceLock::new();
    PROFILES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get the client profile for `provider`.
///
/// Profiles are built once per provider and shared for the life of the
/// process; repeated calls return the same `Arc`.
pub fn get_client_profile(provider: ProviderId) -> Arc<ClientProfile> {
    if let Some(profile) = profiles()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&provider)
    {
        return Arc::clone(profile);
    }

    let mut cache = profiles().write().unwrap_or_else(|e| e.into_inner());
    Arc::clone(cache.entry(provider).or_insert_with(|| {
        debug!(provider = %provider, "Creating client profile");
        Arc::new(build_profile(provider))
    }))
}

fn build_profile(provider: ProviderId) -> ClientProfile {
    match provider {
        ProviderId::Custom => ClientProfile::custom(),
        other => ClientProfile::from_descriptor(get_descriptor(other)),
    }
}
