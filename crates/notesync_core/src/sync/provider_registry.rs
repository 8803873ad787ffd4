//! In-process registry of remote store connectors.

use crate::model::settings::ConfigError;
use crate::sync::firestore::FirestoreConnector;
use crate::sync::remote_spi::RemoteConnector;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Connector registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRegistryError {
    InvalidProviderId(String),
    DuplicateProviderId(String),
}

impl Display for ProviderRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidProviderId(value) => write!(f, "provider id is invalid: {value}"),
            Self::DuplicateProviderId(value) => {
                write!(f, "provider id already registered: {value}")
            }
        }
    }
}

impl Error for ProviderRegistryError {}

/// Named remote connectors the sync core can switch between.
#[derive(Default)]
pub struct ProviderRegistry {
    connectors: BTreeMap<String, Arc<dyn RemoteConnector>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Firestore connector.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.connectors.insert(
            FirestoreConnector::PROVIDER_ID.to_string(),
            Arc::new(FirestoreConnector::new()),
        );
        registry
    }

    /// Registers one connector.
    pub fn register(
        &mut self,
        connector: Arc<dyn RemoteConnector>,
    ) -> Result<(), ProviderRegistryError> {
        let provider_id = connector.provider_id().trim().to_string();
        if !is_valid_provider_id(&provider_id) {
            return Err(ProviderRegistryError::InvalidProviderId(provider_id));
        }
        if self.connectors.contains_key(provider_id.as_str()) {
            return Err(ProviderRegistryError::DuplicateProviderId(provider_id));
        }

        self.connectors.insert(provider_id, connector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Returns sorted provider ids.
    pub fn provider_ids(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    /// Returns one connector by id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn RemoteConnector>> {
        self.connectors.get(provider_id.trim()).cloned()
    }

    /// Resolves the connector for a configured provider id.
    pub fn resolve(&self, provider_id: &str) -> Result<Arc<dyn RemoteConnector>, ConfigError> {
        self.get(provider_id)
            .ok_or_else(|| ConfigError::UnknownProvider(provider_id.trim().to_string()))
    }
}

fn is_valid_provider_id(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::{ProviderRegistry, ProviderRegistryError};
    use crate::model::settings::{ConfigError, RemoteConfig};
    use crate::sync::memory::{MemoryConnector, MemoryRemote};
    use crate::sync::remote_spi::{RemoteConnector, RemoteHandle};
    use crate::sync::remote_types::RemoteResult;
    use std::sync::Arc;

    struct NamedConnector(&'static str);

    impl RemoteConnector for NamedConnector {
        fn provider_id(&self) -> &str {
            self.0
        }

        fn connect(&self, config: &RemoteConfig) -> RemoteResult<RemoteHandle> {
            MemoryConnector::new(MemoryRemote::new(), "owner").connect(config)
        }
    }

    #[test]
    fn defaults_include_firestore() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.provider_ids(), vec!["firestore".to_string()]);
        assert!(registry.get(" firestore ").is_some());
    }

    #[test]
    fn rejects_invalid_or_duplicate_provider_id() {
        let mut registry = ProviderRegistry::new();
        let invalid = registry.register(Arc::new(NamedConnector("Cloud Store")));
        assert!(matches!(
            invalid,
            Err(ProviderRegistryError::InvalidProviderId(_))
        ));
        let blank = registry.register(Arc::new(NamedConnector("   ")));
        assert!(matches!(
            blank,
            Err(ProviderRegistryError::InvalidProviderId(_))
        ));

        registry
            .register(Arc::new(NamedConnector("memory")))
            .expect("first connector should register");
        let duplicate = registry.register(Arc::new(NamedConnector("memory")));
        assert!(matches!(
            duplicate,
            Err(ProviderRegistryError::DuplicateProviderId(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_reports_unknown_provider_as_configuration_error() {
        let registry = ProviderRegistry::new();
        let err = registry
            .resolve("  nowhere ")
            .err()
            .expect("unknown provider should fail");
        assert_eq!(err, ConfigError::UnknownProvider("nowhere".to_string()));
    }
}
