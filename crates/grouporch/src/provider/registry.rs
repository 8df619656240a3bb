use super::{GroupProvider, ProviderId};
use crate::error::{GroupError, GroupResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

struct Registration {
    provider: Arc<dyn GroupProvider>,
    token: u64,
}

/// Registered providers, at most one per URI scheme.
#[derive(Default)]
pub struct ProviderRegistry {
    next_token: AtomicU64,
    providers: RwLock<HashMap<String, Registration>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider; returns the token identifying this registration.
    pub fn register(&self, provider: Arc<dyn GroupProvider>) -> GroupResult<u64> {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        let scheme = provider.id().scheme.clone();
        if providers.contains_key(&scheme) {
            return Err(GroupError::ProviderAlreadyRegistered(provider.id().to_string()));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        providers.insert(scheme, Registration { provider, token });
        Ok(token)
    }

    pub fn unregister(&self, id: &ProviderId) -> GroupResult<Arc<dyn GroupProvider>> {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        match providers.get(&id.scheme) {
            Some(reg) if reg.provider.id() == id => {}
            _ => return Err(GroupError::ProviderNotRegistered(id.to_string())),
        }
        providers
            .remove(&id.scheme)
            .map(|reg| reg.provider)
            .ok_or_else(|| GroupError::ProviderNotRegistered(id.to_string()))
    }

    /// Provider serving `scheme`.
    pub fn provider(&self, scheme: &str) -> Option<Arc<dyn GroupProvider>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(scheme)
            .map(|reg| Arc::clone(&reg.provider))
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|reg| reg.provider.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// True while the registration identified by `token` is still in place.
    pub fn is_current(&self, id: &ProviderId, token: u64) -> bool {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id.scheme)
            .is_some_and(|reg| reg.token == token && reg.provider.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::model::GroupOperations;
    use crate::provider::GroupProgrammable;
    use grouporch_types::DeviceId;
    use pretty_assertions::assert_eq;

    struct Noop(ProviderId);

    impl GroupProgrammable for Noop {
        fn perform_group_operation(&self, _: &DeviceId, _: &GroupOperations) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    impl GroupProvider for Noop {
        fn id(&self) -> &ProviderId {
            &self.0
        }
    }

    #[test]
    fn test_register_one_per_scheme() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Noop(ProviderId::new("of", "a")))).unwrap();

        let err = registry
            .register(Arc::new(Noop(ProviderId::new("of", "b"))))
            .unwrap_err();
        assert_eq!(err, GroupError::ProviderAlreadyRegistered("of:b".to_string()));

        registry.register(Arc::new(Noop(ProviderId::new("sim", "a")))).unwrap();
        assert_eq!(
            registry.providers(),
            vec![ProviderId::new("of", "a"), ProviderId::new("sim", "a")]
        );
        assert!(registry.provider("of").is_some());
        assert!(registry.provider("netconf").is_none());
    }

    #[test]
    fn test_unregister_invalidates_token() {
        let registry = ProviderRegistry::new();
        let id = ProviderId::new("of", "a");
        let token = registry.register(Arc::new(Noop(id.clone()))).unwrap();
        assert!(registry.is_current(&id, token));

        assert!(registry.unregister(&ProviderId::new("of", "other")).is_err());
        registry.unregister(&id).unwrap();
        assert!(!registry.is_current(&id, token));
        assert!(registry.unregister(&id).is_err());

        let again = registry.register(Arc::new(Noop(id.clone()))).unwrap();
        assert!(!registry.is_current(&id, token));
        assert!(registry.is_current(&id, again));
    }
}
