//! Data adapters feeding the plot's fetch pipeline
//!
//! The plot asks a named adapter for the data of a viewport. Adapters are
//! looked up in an [`AdapterRegistry`] owned by the view, so a bridged adapter
//! can stand in for a network adapter of the same name without the caller
//! noticing.

use crate::dataflow::{ObservableStore, StoreError};
use crate::utils::{PollError, RetryPolicy, until_ready};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use shared::{ASSOCIATIONS_VIEW_KEY, Viewport};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Name under which [`ModelAssociation`] is registered.
pub const MODEL_ASSOCIATION: &str = "ModelAssociation";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("data for {requested} never arrived ({source})")]
    RetryExhausted {
        requested: Viewport,
        #[source]
        source: PollError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no data source registered for namespace '{0}'")]
    UnknownSource(String),
    #[error("no adapter registered under '{0}'")]
    UnknownAdapter(String),
}

pub trait DataAdapter: Send + Sync {
    fn fetch<'a>(&'a self, requested: &'a Viewport) -> BoxFuture<'a, Result<Value, FetchError>>;
}

/// Name to adapter lookup. Owned by whoever renders the plot.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: IndexMap<String, Arc<dyn DataAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under `name`, returning the adapter it replaced.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        adapter: Arc<dyn DataAdapter>,
    ) -> Option<Arc<dyn DataAdapter>> {
        self.adapters.insert(name.into(), adapter)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}

/// Plot namespaces (`assoc`, `ld`, ...) and the adapter name serving each.
#[derive(Debug, Clone, Default)]
pub struct DataSources {
    sources: IndexMap<String, String>,
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        namespace: impl Into<String>,
        adapter_name: impl Into<String>,
    ) -> &mut Self {
        self.sources.insert(namespace.into(), adapter_name.into());
        self
    }

    pub fn adapter_name(&self, namespace: &str) -> Option<&str> {
        self.sources.get(namespace).map(String::as_str)
    }

    pub async fn fetch(
        &self,
        registry: &AdapterRegistry,
        namespace: &str,
        requested: &Viewport,
    ) -> Result<Value, FetchError> {
        let adapter_name = self
            .adapter_name(namespace)
            .ok_or_else(|| FetchError::UnknownSource(namespace.to_string()))?;
        let adapter = registry
            .get(adapter_name)
            .ok_or_else(|| FetchError::UnknownAdapter(adapter_name.to_string()))?;
        adapter.fetch(requested).await
    }
}

/// In-flight request, alive until the poll resolves or gives up.
#[derive(Debug, Clone)]
pub struct PendingFetch {
    pub requested: Viewport,
    pub created_at: Instant,
}

/// Serves association data pushed into the store by the kernel.
///
/// Instead of issuing a request it waits until the store's view slot covers
/// exactly the requested viewport, then hands back that slot.
#[derive(Clone)]
pub struct ModelAssociation {
    store: ObservableStore,
    policy: RetryPolicy,
    view_key: String,
}

impl ModelAssociation {
    pub fn new(store: ObservableStore, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            view_key: ASSOCIATIONS_VIEW_KEY.to_string(),
        }
    }

    pub fn with_view_key(mut self, view_key: impl Into<String>) -> Self {
        self.view_key = view_key.into();
        self
    }

    /// Viewport the view slot currently covers, if it holds a readable range.
    fn current_range(&self) -> Option<Viewport> {
        let view = self.store.get(&self.view_key).ok()?;
        serde_json::from_value(view.get("range")?.clone()).ok()
    }

    fn covers(&self, requested: &Viewport) -> bool {
        self.current_range().is_some_and(|range| {
            range.chr == requested.chr
                && range.start == requested.start
                && range.end == requested.end
        })
    }

    async fn fetch_view(&self, requested: &Viewport) -> Result<Value, FetchError> {
        let pending = PendingFetch {
            requested: requested.clone(),
            created_at: Instant::now(),
        };

        let polled = until_ready(|| self.covers(&pending.requested), &self.policy).await;
        if let Err(source) = polled {
            log::warn!(
                "gave up waiting for {} after {:?}",
                pending.requested,
                pending.created_at.elapsed()
            );
            return Err(FetchError::RetryExhausted {
                requested: pending.requested,
                source,
            });
        }

        log::debug!(
            "view for {} ready after {:?}",
            pending.requested,
            pending.created_at.elapsed()
        );
        Ok(self.store.get(&self.view_key)?)
    }
}

impl DataAdapter for ModelAssociation {
    fn fetch<'a>(&'a self, requested: &'a Viewport) -> BoxFuture<'a, Result<Value, FetchError>> {
        Box::pin(self.fetch_view(requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Origin;
    use serde_json::json;
    use std::time::Duration;

    struct StaticAdapter(Value);

    impl DataAdapter for StaticAdapter {
        fn fetch<'a>(
            &'a self,
            _requested: &'a Viewport,
        ) -> BoxFuture<'a, Result<Value, FetchError>> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    fn view_for(range: &Viewport, marker: &str) -> Value {
        json!({ "data": { "variant": [marker] }, "range": range })
    }

    #[tokio::test(start_paused = true)]
    async fn matching_view_resolves_immediately() {
        let requested = Viewport::new("1", 0, 100);
        let store = ObservableStore::new();
        store.set(ASSOCIATIONS_VIEW_KEY, view_for(&requested, "a"), Origin::Remote);

        let policy = RetryPolicy::new(Some(0), Duration::from_millis(75));
        let adapter = ModelAssociation::new(store, policy);
        let started = Instant::now();
        let value = adapter.fetch(&requested).await.unwrap();

        assert_eq!(value, view_for(&requested, "a"));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_stays_pending_until_store_matches() {
        let requested = Viewport::new("1", 0, 100);
        let store = ObservableStore::new();
        store.set(
            ASSOCIATIONS_VIEW_KEY,
            view_for(&Viewport::new("1", 0, 5_000_000), "stale"),
            Origin::Remote,
        );
        let policy = RetryPolicy::new(None, Duration::from_millis(75));
        let adapter = ModelAssociation::new(store.clone(), policy);

        let mut fetch = adapter.fetch(&requested);

        // Still pending after several poll intervals.
        let early = tokio::time::timeout(Duration::from_millis(500), &mut fetch).await;
        assert!(early.is_err());

        store.set(ASSOCIATIONS_VIEW_KEY, view_for(&requested, "fresh"), Origin::Remote);
        let value = fetch.await.unwrap();
        assert_eq!(value, view_for(&requested, "fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_fetch_reports_failure() {
        let store = ObservableStore::new();
        let policy = RetryPolicy::new(Some(2), Duration::from_millis(10));
        let adapter = ModelAssociation::new(store, policy);

        let requested = Viewport::new("3", 5, 10);
        let error = adapter.fetch(&requested).await.unwrap_err();
        assert!(matches!(
            error,
            FetchError::RetryExhausted {
                requested: ref r,
                source: PollError::RetryExhausted { attempts: 2 },
            } if *r == requested
        ));
    }

    #[tokio::test]
    async fn registry_substitutes_adapter_by_name() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.add("AssociationLZ", Arc::new(StaticAdapter(json!("network")))).is_none());
        let replaced = registry.add("AssociationLZ", Arc::new(StaticAdapter(json!("bridged"))));
        assert!(replaced.is_some());

        let mut sources = DataSources::new();
        sources.add("assoc", "AssociationLZ").add("ld", "LDServer");

        let viewport = Viewport::default();
        let value = sources.fetch(&registry, "assoc", &viewport).await.unwrap();
        assert_eq!(value, json!("bridged"));

        assert!(matches!(
            sources.fetch(&registry, "ld", &viewport).await,
            Err(FetchError::UnknownAdapter(name)) if name == "LDServer"
        ));
        assert!(matches!(
            sources.fetch(&registry, "gene", &viewport).await,
            Err(FetchError::UnknownSource(name)) if name == "gene"
        ));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["AssociationLZ"]);
    }
}
