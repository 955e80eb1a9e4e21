//! Plot view lifecycle
//!
//! Owns everything one rendered plot needs: the adapter registry and data
//! sources it fetches through, and the reconciler keeping its viewport in
//! sync with the store. Nothing here is global; dropping the view (or calling
//! [`PlotView::teardown`]) releases all of it.

use crate::adapters::{
    AdapterRegistry, DataSources, FetchError, MODEL_ASSOCIATION, ModelAssociation,
};
use crate::dataflow::{ObservableStore, StoreError};
use crate::reconciler::{RenderSurface, SurfaceError, ViewStateReconciler};
use crate::utils::RetryPolicy;
use serde_json::Value;
use shared::{BridgeConfig, POSITION_KEY, Viewport};
use std::sync::Arc;

/// Namespace the association panel fetches from.
pub const ASSOCIATION_SOURCE: &str = "assoc";

/// Host messages the view reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMessage {
    /// The container changed size.
    Resized,
    /// The view was attached to the page for the first time.
    Displayed,
}

/// Outcome of loading one panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelState {
    Loaded(Value),
    /// The data never arrived; shown as an error, not as an empty panel.
    LoadFailed(String),
}

pub struct PlotView {
    store: ObservableStore,
    surface: Arc<dyn RenderSurface>,
    reconciler: Arc<ViewStateReconciler>,
    registry: AdapterRegistry,
    data_sources: DataSources,
    displayed: bool,
}

impl PlotView {
    pub fn render(
        store: ObservableStore,
        surface: Arc<dyn RenderSurface>,
        config: &BridgeConfig,
    ) -> Result<Self, SurfaceError> {
        let mut registry = AdapterRegistry::new();
        registry.add(
            MODEL_ASSOCIATION,
            Arc::new(ModelAssociation::new(
                store.clone(),
                RetryPolicy::from(&config.retry),
            )),
        );

        let mut data_sources = DataSources::new();
        data_sources.add(ASSOCIATION_SOURCE, MODEL_ASSOCIATION);

        let reconciler = ViewStateReconciler::attach(store.clone(), surface.clone())?;
        log::info!(
            "plot rendered at {}",
            reconciler
                .model_viewport()
                .map(|viewport| viewport.to_string())
                .unwrap_or_else(|_| "<unset>".to_string())
        );

        Ok(Self {
            store,
            surface,
            reconciler,
            registry,
            data_sources,
            displayed: false,
        })
    }

    pub fn handle_message(&mut self, message: ViewMessage) {
        match message {
            ViewMessage::Resized => self.surface.rescale(),
            ViewMessage::Displayed => {
                if !self.displayed {
                    self.displayed = true;
                    self.surface.rescale();
                }
            }
        }
    }

    pub fn position_state(&self) -> Result<Viewport, StoreError> {
        self.store.get_as(POSITION_KEY)
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Mutable registry, for substituting adapters by name.
    pub fn registry_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.registry
    }

    pub fn data_sources_mut(&mut self) -> &mut DataSources {
        &mut self.data_sources
    }

    pub async fn fetch(&self, namespace: &str, viewport: &Viewport) -> Result<Value, FetchError> {
        self.data_sources
            .fetch(&self.registry, namespace, viewport)
            .await
    }

    pub async fn load_panel(&self, namespace: &str, viewport: &Viewport) -> PanelState {
        match self.fetch(namespace, viewport).await {
            Ok(value) => PanelState::Loaded(value),
            Err(error) => {
                log::warn!("panel '{}' failed to load {}: {}", namespace, viewport, error);
                PanelState::LoadFailed(error.to_string())
            }
        }
    }

    pub fn teardown(self) {
        self.reconciler.detach();
        log::debug!("plot view torn down");
    }
}
