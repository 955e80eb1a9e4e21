//! Two-way viewport sync between the store and the render surface
//!
//! Two transitions keep the model's viewport and the surface's viewport equal:
//!
//! - **remote to render**: a remote write of the viewport key is pushed into
//!   the surface with `apply_state`, never written back.
//! - **render to remote**: a surface `viewport_changed` event is written to the
//!   store as a local write and flushed with `save`.
//!
//! Both compare the new viewport with the one already held by the other side
//! first. `apply_state` usually makes the surface re-emit `viewport_changed`;
//! the comparison is what stops that echo from bouncing back.

use crate::dataflow::{ObservableStore, Origin, StoreError, SubscriptionId};
use serde_json::Value;
use shared::{POSITION_KEY, Viewport};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub type ViewportHandler = Box<dyn Fn(&Viewport) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("render surface rejected {viewport}: {reason}")]
    Rejected { viewport: Viewport, reason: String },
}

/// Capabilities the reconciler needs from the plot it drives.
pub trait RenderSurface: Send + Sync {
    /// Viewport currently displayed.
    fn viewport(&self) -> Viewport;

    /// Move to `viewport` and redraw.
    fn apply_state(&self, viewport: &Viewport) -> Result<(), SurfaceError>;

    /// Call `handler` whenever the displayed viewport changes, whether through
    /// user interaction or `apply_state`.
    fn on_viewport_changed(&self, handler: ViewportHandler) -> SubscriptionId;

    fn remove_viewport_handler(&self, id: SubscriptionId);

    /// Re-layout after the container changed size.
    fn rescale(&self);
}

fn same_viewport(a: &Viewport, b: &Viewport) -> bool {
    a.chr == b.chr && a.start == b.start && a.end == b.end
}

#[derive(Default)]
struct Subscriptions {
    store: Option<SubscriptionId>,
    surface: Option<SubscriptionId>,
}

pub struct ViewStateReconciler {
    store: ObservableStore,
    surface: Arc<dyn RenderSurface>,
    key: String,
    subscriptions: Mutex<Subscriptions>,
}

impl ViewStateReconciler {
    /// Wire the store's `position` key to `surface`.
    pub fn attach(
        store: ObservableStore,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<Arc<Self>, SurfaceError> {
        Self::attach_key(store, surface, POSITION_KEY)
    }

    /// Wire `key` to `surface`.
    ///
    /// When the two sides disagree at this point the model wins: one
    /// corrective `apply_state` is issued before the subscriptions go live.
    pub fn attach_key(
        store: ObservableStore,
        surface: Arc<dyn RenderSurface>,
        key: &str,
    ) -> Result<Arc<Self>, SurfaceError> {
        let reconciler = Arc::new(Self {
            store,
            surface,
            key: key.to_string(),
            subscriptions: Mutex::new(Subscriptions::default()),
        });

        match reconciler.model_viewport() {
            Ok(model) => {
                reconciler.push_to_surface(&model)?;
            }
            Err(error) => log::warn!("no initial model viewport to reconcile: {}", error),
        }

        let weak: Weak<Self> = Arc::downgrade(&reconciler);
        let store_subscription = reconciler.store.subscribe(key, {
            let weak = weak.clone();
            move |value: &Value, origin| {
                let Some(reconciler) = weak.upgrade() else {
                    return;
                };
                if let Err(error) = reconciler.on_model_changed(value, origin) {
                    log::error!("failed to apply model viewport: {}", error);
                }
            }
        });

        let surface_subscription = reconciler.surface.on_viewport_changed(Box::new(
            move |viewport: &Viewport| {
                if let Some(reconciler) = weak.upgrade() {
                    reconciler.on_render_changed(viewport);
                }
            },
        ));

        {
            let mut subscriptions = reconciler
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscriptions.store = Some(store_subscription);
            subscriptions.surface = Some(surface_subscription);
        }

        Ok(reconciler)
    }

    pub fn model_viewport(&self) -> Result<Viewport, StoreError> {
        self.store.get_as(&self.key)
    }

    /// Remote-to-render transition for a store notification.
    ///
    /// Local writes are ignored; they originate from the surface already.
    /// Returns whether `apply_state` was called.
    pub fn on_model_changed(&self, value: &Value, origin: Origin) -> Result<bool, SurfaceError> {
        if origin == Origin::Local {
            return Ok(false);
        }
        let model: Viewport = match serde_json::from_value(value.clone()) {
            Ok(viewport) => viewport,
            Err(error) => {
                log::warn!("ignoring malformed '{}' value {}: {}", self.key, value, error);
                return Ok(false);
            }
        };
        self.push_to_surface(&model)
    }

    fn push_to_surface(&self, model: &Viewport) -> Result<bool, SurfaceError> {
        let rendered = self.surface.viewport();
        if same_viewport(model, &rendered) {
            log::trace!("surface already shows {}", model);
            return Ok(false);
        }
        log::debug!("model changed, moving surface from {} to {}", rendered, model);
        self.surface.apply_state(model)?;
        Ok(true)
    }

    /// Render-to-remote transition for a surface event.
    ///
    /// Returns whether the store was written.
    pub fn on_render_changed(&self, rendered: &Viewport) -> bool {
        match self.model_viewport() {
            Ok(model) if same_viewport(&model, rendered) => {
                log::trace!("model already holds {}", rendered);
                return false;
            }
            Ok(_) => {}
            Err(error) => log::debug!("overwriting unreadable model viewport: {}", error),
        }

        log::debug!("surface changed, setting model to {}", rendered);
        self.store.set(&self.key, rendered.to_value(), Origin::Local);
        if let Err(error) = self.store.save() {
            log::error!("failed to flush {}: {}", self.key, error);
        }
        true
    }

    /// Drop both subscriptions. Further changes on either side are ignored.
    pub fn detach(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = subscriptions.store.take() {
            self.store.unsubscribe(&self.key, id);
        }
        if let Some(id) = subscriptions.surface.take() {
            self.surface.remove_viewport_handler(id);
        }
    }
}

impl Drop for ViewStateReconciler {
    fn drop(&mut self) {
        self.detach();
    }
}
