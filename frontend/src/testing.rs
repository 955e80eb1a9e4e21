//! In-memory render surface for exercising the view side without a plot.

use crate::dataflow::SubscriptionId;
use crate::reconciler::{RenderSurface, SurfaceError, ViewportHandler};
use shared::Viewport;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct SurfaceState {
    viewport: Viewport,
    applied: Vec<Viewport>,
    handlers: Vec<(SubscriptionId, Arc<ViewportHandler>)>,
    next_handler: u64,
    rescales: usize,
    fail_next_apply: Option<String>,
}

/// Records every call and re-emits `viewport_changed` after `apply_state`,
/// the way a real plot does.
#[derive(Default)]
pub struct FakeSurface {
    state: Mutex<SurfaceState>,
}

impl FakeSurface {
    pub fn new(viewport: Viewport) -> Self {
        let surface = Self::default();
        surface.lock().viewport = viewport;
        surface
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Viewports passed to `apply_state`, oldest first.
    pub fn applied(&self) -> Vec<Viewport> {
        self.lock().applied.clone()
    }

    pub fn rescale_count(&self) -> usize {
        self.lock().rescales
    }

    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn fail_next_apply(&self, reason: &str) {
        self.lock().fail_next_apply = Some(reason.to_string());
    }

    /// Simulate a pan or zoom by the user.
    pub fn user_moved_to(&self, viewport: Viewport) {
        self.lock().viewport = viewport.clone();
        self.emit(&viewport);
    }

    /// Fire `viewport_changed` without changing anything.
    pub fn emit(&self, viewport: &Viewport) {
        let handlers: Vec<Arc<ViewportHandler>> = self
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(viewport);
        }
    }
}

impl RenderSurface for FakeSurface {
    fn viewport(&self) -> Viewport {
        self.lock().viewport.clone()
    }

    fn apply_state(&self, viewport: &Viewport) -> Result<(), SurfaceError> {
        {
            let mut state = self.lock();
            if let Some(reason) = state.fail_next_apply.take() {
                return Err(SurfaceError::Rejected {
                    viewport: viewport.clone(),
                    reason,
                });
            }
            state.applied.push(viewport.clone());
            state.viewport = viewport.clone();
        }
        self.emit(viewport);
        Ok(())
    }

    fn on_viewport_changed(&self, handler: ViewportHandler) -> SubscriptionId {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_handler);
        state.next_handler += 1;
        state.handlers.push((id, Arc::new(handler)));
        id
    }

    fn remove_viewport_handler(&self, id: SubscriptionId) {
        self.lock().handlers.retain(|(existing, _)| *existing != id);
    }

    fn rescale(&self) {
        self.lock().rescales += 1;
    }
}
