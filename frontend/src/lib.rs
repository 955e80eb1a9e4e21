//! View side of the locus viewport bridge
//!
//! The kernel owns the authoritative widget state; this crate keeps a local
//! [`ObservableStore`] of it, drives a plot through [`RenderSurface`], and
//! serves the plot's association fetches from whatever the kernel pushed.
//!
//! - [`utils::until_ready`] - suspend until a condition holds, with backoff
//! - [`dataflow`] - the origin-tagged store and relays
//! - [`connection`] - transport between the store and the kernel
//! - [`adapters`] - named data adapters, including the store-backed one
//! - [`reconciler`] - viewport sync between store and surface
//! - [`view`] - one rendered plot and its lifecycle

pub mod adapters;
pub mod connection;
pub mod dataflow;
pub mod model;
pub mod reconciler;
pub mod testing;
pub mod utils;
pub mod view;

pub use adapters::{AdapterRegistry, DataAdapter, DataSources, FetchError, ModelAssociation};
pub use connection::{ConnectionAdapter, Transport, TransportError};
pub use dataflow::{ObservableStore, Origin, StoreError};
pub use reconciler::{RenderSurface, SurfaceError, ViewStateReconciler};
pub use utils::{PollError, RetryPolicy, until_ready};
pub use view::{PanelState, PlotView, ViewMessage};
