//! State primitives shared by the view side
//!
//! - **[`ObservableStore`]** - origin-tagged key-value state with synchronous subscriptions
//! - **[`Relay`]** - sending half of an unbounded event channel

pub mod relay;
pub mod store;

pub use relay::{Relay, RelayError, relay};
pub use store::{ObservableStore, Origin, StoreEntry, StoreError, StoreHandler, SubscriptionId};
