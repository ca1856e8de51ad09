//! # locastream-core
//!
//! Connection registry and broadcast hub for the locastream location server.
//!
//! - **Registry** - the set of live connections, safe under concurrent
//!   register, deregister and broadcast
//! - **Hub** - runs one receive loop per connection and fans every valid
//!   location sample out through the registry
//! - **HubObserver** - instrumentation hooks for metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  recv   ┌─────────────┐  snapshot  ┌─────────────┐
//! │ Connection  │────────▶│     Hub     │───────────▶│  Registry   │
//! └─────────────┘         └─────────────┘            └─────────────┘
//!        ▲                                                  │
//!        └──────────────────── send (outside lock) ─────────┘
//! ```

pub mod hub;
pub mod observer;
pub mod registry;

pub use hub::{Hub, HubConfig, SessionSummary};
pub use observer::{HubObserver, NoopObserver};
pub use registry::{Delivery, Registry};
