//! Client-side session and selective-update layer for the hostdesk admin UI.
//!
//! The session lives in a [`session::SessionStore`]; requests go through a
//! [`dispatch::Dispatcher`]; host-info snapshots fan out over the
//! [`notifier::UpdateNotifier`] and views refetch only when the revision
//! marker for their feature changes ([`sync`]). [`idle`] ends sessions left
//! idle and keeps active ones alive.

pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod idle;
pub mod notifier;
pub mod poller;
pub mod session;
pub mod storage;
pub mod sync;
pub mod wire;

#[cfg(target_arch = "wasm32")]
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClientConfig, ConfigError};
pub use context::ClientContext;
pub use controller::{ControllerError, KeepaliveOutcome, SessionController};
pub use dispatch::{
    Dispatcher, HostInfoSource, LocalSpawner, OperationName, Timer, TransportError,
};
pub use idle::{
    Clock, IdleConfig, IdleEvent, IdleMonitor, IdleState, IdleSupervisor, ManualClock,
    SystemClock,
};
pub use notifier::{Subscription, Topic, UpdateNotifier};
pub use poller::HostInfoPoller;
pub use session::{Module, SessionBundle, SessionError, SessionStore, SessionToken};
pub use storage::{KeyValueStore, MemoryStore, NavigationHint, NavigationHints, StorageError};
pub use sync::{FeatureView, LastSeen, NodeTotals, SyncedView};
pub use wire::{
    ClusterDescriptor, HostInfoSnapshot, LoginEvent, LoginEventKind, OperationMode,
    RequestEnvelope, ResponseEnvelope, ResponseStatus, RevisionMarker,
};
