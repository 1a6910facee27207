//! Selective refresh: views refetch their data only when the host-info revision
//! marker for their feature key changes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::dispatch::{Dispatcher, LocalSpawner, TransportError};
use crate::notifier::{Subscription, UpdateNotifier};
use crate::session::SessionStore;
use crate::wire::{
    HostInfoSnapshot, LoginEventKind, RequestEnvelope, ResponseEnvelope, RevisionMarker,
    SimpleRequest,
};

pub const ACTIVE_NODES: &str = "activeNodes";
pub const ACTIVE_FRONTENDS: &str = "activeFrontends";
pub const CLUSTER_AVAILABLE: &str = "clusterAvailable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastSeen {
    Never,
    /// Last successful fetch returned no data. `at` is the marker that
    /// triggered it, or `None` for a fetch without a marker.
    Empty { at: Option<RevisionMarker> },
    Marker(RevisionMarker),
}

impl LastSeen {
    fn differs_from(&self, marker: &RevisionMarker) -> bool {
        match self {
            Self::Never => true,
            Self::Empty { at: Some(seen) } | Self::Marker(seen) => seen != marker,
            Self::Empty { at: None } => !marker.is_empty_marker(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    pub key: String,
    pub marker: Option<RevisionMarker>,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Data,
    NoData,
    Failed,
}

/// Marker bookkeeping for one feature key.
#[derive(Debug)]
pub struct FeatureView {
    key: String,
    last_seen: LastSeen,
    in_flight: Vec<RefreshTicket>,
    generation: u64,
    applied_generation: u64,
}

impl FeatureView {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            last_seen: LastSeen::Never,
            in_flight: Vec::new(),
            generation: 0,
            applied_generation: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn last_seen(&self) -> &LastSeen {
        &self.last_seen
    }

    pub fn is_fetching(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Number of fetches started so far.
    pub fn fetches_started(&self) -> u64 {
        self.generation
    }

    /// Returns a ticket when the snapshot calls for a refetch.
    pub fn observe(&mut self, snapshot: &HostInfoSnapshot) -> Option<RefreshTicket> {
        let marker = snapshot.marker(&self.key)?;
        if !self.last_seen.differs_from(marker) {
            return None;
        }
        if self
            .in_flight
            .iter()
            .any(|ticket| ticket.marker.as_ref() == Some(marker))
        {
            return None;
        }
        Some(self.begin(Some(marker.clone())))
    }

    /// Unconditional fetch, used for the first load of a screen. It starts after
    /// any fetch already in flight, so it answers for that fetch's marker too.
    pub fn initial_load(&mut self) -> RefreshTicket {
        let marker = self
            .in_flight
            .last()
            .and_then(|ticket| ticket.marker.clone());
        self.begin(marker)
    }

    fn begin(&mut self, marker: Option<RevisionMarker>) -> RefreshTicket {
        self.generation += 1;
        let ticket = RefreshTicket {
            key: self.key.clone(),
            marker,
            generation: self.generation,
        };
        self.in_flight.push(ticket.clone());
        ticket
    }

    /// Forgets everything seen so far; fetches still in flight complete as no-ops.
    pub fn reset(&mut self) {
        self.last_seen = LastSeen::Never;
        self.in_flight.clear();
        self.applied_generation = self.generation;
    }

    /// Records a finished fetch. Returns `true` when the result should be shown;
    /// completions older than an already applied one are ignored.
    pub fn complete(&mut self, ticket: &RefreshTicket, outcome: FetchOutcome) -> bool {
        self.in_flight
            .retain(|current| current.generation != ticket.generation);
        if ticket.generation <= self.applied_generation {
            return false;
        }
        match outcome {
            FetchOutcome::Failed => return false,
            FetchOutcome::Data => {
                if let Some(marker) = &ticket.marker {
                    self.last_seen = LastSeen::Marker(marker.clone());
                }
            }
            FetchOutcome::NoData => {
                self.last_seen = LastSeen::Empty {
                    at: ticket.marker.clone(),
                };
            }
        }
        self.applied_generation = ticket.generation;
        true
    }
}

type UpdateCallback<T> = Rc<dyn Fn(&[T])>;

struct ViewShared<T> {
    feature: RefCell<FeatureView>,
    request: RequestEnvelope,
    items: RefCell<Rc<Vec<T>>>,
    last_error: RefCell<Option<String>>,
    on_update: RefCell<Option<UpdateCallback<T>>>,
    session: Rc<SessionStore>,
    dispatcher: Rc<dyn Dispatcher>,
    spawner: Rc<dyn LocalSpawner>,
}

impl<T: DeserializeOwned + 'static> ViewShared<T> {
    fn on_snapshot(self: &Rc<Self>, snapshot: &HostInfoSnapshot) {
        let ticket = self.feature.borrow_mut().observe(snapshot);
        if let Some(ticket) = ticket {
            tracing::debug!(
                key = %ticket.key,
                marker = ticket.marker.as_ref().map_or("", |m| m.as_str()),
                "revision marker changed; refreshing"
            );
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_fetch(self: &Rc<Self>, ticket: RefreshTicket) {
        let envelope = self.request.clone().with_auth(&self.session.get());
        let dispatcher = Rc::clone(&self.dispatcher);
        let view: Weak<Self> = Rc::downgrade(self);
        self.spawner.spawn_local(Box::pin(async move {
            let result = dispatcher.dispatch(&envelope).await;
            let Some(view) = view.upgrade() else {
                tracing::debug!(key = %ticket.key, "view dropped before fetch completed");
                return;
            };
            view.finish(&ticket, result);
        }));
    }

    fn reset(&self) {
        self.feature.borrow_mut().reset();
        self.items.replace(Rc::new(Vec::new()));
        self.last_error.replace(None);
        let callback = self.on_update.borrow().clone();
        if let Some(callback) = callback {
            callback(&[]);
        }
    }

    fn finish(&self, ticket: &RefreshTicket, result: Result<ResponseEnvelope, TransportError>) {
        let (outcome, rows) = match result {
            Err(error) => {
                tracing::warn!(key = %ticket.key, error = %error, "view fetch failed");
                self.last_error.replace(Some(error.to_string()));
                (FetchOutcome::Failed, None)
            }
            Ok(response) if !response.is_ok() => {
                tracing::warn!(key = %ticket.key, status = response.status.as_str(), message = %response.message, "view fetch rejected");
                self.last_error.replace(Some(response.message));
                (FetchOutcome::Failed, None)
            }
            Ok(response) => match response.decode_payload::<Vec<T>>() {
                Ok(Some(rows)) if !rows.is_empty() => (FetchOutcome::Data, Some(rows)),
                Ok(_) => (FetchOutcome::NoData, Some(Vec::new())),
                Err(error) => {
                    tracing::warn!(key = %ticket.key, error = %error, "view rows undecodable");
                    self.last_error.replace(Some(error.to_string()));
                    (FetchOutcome::Failed, None)
                }
            },
        };
        if !self.feature.borrow_mut().complete(ticket, outcome) {
            return;
        }
        let Some(rows) = rows else {
            return;
        };
        let rows = Rc::new(rows);
        self.items.replace(Rc::clone(&rows));
        self.last_error.replace(None);
        let callback = self.on_update.borrow().clone();
        if let Some(callback) = callback {
            callback(&rows);
        }
    }
}

/// A list of rows kept in step with one feature's revision marker.
///
/// Dropping the view unsubscribes it; fetches still in flight complete as no-ops.
/// A `stopSession` or `error` login event resets it.
pub struct SyncedView<T> {
    shared: Rc<ViewShared<T>>,
    _host_info: Subscription,
    _login: Subscription,
}

impl<T: DeserializeOwned + 'static> SyncedView<T> {
    /// Binds a view whose fetch is the simple request named after `key`.
    pub fn new(
        key: impl Into<String>,
        notifier: &UpdateNotifier,
        session: Rc<SessionStore>,
        dispatcher: Rc<dyn Dispatcher>,
        spawner: Rc<dyn LocalSpawner>,
    ) -> Self {
        let key = key.into();
        let request = RequestEnvelope::from(SimpleRequest::new(key.clone()));
        Self::with_request(key, request, notifier, session, dispatcher, spawner)
    }

    pub fn with_request(
        key: impl Into<String>,
        request: RequestEnvelope,
        notifier: &UpdateNotifier,
        session: Rc<SessionStore>,
        dispatcher: Rc<dyn Dispatcher>,
        spawner: Rc<dyn LocalSpawner>,
    ) -> Self {
        let shared = Rc::new(ViewShared {
            feature: RefCell::new(FeatureView::new(key)),
            request,
            items: RefCell::new(Rc::new(Vec::new())),
            last_error: RefCell::new(None),
            on_update: RefCell::new(None),
            session,
            dispatcher,
            spawner,
        });
        let view = Rc::downgrade(&shared);
        let host_info = notifier.subscribe_host_info(move |snapshot| {
            if let Some(view) = view.upgrade() {
                view.on_snapshot(snapshot);
            }
        });
        let view = Rc::downgrade(&shared);
        let login = notifier.subscribe_login(move |event| {
            if !matches!(event.kind, LoginEventKind::Error | LoginEventKind::StopSession) {
                return;
            }
            let Some(view) = view.upgrade() else {
                return;
            };
            tracing::debug!(key = %view.feature.borrow().key(), "session ended; resetting view");
            view.reset();
        });
        Self {
            shared,
            _host_info: host_info,
            _login: login,
        }
    }

    /// Drops rows and markers, as after a logout.
    pub fn reset(&self) {
        self.shared.reset();
    }

    /// Fetches regardless of markers.
    pub fn load(&self) {
        let ticket = self.shared.feature.borrow_mut().initial_load();
        self.shared.spawn_fetch(ticket);
    }

    pub fn on_update(&self, callback: impl Fn(&[T]) + 'static) {
        self.shared.on_update.replace(Some(Rc::new(callback)));
    }

    pub fn key(&self) -> String {
        self.shared.feature.borrow().key().to_string()
    }

    pub fn items(&self) -> Rc<Vec<T>> {
        Rc::clone(&self.shared.items.borrow())
    }

    pub fn last_seen(&self) -> LastSeen {
        self.shared.feature.borrow().last_seen().clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.shared.feature.borrow().is_fetching()
    }

    pub fn fetches_started(&self) -> u64 {
        self.shared.feature.borrow().fetches_started()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.borrow().clone()
    }
}

/// One row of the `activeNodes` feature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActiveNode {
    #[serde(rename = "Hostname", default)]
    pub hostname: Option<String>,
    #[serde(rename = "Container", default)]
    pub containers: Option<Map<String, Value>>,
    #[serde(rename = "NumberOfCPUs", default)]
    pub cpus: Option<Value>,
    #[serde(rename = "Memory", default)]
    pub memory: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Resource sums shown next to the node list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeTotals {
    /// Nodes plus the containers they host.
    pub nodes: usize,
    pub vcpus: u64,
    pub memory: u64,
}

impl NodeTotals {
    /// Unparsable counts contribute zero.
    pub fn from_nodes(nodes: &[ActiveNode]) -> Self {
        nodes.iter().fold(Self::default(), |totals, node| Self {
            nodes: totals
                .nodes
                .saturating_add(1 + node.containers.as_ref().map_or(0, Map::len)),
            vcpus: totals
                .vcpus
                .saturating_add(node.cpus.as_ref().and_then(leading_count).unwrap_or(0)),
            memory: totals
                .memory
                .saturating_add(node.memory.as_ref().and_then(leading_count).unwrap_or(0)),
        })
    }
}

fn leading_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| *n >= 0.0).map(|n| n.trunc() as u64)),
        Value::String(text) => {
            let digits: String = text
                .trim_start()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}
