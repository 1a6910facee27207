use std::rc::Rc;

use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::controller::SessionController;
use crate::dispatch::{Dispatcher, HostInfoSource, LocalSpawner};
use crate::idle::{Clock, IdleMonitor, IdleSupervisor};
use crate::notifier::UpdateNotifier;
use crate::poller::HostInfoPoller;
use crate::session::SessionStore;
use crate::storage::{KeyValueStore, NavigationHints};
use crate::sync::SyncedView;
use crate::wire::RequestEnvelope;

/// Shared services for one client, handed to every screen that needs them.
#[derive(Clone)]
pub struct ClientContext {
    pub config: ClientConfig,
    pub session: Rc<SessionStore>,
    pub hints: Rc<NavigationHints>,
    pub notifier: Rc<UpdateNotifier>,
    pub dispatcher: Rc<dyn Dispatcher>,
    pub spawner: Rc<dyn LocalSpawner>,
}

impl ClientContext {
    pub fn new(
        config: ClientConfig,
        storage: Rc<dyn KeyValueStore>,
        dispatcher: Rc<dyn Dispatcher>,
        spawner: Rc<dyn LocalSpawner>,
    ) -> Self {
        let session = Rc::new(SessionStore::with_key(
            Rc::clone(&storage),
            config.session_storage_key.clone(),
        ));
        Self {
            config,
            session,
            hints: Rc::new(NavigationHints::new(storage)),
            notifier: Rc::new(UpdateNotifier::new()),
            dispatcher,
            spawner,
        }
    }

    pub fn controller(&self) -> Rc<SessionController> {
        Rc::new(SessionController::new(
            Rc::clone(&self.dispatcher),
            Rc::clone(&self.session),
            Rc::clone(&self.notifier),
        ))
    }

    pub fn synced_view<T: DeserializeOwned + 'static>(&self, key: &str) -> SyncedView<T> {
        SyncedView::new(
            key,
            &self.notifier,
            Rc::clone(&self.session),
            Rc::clone(&self.dispatcher),
            Rc::clone(&self.spawner),
        )
    }

    pub fn synced_view_with_request<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
        request: RequestEnvelope,
    ) -> SyncedView<T> {
        SyncedView::with_request(
            key,
            request,
            &self.notifier,
            Rc::clone(&self.session),
            Rc::clone(&self.dispatcher),
            Rc::clone(&self.spawner),
        )
    }

    pub fn idle_supervisor<C: Clock + 'static>(
        &self,
        controller: Rc<SessionController>,
        clock: C,
    ) -> IdleSupervisor<C> {
        IdleSupervisor::new(
            IdleMonitor::new(self.config.idle, clock),
            controller,
            &self.notifier,
            Rc::clone(&self.spawner),
            self.config.idle_tick,
        )
    }

    pub fn poller(&self, source: Rc<dyn HostInfoSource>) -> HostInfoPoller {
        HostInfoPoller::new(source, Rc::clone(&self.notifier), self.config.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::{IdleState, ManualClock};
    use crate::storage::{MemoryStore, NavigationHint};
    use crate::sync::{ACTIVE_NODES, ActiveNode};
    use crate::testing::{ImmediateSpawner, ScriptedDispatcher};
    use crate::wire::{HostInfoSnapshot, ResponseEnvelope};
    use futures::executor::block_on;
    use serde_json::json;

    fn login_response() -> ResponseEnvelope {
        ResponseEnvelope::from_value(json!({
            "Name": "ok", "Status": "", "Owner": "alice", "Module": "Admin",
            "Id": "1", "Password": "pw", "Token": "t1"
        }))
    }

    #[test]
    fn login_then_snapshots_drive_one_fetch_per_marker() {
        let dispatcher = Rc::new(ScriptedDispatcher::new(|_, envelope| match envelope {
            RequestEnvelope::Simple(request) if request.request == "login" => Ok(login_response()),
            _ => Ok(ResponseEnvelope::ok(Some(json!([{"Hostname": "node-1"}])))),
        }));
        let context = ClientContext::new(
            ClientConfig::default(),
            Rc::new(MemoryStore::new()),
            dispatcher.clone(),
            Rc::new(ImmediateSpawner),
        );
        let controller = context.controller();
        let supervisor = context.idle_supervisor(Rc::clone(&controller), ManualClock::new());
        let nodes: SyncedView<ActiveNode> = context.synced_view(ACTIVE_NODES);

        block_on(controller.login("alice", "secret")).expect("login");
        assert_eq!(supervisor.state(), IdleState::Active);
        assert_eq!(context.session.get().owner(), Some("alice"));

        let fetches = |marker: &str| {
            let before = dispatcher.call_count();
            context
                .notifier
                .publish_host_info(HostInfoSnapshot::default().with_marker(ACTIVE_NODES, marker));
            dispatcher.call_count() - before
        };
        assert_eq!(fetches("3"), 1);
        assert_eq!(fetches("3"), 0);
        assert_eq!(fetches("5"), 1);
        assert_eq!(nodes.items().len(), 1);
        assert_eq!(dispatcher.simple_requests(), vec!["login", ACTIVE_NODES, ACTIVE_NODES]);
    }

    #[test]
    fn hints_and_session_share_storage() {
        let storage = Rc::new(MemoryStore::new());
        let context = ClientContext::new(
            ClientConfig::default(),
            storage.clone(),
            Rc::new(ScriptedDispatcher::always_ok()),
            Rc::new(ImmediateSpawner),
        );
        context
            .hints
            .set(NavigationHint::GroupName, "ops")
            .expect("set hint");
        context.session.clear().expect("clear");
        assert_eq!(storage.len(), 1);
    }
}
