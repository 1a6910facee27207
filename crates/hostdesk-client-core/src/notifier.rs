//! Typed publish/subscribe topics for host-info, operation-mode and login events.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::wire::{HostInfoSnapshot, LoginEvent, OperationMode};

type Callback<T> = Rc<dyn Fn(&T)>;

struct TopicInner<T> {
    name: &'static str,
    next_id: Cell<u64>,
    subscribers: RefCell<Vec<(u64, Callback<T>)>>,
}

impl<T> TopicInner<T> {
    fn is_subscribed(&self, id: u64) -> bool {
        self.subscribers
            .borrow()
            .iter()
            .any(|(subscriber, _)| *subscriber == id)
    }
}

trait Detach {
    fn detach(&self, id: u64);
}

impl<T> Detach for TopicInner<T> {
    fn detach(&self, id: u64) {
        self.subscribers
            .borrow_mut()
            .retain(|(subscriber, _)| *subscriber != id);
    }
}

/// A single topic. Subscribers run in registration order.
pub struct Topic<T> {
    inner: Rc<TopicInner<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Topic<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Rc::new(TopicInner {
                name,
                next_id: Cell::new(0),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        let inner: Rc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            topic: Some(Rc::downgrade(&inner)),
        }
    }

    /// Delivers `value` to every current subscriber and returns how many ran.
    ///
    /// The subscriber list is snapshotted first; anyone unsubscribed while the
    /// publish is running is skipped.
    pub fn publish(&self, value: &T) -> usize {
        let snapshot: Vec<(u64, Callback<T>)> = self.inner.subscribers.borrow().clone();
        let mut delivered = 0;
        for (id, callback) in snapshot {
            if !self.inner.is_subscribed(id) {
                continue;
            }
            callback(value);
            delivered += 1;
        }
        tracing::trace!(topic = self.inner.name, delivered, "published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }
}

/// Live registration on a topic; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    topic: Option<Weak<dyn Detach>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.topic.as_ref().is_some_and(|topic| topic.strong_count() > 0)
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(topic) = self.topic.take().and_then(|topic| topic.upgrade()) {
            topic.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

pub struct UpdateNotifier {
    host_info: Topic<HostInfoSnapshot>,
    op_mode: Topic<OperationMode>,
    login: Topic<LoginEvent>,
    latest_host_info: RefCell<Option<Rc<HostInfoSnapshot>>>,
}

impl Default for UpdateNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateNotifier {
    pub fn new() -> Self {
        Self {
            host_info: Topic::new("host-info"),
            op_mode: Topic::new("operation-mode-changed"),
            login: Topic::new("login-changed"),
            latest_host_info: RefCell::new(None),
        }
    }

    pub fn subscribe_host_info(&self, callback: impl Fn(&HostInfoSnapshot) + 'static) -> Subscription {
        self.host_info.subscribe(callback)
    }

    /// Records `snapshot` as the latest value, then delivers it.
    pub fn publish_host_info(&self, snapshot: HostInfoSnapshot) -> usize {
        let snapshot = Rc::new(snapshot);
        self.latest_host_info.replace(Some(Rc::clone(&snapshot)));
        self.host_info.publish(&snapshot)
    }

    pub fn latest_host_info(&self) -> Option<Rc<HostInfoSnapshot>> {
        self.latest_host_info.borrow().clone()
    }

    pub fn subscribe_op_mode(&self, callback: impl Fn(&OperationMode) + 'static) -> Subscription {
        self.op_mode.subscribe(callback)
    }

    pub fn publish_op_mode(&self, mode: &OperationMode) -> usize {
        tracing::info!(op_mode = %mode, "operation mode changed");
        self.op_mode.publish(mode)
    }

    pub fn subscribe_login(&self, callback: impl Fn(&LoginEvent) + 'static) -> Subscription {
        self.login.subscribe(callback)
    }

    pub fn publish_login(&self, event: &LoginEvent) -> usize {
        tracing::debug!(kind = ?event.kind, status = %event.status, "login changed");
        self.login.publish(event)
    }

    pub fn host_info_topic(&self) -> &Topic<HostInfoSnapshot> {
        &self.host_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::LoginEventKind;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |value: &T| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let topic: Topic<u32> = Topic::new("numbers");
        let order = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&order);
        let second = Rc::clone(&order);
        let _a = topic.subscribe(move |value| first.borrow_mut().push(("a", *value)));
        let _b = topic.subscribe(move |value| second.borrow_mut().push(("b", *value)));

        assert_eq!(topic.publish(&7), 2);
        assert_eq!(*order.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let topic: Topic<u32> = Topic::new("numbers");
        let (seen, sink) = recorder();
        let subscription = topic.subscribe(sink);
        topic.publish(&1);
        drop(subscription);
        topic.publish(&2);
        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_during_publish_skips_pending_subscriber() {
        let topic: Topic<u32> = Topic::new("numbers");
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let handle = Rc::clone(&later);
        let _first = topic.subscribe(move |_| {
            handle.borrow_mut().take();
        });
        let (seen, sink) = recorder();
        later.replace(Some(topic.subscribe(sink)));

        assert_eq!(topic.publish(&1), 1);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn subscribe_and_publish_from_callback_do_not_panic() {
        let topic: Topic<u32> = Topic::new("numbers");
        let nested: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));
        let relay = topic.clone();
        let keep = Rc::clone(&nested);
        let _outer = topic.subscribe(move |value| {
            if *value == 1 {
                keep.borrow_mut().push(relay.subscribe(|_| {}));
                relay.publish(&2);
            }
        });
        topic.publish(&1);
        assert_eq!(topic.subscriber_count(), 2);
    }

    #[test]
    fn subscription_outliving_topic_is_inert() {
        let subscription = {
            let topic: Topic<u32> = Topic::new("numbers");
            topic.subscribe(|_| {})
        };
        assert!(!subscription.is_active());
        subscription.unsubscribe();
    }

    #[test]
    fn notifier_keeps_latest_host_info() {
        let notifier = UpdateNotifier::new();
        assert!(notifier.latest_host_info().is_none());
        let (seen, sink) = recorder::<HostInfoSnapshot>();
        let _subscription = notifier.subscribe_host_info(sink);

        notifier.publish_host_info(HostInfoSnapshot::default().with_marker("activeNodes", "1"));
        notifier.publish_host_info(HostInfoSnapshot::default().with_marker("activeNodes", "2"));

        let latest = notifier.latest_host_info().expect("latest");
        assert_eq!(latest.marker("activeNodes").map(|m| m.as_str()), Some("2"));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn topics_are_independent() {
        let notifier = UpdateNotifier::new();
        let (logins, sink) = recorder::<LoginEvent>();
        let _login = notifier.subscribe_login(sink);
        notifier.publish_op_mode(&OperationMode::Master);
        notifier.publish_login(&LoginEvent::error("Timed out!"));
        assert_eq!(logins.borrow().len(), 1);
        assert_eq!(logins.borrow()[0].kind, LoginEventKind::Error);
    }
}
