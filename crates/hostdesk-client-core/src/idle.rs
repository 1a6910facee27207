//! Idle detection with a warning countdown, plus periodic session keepalive.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use web_time::Instant;

use crate::controller::{KeepaliveOutcome, SessionController};
use crate::dispatch::{LocalSpawner, Timer};
use crate::notifier::{Subscription, UpdateNotifier};
use crate::wire::{LoginEvent, LoginEventKind};

pub const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_WARNING_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
pub const TIMED_OUT_REASON: &str = "Timed out!";

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    pub idle_after: Duration,
    pub warning_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_after: DEFAULT_IDLE_AFTER,
            warning_timeout: DEFAULT_WARNING_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    IdleWarning,
    TimedOut,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    IdleStarted,
    Countdown { remaining_secs: u64 },
    IdleEnded,
    TimedOut,
    KeepaliveDue,
}

/// Pure state machine; callers feed it interactions and poll it.
#[derive(Debug)]
pub struct IdleMonitor<C: Clock = SystemClock> {
    clock: C,
    config: IdleConfig,
    state: IdleState,
    last_activity: Instant,
    last_keepalive: Instant,
    warning_started: Option<Instant>,
    last_countdown: Option<u64>,
}

impl<C: Clock> IdleMonitor<C> {
    pub fn new(config: IdleConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            clock,
            config,
            state: IdleState::Active,
            last_activity: now,
            last_keepalive: now,
            warning_started: None,
            last_countdown: None,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn config(&self) -> IdleConfig {
        self.config
    }

    /// Back to `Active` with zero idle time elapsed.
    pub fn reset(&mut self) {
        let now = self.clock.now();
        if matches!(self.state, IdleState::Stopped | IdleState::TimedOut) {
            self.last_keepalive = now;
        }
        self.state = IdleState::Active;
        self.last_activity = now;
        self.warning_started = None;
        self.last_countdown = None;
    }

    pub fn stop(&mut self) {
        self.state = IdleState::Stopped;
        self.warning_started = None;
        self.last_countdown = None;
    }

    /// Interaction during the warning window ends it; an expired window is
    /// left for the next `poll` to time out.
    pub fn record_interaction(&mut self) -> Option<IdleEvent> {
        match self.state {
            IdleState::Active => {
                self.last_activity = self.clock.now();
                None
            }
            IdleState::IdleWarning => {
                if self.warning_elapsed() >= self.config.warning_timeout {
                    return None;
                }
                self.reset();
                Some(IdleEvent::IdleEnded)
            }
            IdleState::TimedOut | IdleState::Stopped => None,
        }
    }

    /// `startSession` (re)starts the monitor, `stopSession` stops it. An
    /// `error` event means the session is gone, so a running monitor stops too.
    pub fn on_login_event(&mut self, event: &LoginEvent) {
        match event.kind {
            LoginEventKind::StartSession => self.reset(),
            LoginEventKind::StopSession => self.stop(),
            LoginEventKind::Error => {
                if matches!(self.state, IdleState::Active | IdleState::IdleWarning) {
                    self.stop();
                }
            }
            LoginEventKind::Ok => {}
        }
    }

    pub fn poll(&mut self) -> Vec<IdleEvent> {
        let now = self.clock.now();
        let mut events = Vec::new();

        if self.state == IdleState::Active {
            if now.saturating_duration_since(self.last_activity) >= self.config.idle_after {
                self.state = IdleState::IdleWarning;
                self.warning_started = Some(self.last_activity + self.config.idle_after);
                events.push(IdleEvent::IdleStarted);
            } else if now.saturating_duration_since(self.last_keepalive)
                >= self.config.keepalive_interval
            {
                self.last_keepalive = now;
                events.push(IdleEvent::KeepaliveDue);
            }
        }

        if self.state == IdleState::IdleWarning {
            let elapsed = self.warning_elapsed();
            if elapsed >= self.config.warning_timeout {
                self.state = IdleState::TimedOut;
                self.warning_started = None;
                self.last_countdown = None;
                events.push(IdleEvent::TimedOut);
            } else {
                let remaining = ceil_secs(self.config.warning_timeout - elapsed);
                if self.last_countdown != Some(remaining) {
                    self.last_countdown = Some(remaining);
                    events.push(IdleEvent::Countdown {
                        remaining_secs: remaining,
                    });
                }
            }
        }

        events
    }

    fn warning_elapsed(&self) -> Duration {
        match self.warning_started {
            Some(started) => self.clock.now().saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// What the idle banner shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdleStatus {
    pub label: String,
    pub last_keepalive_at: Option<DateTime<Utc>>,
    pub keepalive_failures: u32,
}

/// Drives an [`IdleMonitor`] and applies its side effects.
pub struct IdleSupervisor<C: Clock + 'static = SystemClock> {
    monitor: Rc<RefCell<IdleMonitor<C>>>,
    controller: Rc<SessionController>,
    spawner: Rc<dyn LocalSpawner>,
    tick: Duration,
    status: Rc<RefCell<IdleStatus>>,
    _login: Subscription,
}

impl<C: Clock + 'static> IdleSupervisor<C> {
    pub fn new(
        monitor: IdleMonitor<C>,
        controller: Rc<SessionController>,
        notifier: &UpdateNotifier,
        spawner: Rc<dyn LocalSpawner>,
        tick: Duration,
    ) -> Self {
        let monitor = Rc::new(RefCell::new(monitor));
        let listener = Rc::downgrade(&monitor);
        let login = notifier.subscribe_login(move |event| {
            if let Some(monitor) = listener.upgrade() {
                monitor.borrow_mut().on_login_event(event);
            }
        });
        Self {
            monitor,
            controller,
            spawner,
            tick,
            status: Rc::new(RefCell::new(IdleStatus::default())),
            _login: login,
        }
    }

    pub fn state(&self) -> IdleState {
        self.monitor.borrow().state()
    }

    pub fn status(&self) -> IdleStatus {
        self.status.borrow().clone()
    }

    pub fn record_interaction(&self) {
        let event = self.monitor.borrow_mut().record_interaction();
        if event == Some(IdleEvent::IdleEnded) {
            tracing::info!("user is active again");
            self.status.borrow_mut().label.clear();
        }
    }

    pub fn tick(&self) -> Vec<IdleEvent> {
        let events = self.monitor.borrow_mut().poll();
        for event in &events {
            match event {
                IdleEvent::IdleStarted => {
                    tracing::info!("user went idle");
                    self.status.borrow_mut().label = "You've gone idle!".to_string();
                }
                IdleEvent::Countdown { remaining_secs } => {
                    self.status.borrow_mut().label = format!("{remaining_secs} seconds!");
                }
                IdleEvent::IdleEnded => {
                    self.status.borrow_mut().label.clear();
                }
                IdleEvent::TimedOut => {
                    tracing::warn!("idle timeout; ending session");
                    self.status.borrow_mut().label = TIMED_OUT_REASON.to_string();
                    if let Err(error) = self.controller.force_logout(TIMED_OUT_REASON) {
                        tracing::warn!(error = %error, "failed to clear session after idle timeout");
                    }
                }
                IdleEvent::KeepaliveDue => self.spawn_keepalive(),
            }
        }
        events
    }

    fn spawn_keepalive(&self) {
        let controller = Rc::clone(&self.controller);
        let status = Rc::clone(&self.status);
        self.spawner.spawn_local(Box::pin(async move {
            match controller.validate_session().await {
                Ok(KeepaliveOutcome::Refreshed) => {
                    let mut status = status.borrow_mut();
                    status.last_keepalive_at = Some(Utc::now());
                    status.keepalive_failures = 0;
                }
                Ok(outcome) => {
                    tracing::debug!(?outcome, "keepalive finished without refresh");
                }
                Err(error) => {
                    status.borrow_mut().keepalive_failures += 1;
                    tracing::warn!(error = %error, "keepalive failed");
                }
            }
        }));
    }

    /// Ticks forever.
    pub async fn run(&self, timer: &dyn Timer) {
        loop {
            timer.sleep(self.tick).await;
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Module, SessionBundle, SessionStore, SessionToken};
    use crate::storage::MemoryStore;
    use crate::testing::{ImmediateSpawner, ScriptedDispatcher};
    use crate::wire::ResponseEnvelope;
    use serde_json::json;

    fn config() -> IdleConfig {
        IdleConfig {
            idle_after: Duration::from_secs(30),
            warning_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(20),
        }
    }

    fn alice() -> SessionBundle {
        SessionBundle::authenticated(
            "alice",
            Module::Admin,
            SessionToken::new("1", "pw", "t1").expect("token"),
        )
        .expect("bundle")
    }

    #[test]
    fn idle_warning_counts_down_then_times_out() {
        let clock = ManualClock::new();
        let mut monitor = IdleMonitor::new(config(), clock.clone());

        clock.advance(Duration::from_secs(30));
        assert_eq!(
            monitor.poll(),
            vec![
                IdleEvent::IdleStarted,
                IdleEvent::Countdown { remaining_secs: 10 }
            ]
        );
        assert_eq!(monitor.state(), IdleState::IdleWarning);

        clock.advance(Duration::from_millis(2500));
        assert_eq!(
            monitor.poll(),
            vec![IdleEvent::Countdown { remaining_secs: 8 }]
        );
        assert!(monitor.poll().is_empty());

        clock.advance(Duration::from_millis(7500));
        assert_eq!(monitor.poll(), vec![IdleEvent::TimedOut]);
        assert_eq!(monitor.state(), IdleState::TimedOut);
    }

    #[test]
    fn late_poll_still_times_out_from_the_idle_deadline() {
        let clock = ManualClock::new();
        let mut monitor = IdleMonitor::new(config(), clock.clone());
        clock.advance(Duration::from_secs(45));
        assert_eq!(
            monitor.poll(),
            vec![IdleEvent::IdleStarted, IdleEvent::TimedOut]
        );
    }

    #[test]
    fn interaction_during_warning_resets_elapsed_time() {
        let clock = ManualClock::new();
        let mut monitor = IdleMonitor::new(config(), clock.clone());
        clock.advance(Duration::from_secs(31));
        monitor.poll();

        assert_eq!(monitor.record_interaction(), Some(IdleEvent::IdleEnded));
        assert_eq!(monitor.state(), IdleState::Active);

        clock.advance(Duration::from_secs(29));
        assert!(!monitor.poll().contains(&IdleEvent::IdleStarted));
        clock.advance(Duration::from_secs(1));
        assert!(monitor.poll().contains(&IdleEvent::IdleStarted));
    }

    #[test]
    fn interaction_after_warning_expired_does_not_rescue() {
        let clock = ManualClock::new();
        let mut monitor = IdleMonitor::new(config(), clock.clone());
        clock.advance(Duration::from_secs(30));
        monitor.poll();
        clock.advance(Duration::from_secs(10));
        assert_eq!(monitor.record_interaction(), None);
        assert_eq!(monitor.poll(), vec![IdleEvent::TimedOut]);
    }

    #[test]
    fn keepalive_fires_while_active_regardless_of_activity() {
        let clock = ManualClock::new();
        let mut monitor = IdleMonitor::new(config(), clock.clone());
        clock.advance(Duration::from_secs(15));
        monitor.record_interaction();
        clock.advance(Duration::from_secs(5));
        assert_eq!(monitor.poll(), vec![IdleEvent::KeepaliveDue]);
        assert!(monitor.poll().is_empty());
        clock.advance(Duration::from_secs(20));
        assert_eq!(monitor.poll(), vec![IdleEvent::KeepaliveDue]);
    }

    #[test]
    fn stop_and_start_session_events_control_monitor() {
        let clock = ManualClock::new();
        let mut monitor = IdleMonitor::new(config(), clock.clone());
        monitor.on_login_event(&LoginEvent::stop_session());
        clock.advance(Duration::from_secs(600));
        assert!(monitor.poll().is_empty());
        assert_eq!(monitor.state(), IdleState::Stopped);

        monitor.on_login_event(&LoginEvent::start_session());
        assert_eq!(monitor.state(), IdleState::Active);
        assert!(monitor.poll().is_empty());
    }

    #[test]
    fn supervisor_timeout_clears_session_and_announces_error() {
        let storage = Rc::new(MemoryStore::new());
        let session = Rc::new(SessionStore::new(storage.clone()));
        session.set(&alice()).expect("persist");
        let notifier = Rc::new(UpdateNotifier::new());
        let dispatcher = Rc::new(ScriptedDispatcher::always_ok());
        let controller = Rc::new(SessionController::new(
            dispatcher,
            session.clone(),
            notifier.clone(),
        ));
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let _login = notifier.subscribe_login(move |event| sink.borrow_mut().push(event.clone()));

        let clock = ManualClock::new();
        let supervisor = IdleSupervisor::new(
            IdleMonitor::new(config(), clock.clone()),
            controller,
            &notifier,
            Rc::new(ImmediateSpawner),
            DEFAULT_TICK,
        );

        clock.advance(Duration::from_secs(29));
        supervisor.tick();
        clock.advance(Duration::from_secs(1));
        supervisor.tick();
        assert_eq!(supervisor.status().label, "10 seconds!");
        clock.advance(Duration::from_secs(10));
        supervisor.tick();

        assert_eq!(supervisor.state(), IdleState::TimedOut);
        assert_eq!(session.get(), SessionBundle::empty());
        assert_eq!(*events.borrow(), vec![LoginEvent::error(TIMED_OUT_REASON)]);
        assert!(storage.is_empty());
    }

    #[test]
    fn supervisor_keepalive_rotates_token() {
        let session = Rc::new(SessionStore::new(Rc::new(MemoryStore::new())));
        session.set(&alice()).expect("persist");
        let notifier = Rc::new(UpdateNotifier::new());
        let dispatcher = Rc::new(ScriptedDispatcher::new(|_, _| {
            Ok(ResponseEnvelope::from_value(
                json!({"Name": "ok", "Status": "", "Token": "t2"}),
            ))
        }));
        let controller = Rc::new(SessionController::new(
            dispatcher.clone(),
            session.clone(),
            notifier.clone(),
        ));
        let clock = ManualClock::new();
        let supervisor = IdleSupervisor::new(
            IdleMonitor::new(config(), clock.clone()),
            controller,
            &notifier,
            Rc::new(ImmediateSpawner),
            DEFAULT_TICK,
        );

        clock.advance(Duration::from_secs(20));
        assert_eq!(supervisor.tick(), vec![IdleEvent::KeepaliveDue]);
        assert_eq!(dispatcher.simple_requests(), vec!["validateSession"]);
        assert_eq!(
            session.get().token().map(SessionToken::to_transport),
            Some("1|pw|t2".to_string())
        );
        assert!(supervisor.status().last_keepalive_at.is_some());
    }

    #[test]
    fn supervisor_info_keepalive_leaves_status_unstamped() {
        let session = Rc::new(SessionStore::new(Rc::new(MemoryStore::new())));
        session.set(&alice()).expect("persist");
        let notifier = Rc::new(UpdateNotifier::new());
        let controller = Rc::new(SessionController::new(
            Rc::new(ScriptedDispatcher::new(|_, _| {
                Ok(ResponseEnvelope::info("try again later"))
            })),
            session.clone(),
            notifier.clone(),
        ));
        let clock = ManualClock::new();
        let supervisor = IdleSupervisor::new(
            IdleMonitor::new(config(), clock.clone()),
            controller,
            &notifier,
            Rc::new(ImmediateSpawner),
            DEFAULT_TICK,
        );

        clock.advance(Duration::from_secs(20));
        assert_eq!(supervisor.tick(), vec![IdleEvent::KeepaliveDue]);
        assert_eq!(session.get(), alice());
        assert!(supervisor.status().last_keepalive_at.is_none());
    }

    #[test]
    fn supervisor_reacts_to_login_events() {
        let session = Rc::new(SessionStore::new(Rc::new(MemoryStore::new())));
        let notifier = Rc::new(UpdateNotifier::new());
        let controller = Rc::new(SessionController::new(
            Rc::new(ScriptedDispatcher::always_ok()),
            session,
            notifier.clone(),
        ));
        let supervisor = IdleSupervisor::new(
            IdleMonitor::new(config(), ManualClock::new()),
            controller,
            &notifier,
            Rc::new(ImmediateSpawner),
            DEFAULT_TICK,
        );
        notifier.publish_login(&LoginEvent::stop_session());
        assert_eq!(supervisor.state(), IdleState::Stopped);
        notifier.publish_login(&LoginEvent::start_session());
        assert_eq!(supervisor.state(), IdleState::Active);
    }
}
