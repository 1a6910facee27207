use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::dispatch::{HostInfoSource, Timer, TransportError};
use crate::notifier::UpdateNotifier;

/// Fetches host info on a fixed interval and publishes each snapshot.
pub struct HostInfoPoller {
    source: Rc<dyn HostInfoSource>,
    notifier: Rc<UpdateNotifier>,
    interval: Duration,
    consecutive_failures: Cell<u32>,
}

impl HostInfoPoller {
    pub fn new(source: Rc<dyn HostInfoSource>, notifier: Rc<UpdateNotifier>, interval: Duration) -> Self {
        Self {
            source,
            notifier,
            interval,
            consecutive_failures: Cell::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.get()
    }

    pub async fn poll_once(&self) -> Result<(), TransportError> {
        match self.source.fetch_host_info().await {
            Ok(snapshot) => {
                if self.consecutive_failures.replace(0) > 0 {
                    tracing::info!("host info polling recovered");
                }
                self.notifier.publish_host_info(snapshot);
                Ok(())
            }
            Err(error) => {
                let failures = self.consecutive_failures.get().saturating_add(1);
                self.consecutive_failures.set(failures);
                Err(error)
            }
        }
    }

    /// Polls until the future is dropped. Failures are logged and skipped.
    pub async fn run(&self, timer: &dyn Timer) {
        loop {
            if let Err(error) = self.poll_once().await {
                tracing::warn!(
                    error = %error,
                    consecutive_failures = self.consecutive_failures.get(),
                    "host info poll failed"
                );
            }
            timer.sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedHostInfo, TokioTestTimer};
    use crate::wire::HostInfoSnapshot;
    use std::cell::RefCell;

    fn snapshot(marker: &str) -> HostInfoSnapshot {
        HostInfoSnapshot::default().with_marker("activeNodes", marker)
    }

    #[test]
    fn poll_once_publishes_and_tracks_failures() {
        let source = Rc::new(ScriptedHostInfo::new(vec![
            Err(TransportError::Http {
                status: 503,
                body: "starting".to_string(),
            }),
            Ok(snapshot("1")),
        ]));
        let notifier = Rc::new(UpdateNotifier::new());
        let poller = HostInfoPoller::new(source, notifier.clone(), Duration::from_secs(1));

        assert!(futures::executor::block_on(poller.poll_once()).is_err());
        assert_eq!(poller.consecutive_failures(), 1);
        assert!(notifier.latest_host_info().is_none());

        futures::executor::block_on(poller.poll_once()).expect("poll");
        assert_eq!(poller.consecutive_failures(), 0);
        assert!(notifier.latest_host_info().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_polling_after_failures() {
        let source = Rc::new(ScriptedHostInfo::new(vec![
            Ok(snapshot("1")),
            Err(TransportError::Request {
                message: "offline".to_string(),
            }),
            Ok(snapshot("2")),
        ]));
        let notifier = Rc::new(UpdateNotifier::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = notifier.subscribe_host_info(move |snapshot| {
            sink.borrow_mut().push(snapshot.marker("activeNodes").cloned());
        });
        let poller = HostInfoPoller::new(source.clone(), notifier, Duration::from_secs(4));

        let timer = TokioTestTimer;
        let _ = tokio::time::timeout(Duration::from_secs(10), poller.run(&timer)).await;

        assert_eq!(source.fetches(), 3);
        assert_eq!(seen.borrow().len(), 2);
    }
}
