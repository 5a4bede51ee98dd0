//! Cross-thread handoff into a session scheduler.
//!
//! A session's scheduler is owned by its worker thread. Other threads never touch
//! it directly: they [`submit`](SchedulerPort::submit) a unit of work through the
//! worker's port and [`wait`](Pending::wait) on the paired completion with a bound.
//! The worker side drains its [`SchedulerInbox`] on its own thread.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;

/// Scheduler-side half of a pending result. Fulfilled at most once.
#[derive(Debug)]
pub struct Completion<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Completion<T> {
    /// Deliver the result. Returns `false` if the waiting side already gave up.
    pub fn complete(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    /// True once the waiting side has dropped its [`Pending`].
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Caller-side half of a pending result
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Wait up to `timeout` for the result.
    ///
    /// Fails with [`Error::SchedulerStopped`] if the scheduler dropped the work
    /// without completing it, and [`Error::Timeout`] if the bound expires first.
    pub async fn wait(self, timeout: Duration, operation: &'static str) -> Result<T, Error> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::SchedulerStopped),
            Err(_) => Err(Error::Timeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Pair a completion with its pending result
pub fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, Pending { rx })
}

/// Caller-side handle for submitting work to one scheduler
#[derive(Debug)]
pub struct SchedulerPort<W> {
    tx: mpsc::UnboundedSender<W>,
}

/// Scheduler-side queue of submitted work
#[derive(Debug)]
pub struct SchedulerInbox<W> {
    rx: mpsc::UnboundedReceiver<W>,
}

/// Create the port/inbox pair for a new scheduler
pub fn scheduler_channel<W>() -> (SchedulerPort<W>, SchedulerInbox<W>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SchedulerPort { tx }, SchedulerInbox { rx })
}

impl<W> SchedulerPort<W> {
    /// Submit work built around a fresh completion.
    ///
    /// Fails immediately with [`Error::SchedulerStopped`] if the scheduler has
    /// already shut down; never hangs.
    pub fn submit<T>(&self, build: impl FnOnce(Completion<T>) -> W) -> Result<Pending<T>, Error> {
        if self.tx.is_closed() {
            return Err(Error::SchedulerStopped);
        }
        let (completion, pending) = completion();
        self.tx
            .send(build(completion))
            .map_err(|_| Error::SchedulerStopped)?;
        Ok(pending)
    }
}

impl<W> SchedulerInbox<W> {
    /// Next submitted work item; `None` once every port is dropped.
    pub async fn recv(&mut self) -> Option<W> {
        self.rx.recv().await
    }

    /// Refuse further submissions. Queued items can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Work {
        Echo(u32, Completion<u32>),
    }

    #[tokio::test]
    async fn test_submit_and_wait_across_threads() {
        let (port, mut inbox) = scheduler_channel::<Work>();

        let worker = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                if let Some(Work::Echo(value, done)) = inbox.recv().await {
                    done.complete(value * 2);
                }
            });
        });

        let pending = port.submit(|done| Work::Echo(21, done)).unwrap();
        let value = pending.wait(Duration::from_secs(1), "echo").await.unwrap();
        assert_eq!(value, 42);
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_submit_to_stopped_scheduler_fails() {
        let (port, inbox) = scheduler_channel::<Work>();
        drop(inbox);

        let result = port.submit(|done: Completion<u32>| Work::Echo(1, done));
        assert!(matches!(result, Err(Error::SchedulerStopped)));
    }

    #[tokio::test]
    async fn test_dropped_work_reports_scheduler_stopped() {
        let (port, mut inbox) = scheduler_channel::<Work>();
        let pending = port.submit(|done| Work::Echo(1, done)).unwrap();
        drop(inbox.recv().await);

        let result = pending.wait(Duration::from_secs(1), "echo").await;
        assert!(matches!(result, Err(Error::SchedulerStopped)));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (port, _inbox) = scheduler_channel::<Work>();
        let pending = port.submit(|done| Work::Echo(1, done)).unwrap();

        let result = pending.wait(Duration::from_millis(20), "echo").await;
        assert!(matches!(result, Err(Error::Timeout { operation: "echo", .. })));
    }

    #[test]
    fn test_completion_detects_abandoned_waiter() {
        let (done, pending) = completion::<u32>();
        drop(pending);
        assert!(done.is_abandoned());
        assert!(!done.complete(1));
    }
}
