//! Failure notifications, dispatched through a bounded queue.
//!
//! A background task drains the queue into a [`NotificationSink`].
//! [`Notifier::notify`] waits for a free slot when the queue is full, so a
//! burst of failures slows the run down instead of losing notices.
//! [`NotifierWorker::shutdown`] stops intake and waits until everything already
//! queued has been attempted, so a run cannot finish while sends are in flight.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::NotifyError;

/// A message for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    /// HTML body.
    pub body: String,
}

/// Delivers notifications somewhere operators will see them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sink that only writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        warn!(
            subject = %notification.subject,
            body = %notification.body,
            "Notification (log only)"
        );
        Ok(())
    }
}

/// Counters reported when the worker shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Cheap-to-clone handle used to enqueue notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Starts the dispatch task and returns the enqueue handle and its worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, NotifierWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(dispatch(sink, rx, shutdown_rx));

        (
            Self { tx },
            NotifierWorker {
                shutdown: shutdown_tx,
                handle,
            },
        )
    }

    /// Enqueues a notification, waiting for room while the queue is full.
    ///
    /// Returns false only if the worker has stopped.
    pub async fn notify(&self, notification: Notification) -> bool {
        match self.tx.send(notification).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(n)) => {
                error!(subject = %n.subject, "Notification worker stopped, dropping notification");
                false
            }
        }
    }
}

/// Owner of the dispatch task.
#[derive(Debug)]
pub struct NotifierWorker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<DispatchStats>,
}

impl NotifierWorker {
    /// Stops accepting notifications, drains the queue and returns the counters.
    pub async fn shutdown(self) -> DispatchStats {
        let _ = self.shutdown.send(());
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Notification worker panicked");
                DispatchStats::default()
            }
        }
    }
}

async fn dispatch(
    sink: Arc<dyn NotificationSink>,
    mut rx: mpsc::Receiver<Notification>,
    mut shutdown: oneshot::Receiver<()>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Some(notification) => deliver(sink.as_ref(), &notification, &mut stats).await,
                None => break,
            },
            _ = &mut shutdown => {
                rx.close();
                while let Some(notification) = rx.recv().await {
                    deliver(sink.as_ref(), &notification, &mut stats).await;
                }
                break;
            }
        }
    }

    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Notification worker stopped"
    );
    stats
}

async fn deliver(
    sink: &dyn NotificationSink,
    notification: &Notification,
    stats: &mut DispatchStats,
) {
    match sink.deliver(notification).await {
        Ok(()) => {
            debug!(subject = %notification.subject, "Notification delivered");
            stats.delivered += 1;
        }
        Err(e) => {
            error!(subject = %notification.subject, error = %e, "Notification delivery failed");
            stats.failed += 1;
        }
    }
}

/// Escapes text for inclusion in an HTML notification body.
pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
