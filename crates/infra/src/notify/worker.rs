use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use classbook_events::{EventBus, Subscription};

use super::NotificationEnvelope;
use super::notifier::Notifier;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Drains the notification bus into a [`Notifier`].
///
/// - Subscribes before returning, so nothing published afterwards is missed
/// - Runs on its own thread and drives async delivery on `runtime`
/// - Delivery errors are logged and dropped (no retry)
#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    pub fn spawn<B, N>(bus: &B, notifier: N, runtime: Handle) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<NotificationEnvelope>,
        N: Notifier + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name("notification-worker".to_string())
            .spawn(move || worker_loop(sub, shutdown_rx, &notifier, &runtime))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<N: Notifier>(
    sub: Subscription<NotificationEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    notifier: &N,
    runtime: &Handle,
) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(envelope) => {
                match runtime.block_on(notifier.deliver(&envelope)) {
                    Ok(()) => debug!(
                        topic = envelope.topic(),
                        message_id = %envelope.message_id(),
                        "notification delivered"
                    ),
                    Err(err) => warn!(
                        topic = envelope.topic(),
                        message_id = %envelope.message_id(),
                        error = %err,
                        "notification delivery failed"
                    ),
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
