//! Notification dispatch.
//!
//! The engine publishes a [`NotificationEnvelope`] after each committed change;
//! a [`NotificationWorker`] drains the bus and hands every envelope to a
//! [`Notifier`]. Delivery is fire-and-forget: failures are logged and dropped.

pub mod notifier;
pub mod worker;

use classbook_booking::Notification;
use classbook_events::{Envelope, InMemoryEventBus};

pub use notifier::{LogNotifier, Notifier, NotifyError, RecordingNotifier, WebhookNotifier};
pub use worker::{NotificationWorker, WorkerHandle};

pub type NotificationEnvelope = Envelope<Notification>;

/// Bus used by single-process deployments and tests.
pub type NotificationBus = InMemoryEventBus<NotificationEnvelope>;
