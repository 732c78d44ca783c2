//! Outbound messages: envelope + pub/sub bus mechanics.
//!
//! Domain crates implement [`Message`] for their notification payloads; the
//! infra layer wraps them in an [`Envelope`] and publishes them on an
//! [`EventBus`] for delivery workers.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod message;

pub use bus::{EventBus, Subscription};
pub use envelope::Envelope;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use message::Message;
