//! Pub/sub plumbing for ledger notifications.
//!
//! The ledger engines emit user-facing notifications (gift received, booking
//! refunded, withdrawal approved, ...) as messages on a bus. The bus is a
//! distribution mechanism only: the journal is the source of truth, and
//! dropped or duplicated messages are acceptable.

pub mod bus;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
