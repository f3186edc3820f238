//! Process-wide tracing setup shared by the api binary and tools.

pub mod tracing;

pub use tracing::init;
