//! Domain models for the Neural Ledger
//!
//! The event taxonomy, the ledger event record itself, and the small value
//! types shared across the write and read paths.

mod event;
mod event_type;
mod types;

pub use event::*;
pub use event_type::*;
pub use types::*;
