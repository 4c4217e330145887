//! Single-flight coordination backed by a shared key-value store.
//!
//! One caller per resource wins a `SET NX PX` election, runs the task and
//! publishes its JSON-encoded result; every other caller polls the result key
//! until the value appears or its own timeout elapses.  All coordination
//! state lives in the store, so callers on different nodes cooperate without
//! any local shared state.

pub mod error;
pub mod flight;
pub mod keys;
pub mod log;
pub mod node;
pub mod options;

pub use error::FlightError;
pub use flight::{run_with_single_flight, SingleFlight};
pub use keys::FlightKeys;
pub use log::{Level, LogHooks};
pub use options::FlightOptions;
