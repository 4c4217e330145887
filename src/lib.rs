//! Distributed single-flight with a cached result.
//!
//! Many callers (possibly on different machines) ask for the same named task
//! to run against the same resource.  Exactly one of them wins a lock in
//! KeyDB and runs the task; the rest poll for the published result instead
//! of running the task themselves.
//!
//! The protocol lives in [`coordination`]; the key-value backends it talks to
//! live in [`store`].

pub mod command;
pub mod config;
pub mod coordination;
pub mod metrics;
pub mod store;

pub use coordination::{run_with_single_flight, FlightError, FlightOptions, LogHooks, SingleFlight};
pub use store::{KeyValueStore, SetOptions, StoreError};
