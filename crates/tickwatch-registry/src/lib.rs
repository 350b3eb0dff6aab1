//! Instrument registry for tickwatch.
//!
//! Owns the set of tracked instruments and their mutable monitoring state
//! (last price, last update, last alert), backed by a JSON store.

pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{InstrumentDocument, InstrumentRegistry};
