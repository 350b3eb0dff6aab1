//! File persistence for tickwatch.
//!
//! - JSON documents (instrument and channel stores) rewritten atomically
//! - JSON Lines cycle history with daily file rotation

pub mod document;
pub mod error;
pub mod writer;

pub use document::{read_json, write_json_atomic};
pub use error::{PersistenceError, PersistenceResult};
pub use writer::{read_records, JsonLinesWriter};
