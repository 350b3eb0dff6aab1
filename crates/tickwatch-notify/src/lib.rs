//! Multi-channel alert dispatch for tickwatch.
//!
//! Two channel types are supported:
//! - `direct`: application message API, authorized with a cached access token
//! - `webhook`: group robot endpoint, payload truncated to a byte budget
//!
//! Every valid channel is attempted independently; one channel failing never
//! blocks the others.

pub mod channel_store;
pub mod dispatcher;
pub mod error;
pub mod token_cache;
pub mod transport;
pub mod truncate;

pub use channel_store::{ChannelDocument, ChannelStore, ChannelUpdate};
pub use dispatcher::{
    ChannelDispatcher, ConnectionTest, DeliveryFailure, DeliveryOutcome, DispatchEntry,
    DispatchReport, FailureKind, SendOptions,
};
pub use error::{NotifyError, NotifyResult};
pub use token_cache::TokenCache;
pub use transport::{
    ChannelTransport, DirectMessage, HttpTransport, MockTransport, SentMessage, TokenGrant,
    TransportConfig,
};
pub use truncate::{truncate_for_webhook, WEBHOOK_BYTE_BUDGET};
