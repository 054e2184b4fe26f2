//! Client connection manager: one multiplexed WebSocket connection per
//! process, with local subscriber fan-out and automatic reconnection.

mod backoff;
mod service;
mod subscribers;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use service::{ClientConfig, ClientError, SocketClient};
pub use subscribers::{SubscriberSet, SubscriptionId};
