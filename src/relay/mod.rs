//! Room relay: fan-out of presence updates, chat messages, and notifications.

mod dispatcher;
mod types;

pub use dispatcher::{DeliveryResult, RelayDispatcher, RelayStats, RelayStatsSnapshot};
pub use types::{ChatMessage, ChatPayload, Notification, NotificationKind, RoomData};
