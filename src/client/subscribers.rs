//! Local subscriber registry for inbound events.
//!
//! Multiple callbacks may be registered per event kind (fan-out, not
//! replace). Dispatch happens on the connection pump task, so callbacks run
//! one at a time, in the order events arrived from the hub.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::relay::{ChatMessage, Notification, RoomData};

/// Identifier returned by subscribe operations, usable to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

#[derive(Default)]
pub struct SubscriberSet {
    next_id: AtomicU64,
    messages: Mutex<Vec<(u64, Callback<ChatMessage>)>>,
    room_data: Mutex<Vec<(u64, Callback<RoomData>)>>,
    notifications: Mutex<Vec<(u64, Callback<Notification>)>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_message_subscriber(
        &self,
        callback: impl Fn(ChatMessage) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.messages.lock().unwrap().push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    pub fn add_room_data_subscriber(
        &self,
        callback: impl Fn(RoomData) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.room_data.lock().unwrap().push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    pub fn add_notification_subscriber(
        &self,
        callback: impl Fn(Notification) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.notifications
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a previously registered callback. Returns false if the
    /// subscription was not found (already removed or cleared).
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let SubscriptionId(id) = id;
        remove_from(&self.messages, id)
            || remove_from(&self.room_data, id)
            || remove_from(&self.notifications, id)
    }

    /// Drop all registered callbacks (used on disconnect)
    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
        self.room_data.lock().unwrap().clear();
        self.notifications.lock().unwrap().clear();
    }

    pub fn dispatch_message(&self, message: ChatMessage) {
        for callback in self.snapshot(&self.messages) {
            callback(message.clone());
        }
    }

    pub fn dispatch_room_data(&self, data: RoomData) {
        for callback in self.snapshot(&self.room_data) {
            callback(data.clone());
        }
    }

    pub fn dispatch_notification(&self, notification: Notification) {
        for callback in self.snapshot(&self.notifications) {
            callback(notification.clone());
        }
    }

    // Snapshot before invoking so a callback may subscribe or unsubscribe
    // without deadlocking on the registry lock.
    fn snapshot<T>(&self, list: &Mutex<Vec<(u64, Callback<T>)>>) -> Vec<Callback<T>> {
        list.lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }
}

fn remove_from<T>(list: &Mutex<Vec<(u64, Callback<T>)>>, id: u64) -> bool {
    let mut list = list.lock().unwrap();
    match list.iter().position(|(entry_id, _)| *entry_id == id) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}
