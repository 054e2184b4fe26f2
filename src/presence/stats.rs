use serde::Serialize;
use std::collections::HashMap;

/// Snapshot of the registry's presence state
#[derive(Debug, Clone, Serialize)]
pub struct PresenceStats {
    pub total_connections: usize,
    pub active_rooms: usize,
    /// room name -> current member count
    pub rooms: HashMap<String, usize>,
}
