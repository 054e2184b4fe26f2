mod settings;

pub use settings::{ApiConfig, RelayConfig, ServerConfig, Settings, WebSocketConfig};
