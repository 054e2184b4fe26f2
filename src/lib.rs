// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (presence and relay logic)
pub mod presence;
pub mod relay;

// Application layer
pub mod api;
pub mod client;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
