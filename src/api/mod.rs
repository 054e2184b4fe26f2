mod health;
mod metrics;
mod notify;
mod routes;

pub use notify::broadcast_notification;
pub use routes::api_routes;
