//! HTTP signal receiver.

mod http;

pub use http::{ApiError, AppState, WebhookResponse, create_router};
