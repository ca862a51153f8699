mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use self::router::handle_request;
pub use self::types::{AppState, Request};
