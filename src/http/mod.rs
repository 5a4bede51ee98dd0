//! HTTP control surface
//!
//! - GET /start?room_id=ID - Join a room and record it
//! - GET /stop?room_id=ID - Leave a room
//! - GET /sessions - List registered sessions
//! - GET /healthz - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::StatusResponse;
pub use routes::create_router;
pub use state::AppState;
