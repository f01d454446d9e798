use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod session;

pub use session::AuthSession;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
