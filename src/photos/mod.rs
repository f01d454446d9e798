pub mod archive;
mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod thumbnails;

use crate::{config::UploadConfig, state::AppState};
use axum::Router;

pub fn router(upload: &UploadConfig) -> Router<AppState> {
    Router::new()
        .merge(handlers::upload_routes(upload))
        .merge(handlers::admin_routes())
}
