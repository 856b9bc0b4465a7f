//! Library listing endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::library::MediaItem;
use crate::server::AppContext;

pub fn library_routes() -> Router<AppContext> {
    Router::new()
        .route("/items", get(list_items))
        .route("/items/:item_id", get(get_item))
}

async fn list_items(State(ctx): State<AppContext>) -> Json<Vec<MediaItem>> {
    Json(ctx.library.list())
}

async fn get_item(
    State(ctx): State<AppContext>,
    Path(item_id): Path<u64>,
) -> Result<Json<MediaItem>, StatusCode> {
    ctx.library
        .get(item_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
