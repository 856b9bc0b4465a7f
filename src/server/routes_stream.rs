//! Streaming and transcode endpoints.
//!
//! `/items/:id/stream` serves the source file as-is. `/items/:id/transcode`
//! acquires a session from the registry and streams its artifact while it
//! grows; identical concurrent requests share one encoder. The response
//! body holds the session reference, so a client disconnect releases it
//! without any explicit teardown call.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get},
    Json, Router,
};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::server::AppContext;
use crate::streaming::{content_type_for_path, serve_source, tail};
use crate::transcode::{
    OutputKind, Quality, SessionSnapshot, TranscodeError, TranscodeRequest, TranscodeState,
};

/// Estimate header for responses whose final length is not yet known.
pub const ESTIMATED_LENGTH_HEADER: &str = "x-estimated-content-length";

pub fn stream_routes() -> Router<AppContext> {
    Router::new()
        .route("/items/:item_id/stream", get(stream_item))
        .route("/items/:item_id/transcode", get(transcode_item))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:instance_id", delete(cancel_session))
}

#[derive(Debug, Deserialize)]
pub struct TranscodeParams {
    /// Output container; defaults by source kind when absent.
    output: Option<OutputKind>,
    /// Quality tier 0-3, or an explicit kbps value above that.
    quality: Option<u32>,
    /// Seek into the source, in seconds.
    #[serde(default)]
    offset: u32,
    /// Window length in seconds; absent means to the end.
    length: Option<u32>,
    /// Skip encoding and pass the source through.
    #[serde(default)]
    direct: bool,
}

/// Serve the source file with range support, no session involved.
async fn stream_item(
    State(ctx): State<AppContext>,
    Path(item_id): Path<u64>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let item = ctx.library.get(item_id).ok_or(StatusCode::NOT_FOUND)?;
    let content_type = content_type_for_path(&item.path);
    serve_source(&item.path, content_type, &headers, ()).await
}

async fn transcode_item(
    State(ctx): State<AppContext>,
    Path(item_id): Path<u64>,
    Query(params): Query<TranscodeParams>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let item = ctx.library.get(item_id).ok_or(StatusCode::NOT_FOUND)?;

    let request = TranscodeRequest {
        target: params
            .output
            .unwrap_or_else(|| OutputKind::default_for(item.kind)),
        quality: params.quality.map(Quality::from_raw).unwrap_or_default(),
        offset_seconds: params.offset,
        length_seconds: params.length,
        direct: params.direct,
    };

    let lease = match ctx.registry.acquire(&item, request).await {
        Ok(lease) => lease,
        Err(e @ TranscodeError::UnsupportedTarget { .. }) => {
            tracing::debug!(item_id, error = %e, "rejected transcode request");
            return Err(StatusCode::BAD_REQUEST);
        }
        Err(e) => {
            tracing::error!(item_id, error = %e, "failed to start transcode");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if lease.session().is_direct() {
        let content_type = content_type_for_path(&item.path);
        return serve_source(&item.path, content_type, &headers, lease).await;
    }

    let session = Arc::clone(lease.session());
    let artifact = session
        .artifact_path()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let state = session.state();
    let estimated = session.estimated_output_size();
    let content_type = session.target().content_type();
    let poll = Duration::from_millis(ctx.config.transcode.poll_ms);

    let log_key = session.key();
    let stream = tail::follow(artifact, session.subscribe_state(), poll)
        .inspect_err(move |e| {
            tracing::warn!(key = %log_key, error = %e, "artifact stream ended abnormally");
        })
        .map(move |chunk| {
            let _ = &lease;
            chunk
        });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);

    // A session that already finished has a real length on disk; a live
    // one gets the projected size in an advisory header instead.
    if state == TranscodeState::Finished {
        if let Some(len) = estimated {
            builder = builder.header(header::CONTENT_LENGTH, len.to_string());
        }
    } else if let Some(estimate) = estimated {
        builder = builder.header(ESTIMATED_LENGTH_HEADER, estimate.to_string());
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<SessionSnapshot>> {
    Json(ctx.registry.list_sessions())
}

async fn cancel_session(
    State(ctx): State<AppContext>,
    Path(instance_id): Path<Uuid>,
) -> StatusCode {
    if ctx.registry.cancel_instance(instance_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
