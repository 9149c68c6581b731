//! General-agent query endpoints

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::json_event;
use crate::error::{Error, Result};
use crate::generation::StreamEvent;
use crate::routing::Agent;
use crate::server::state::AppState;
use crate::types::query::validate_query;
use crate::types::{ErrorChunk, Intent, QueryRequest, SimpleQueryParams, StreamChunk};

async fn general_agent(state: &AppState) -> Result<std::sync::Arc<Agent>> {
    state
        .agent(Intent::Other)
        .await
        .ok_or_else(|| Error::not_ready("General agent is not initialized"))
}

/// Stream an answer as `{delta, finished}` frames
pub async fn query_stream(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Sse<BoxStream<'static, std::result::Result<Event, Infallible>>>> {
    validate_query(&request.query)?;
    let agent = general_agent(&state).await?;

    let request_id = Uuid::new_v4();
    tracing::info!("[{}] Query: {}", request_id, request.query);

    let events: BoxStream<'static, Event> = match agent.answer_stream(&request.query).await {
        Ok(rx) => ReceiverStream::new(rx)
            .map(|event| match event {
                StreamEvent::Delta(delta) => json_event(&StreamChunk::delta(delta)),
                StreamEvent::Finished => json_event(&StreamChunk::finished()),
                StreamEvent::Error(error) => json_event(&ErrorChunk::new(error)),
            })
            .boxed(),
        Err(e) => {
            tracing::error!("[{}] Generation failed: {}", request_id, e);
            stream::once(async move { json_event(&ErrorChunk::new(e.to_string())) }).boxed()
        }
    };

    Ok(Sse::new(events.map(Ok).boxed()).keep_alive(KeepAlive::default()))
}

/// Stream raw answer text
///
/// Failures are appended to the body as `\n\n[error]: ...` since the status
/// line has already been sent.
pub async fn query_simple(
    State(state): State<AppState>,
    Query(params): Query<SimpleQueryParams>,
) -> Result<Response> {
    validate_query(&params.query)?;
    let agent = general_agent(&state).await?;

    let text: BoxStream<'static, String> = match agent.answer_stream(&params.query).await {
        Ok(rx) => ReceiverStream::new(rx)
            .filter_map(|event| async move {
                match event {
                    StreamEvent::Delta(delta) => Some(delta),
                    StreamEvent::Error(error) => Some(format!("\n\n[error]: {}", error)),
                    StreamEvent::Finished => None,
                }
            })
            .boxed(),
        Err(e) => stream::once(async move { format!("\n\n[error]: {}", e) }).boxed(),
    };

    let body = Body::from_stream(text.map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
