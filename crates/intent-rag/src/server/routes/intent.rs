//! Intent classification and intent-routed answering

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::json_event;
use crate::classifier::{ModelSummary, Prediction};
use crate::error::{Error, Result};
use crate::generation::StreamEvent;
use crate::routing::{decide, RouteDecision};
use crate::server::state::AppState;
use crate::types::query::validate_query;
use crate::types::{IntentFrame, IntentOption, IntentQueryRequest, IntentResponse, QueryRequest};

fn options(ranked: &[(crate::types::Intent, f32)]) -> Vec<IntentOption> {
    ranked
        .iter()
        .map(|&(intent, confidence)| IntentOption { intent, confidence })
        .collect()
}

fn clarification_message(options: &[IntentOption]) -> String {
    let names: Vec<String> = options
        .iter()
        .map(|o| format!("{} ({:.2})", o.intent.display_name(), o.confidence))
        .collect();
    format!(
        "Not sure which assistant fits this question. Did you mean: {}?",
        names.join(", ")
    )
}

/// Classify a query without answering it
pub async fn predict_intent(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<IntentResponse>> {
    validate_query(&request.query)?;
    let prediction: Prediction = state.classify(&request.query).await?;
    let threshold = state.config().classifier.confidence_threshold;

    Ok(Json(IntentResponse {
        success: true,
        intent: prediction.best_intent,
        confidence: prediction.confidence,
        avatar: prediction.best_intent.avatar().to_string(),
        message: format!(
            "Detected intent: {} (confidence {:.2})",
            prediction.best_intent.display_name(),
            prediction.confidence
        ),
        needs_clarification: prediction.confidence < threshold,
        options: options(&prediction.top_options),
    }))
}

/// Summary of the trained classifier
pub async fn model_summary(State(state): State<AppState>) -> Result<Json<ModelSummary>> {
    state
        .classifier()
        .summary()
        .map(Json)
        .ok_or_else(|| Error::not_ready("Intent classifier is not trained"))
}

/// Classify, route to the intent's agent and answer
///
/// Every outcome after validation is reported in-stream: the intent frame,
/// then content frames and a finished frame; or a clarification frame when
/// confidence is low; or a terminal error frame.
pub async fn query_with_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentQueryRequest>,
) -> Result<Sse<BoxStream<'static, std::result::Result<Event, Infallible>>>> {
    validate_query(&request.query)?;

    let request_id = Uuid::new_v4();
    tracing::info!(
        "[{}] Intent query (stream: {}): {}",
        request_id,
        request.stream,
        request.query
    );

    let frames = intent_frames(&state, &request, request_id).await;
    Ok(Sse::new(frames.map(|f| Ok(json_event(&f))).boxed()).keep_alive(KeepAlive::default()))
}

fn frames(items: Vec<IntentFrame>) -> BoxStream<'static, IntentFrame> {
    stream::iter(items).boxed()
}

async fn intent_frames(
    state: &AppState,
    request: &IntentQueryRequest,
    request_id: Uuid,
) -> BoxStream<'static, IntentFrame> {
    let prediction = match state.classify(&request.query).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("[{}] Classification failed: {}", request_id, e);
            return frames(vec![IntentFrame::error(e.to_string())]);
        }
    };

    let threshold = state.config().classifier.confidence_threshold;
    let intent = match decide(&prediction, threshold) {
        RouteDecision::Confident(intent) => intent,
        RouteDecision::Clarify(ranked) => {
            tracing::info!(
                "[{}] Low confidence {:.2} for {}; asking for clarification",
                request_id,
                prediction.confidence,
                prediction.best_intent
            );
            let options = options(&ranked);
            let message = clarification_message(&options);
            return frames(vec![
                IntentFrame::Clarification { options, message },
                IntentFrame::finished(),
            ]);
        }
    };

    let Some(agent) = state.agent(intent).await else {
        return frames(vec![IntentFrame::error(format!(
            "Unsupported intent: {}",
            intent.display_name()
        ))]);
    };

    let avatar = intent.avatar().to_string();
    let confidence = prediction.confidence;

    if !request.stream {
        let frame = match agent.answer(&request.query).await {
            Ok(answer) => IntentFrame::Answer {
                intent,
                avatar,
                confidence,
                answer,
                has_docs: agent.document_count() > 0,
            },
            Err(e) => {
                tracing::error!("[{}] Generation failed: {}", request_id, e);
                IntentFrame::error(e.to_string())
            }
        };
        return frames(vec![frame]);
    }

    let head = IntentFrame::Intent {
        intent,
        avatar,
        confidence,
    };

    match agent.answer_stream(&request.query).await {
        Ok(rx) => {
            let body = ReceiverStream::new(rx).map(|event| match event {
                StreamEvent::Delta(delta) => IntentFrame::Content { delta },
                StreamEvent::Finished => IntentFrame::finished(),
                StreamEvent::Error(error) => IntentFrame::error(error),
            });
            stream::once(async move { head }).chain(body).boxed()
        }
        Err(e) => {
            tracing::error!("[{}] Generation failed: {}", request_id, e);
            frames(vec![head, IntentFrame::error(e.to_string())])
        }
    }
}
