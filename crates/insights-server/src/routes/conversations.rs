//! Conversation ingestion endpoints: single, bulk,
//! and streaming NDJSON admission, all funneling into
//! [`insights_core::admission::Admission`].

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use insights_core::admission::AdmissionResult;
use insights_core::model::IngestTweet;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use crate::error::ApiError;
use crate::state::AppState;

/// Conversations committed per transaction while streaming.
const STREAM_CHUNK_SIZE: usize = 32;
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Wire shape of one conversation: a bundle of messages, with
/// `conversation_id` always resolved server-side.
#[derive(Debug, Deserialize)]
pub struct ConversationWire {
    pub messages: Vec<IngestTweet>,
}

#[derive(Debug, Serialize)]
pub struct SingleResponse {
    pub conversation_id: String,
    pub enqueued: bool,
}

/// `POST /api/v1/conversations`. If the queue is full, the conversation is
/// still durably committed but the caller sees a 503 with a `Retry-After`
/// estimate — the recovery sweep (C9) picks it up later.
pub async fn submit_one(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConversationWire>,
) -> Result<Response, ApiError> {
    let result = state.admission.submit_one(body.messages).await?;
    if !result.enqueued {
        return Err(ApiError::QueueFull {
            retry_after_secs: state.estimated_drain_seconds(),
        });
    }
    Ok((
        StatusCode::CREATED,
        Json(SingleResponse {
            conversation_id: result.conversation_id,
            enqueued: result.enqueued,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub conversations: Vec<ConversationWire>,
}

#[derive(Debug, Serialize)]
pub struct BulkResultItem {
    pub conversation_id: String,
    pub enqueued: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub backpressure: usize,
    pub results: Vec<BulkResultItem>,
}

/// `POST /api/v1/conversations/bulk`. Unlike the single endpoint, a bulk
/// request is never rejected wholesale for backpressure — every
/// conversation is committed and per-item `enqueued` flags report which
/// ones missed the queue.
pub async fn submit_bulk(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, ApiError> {
    let conversations: Vec<Vec<IngestTweet>> =
        body.conversations.into_iter().map(|c| c.messages).collect();
    let results = state.admission.submit_batch(conversations).await?;
    Ok(Json(summarize(results)))
}

fn summarize(results: Vec<AdmissionResult>) -> BulkResponse {
    let backpressure = results.iter().filter(|r| !r.enqueued).count();
    let accepted = results.len();
    let results = results
        .into_iter()
        .map(|r| BulkResultItem {
            conversation_id: r.conversation_id,
            enqueued: r.enqueued,
        })
        .collect();
    BulkResponse {
        accepted,
        rejected: 0,
        backpressure,
        results,
    }
}

/// `POST /api/v1/conversations/bulk/stream`: NDJSON request, NDJSON
/// response. One result line per input line — a malformed line yields an
/// `{"error": ...}` line rather than aborting the stream — followed by a
/// final `_summary` line once the body is exhausted.
///
/// Valid conversations are batched into chunks of
/// [`STREAM_CHUNK_SIZE`] and committed together to amortize transaction
/// overhead; a malformed line forces an early flush of whatever's pending
/// so result lines stay in input order.
pub async fn submit_bulk_stream(State(state): State<Arc<AppState>>, body: Body) -> Response {
    let byte_stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = StreamReader::new(byte_stream);
    let mut lines = tokio::io::BufReader::new(reader).lines();

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut pending: Vec<ConversationWire> = Vec::new();
        let mut accepted: usize = 0;
        let mut rejected: usize = 0;
        let mut backpressure: usize = 0;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    let _ = send_line(&tx, &serde_json::json!({ "error": err.to_string() })).await;
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<ConversationWire>(&line) {
                Ok(conversation) => match conversation_is_well_formed(&conversation) {
                    Ok(()) => pending.push(conversation),
                    Err(reason) => {
                        flush(&state, &mut pending, &tx, &mut accepted, &mut backpressure).await;
                        rejected += 1;
                        let _ = send_line(&tx, &serde_json::json!({ "error": reason })).await;
                    }
                },
                Err(err) => {
                    flush(&state, &mut pending, &tx, &mut accepted, &mut backpressure).await;
                    rejected += 1;
                    let _ = send_line(
                        &tx,
                        &serde_json::json!({ "error": format!("malformed line: {err}") }),
                    )
                    .await;
                }
            }

            if pending.len() >= STREAM_CHUNK_SIZE {
                flush(&state, &mut pending, &tx, &mut accepted, &mut backpressure).await;
            }
        }
        flush(&state, &mut pending, &tx, &mut accepted, &mut backpressure).await;

        let _ = send_line(
            &tx,
            &serde_json::json!({
                "_summary": { "accepted": accepted, "rejected": rejected, "backpressure": backpressure }
            }),
        )
        .await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("static response parts are always valid")
}

/// Mirrors `insights_core::admission`'s structural validation so a
/// malformed conversation can be rejected before it joins a commit batch,
/// instead of failing the whole chunk and losing its valid siblings.
fn conversation_is_well_formed(conversation: &ConversationWire) -> Result<(), String> {
    if conversation.messages.is_empty() {
        return Err("conversation must contain at least one message".to_string());
    }
    for message in &conversation.messages {
        if message.tweet_id.trim().is_empty() {
            return Err("tweet_id must not be empty".to_string());
        }
        if message.author_id.trim().is_empty() {
            return Err("author_id must not be empty".to_string());
        }
        if message.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }
    }
    Ok(())
}

async fn send_line(tx: &mpsc::Sender<Result<Bytes, std::io::Error>>, value: &serde_json::Value) {
    let mut line = serde_json::to_vec(value).expect("json::Value always serializes");
    line.push(b'\n');
    let _ = tx.send(Ok(Bytes::from(line))).await;
}

async fn flush(
    state: &Arc<AppState>,
    pending: &mut Vec<ConversationWire>,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    accepted: &mut usize,
    backpressure: &mut usize,
) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<Vec<IngestTweet>> = std::mem::take(pending)
        .into_iter()
        .map(|c| c.messages)
        .collect();

    match state.admission.submit_batch(batch).await {
        Ok(results) => {
            for result in results {
                *accepted += 1;
                if !result.enqueued {
                    *backpressure += 1;
                }
                send_line(
                    tx,
                    &serde_json::json!({
                        "conversation_id": result.conversation_id,
                        "enqueued": result.enqueued,
                    }),
                )
                .await;
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "bulk stream chunk commit failed");
            send_line(tx, &serde_json::json!({ "error": err.to_string() })).await;
        }
    }
}
