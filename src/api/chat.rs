use std::convert::Infallible;
use std::fmt::Write as _;
use std::pin::Pin;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{complete_chat, stream_chat, ChatStream};
use crate::models::{ChatTurn, JobStatus, RetrievedChunk, SourceRef, StreamEvent};
use crate::rag::ScoredChunk;
use crate::state::AppState;

const MAX_CHAT_MESSAGE_LEN: usize = 2000;
const MAX_HISTORY_TURNS: usize = 10;
const DEFAULT_TOP_K: usize = 5;
/// Chunk text is clipped to this length in `retrieved_chunks` echoes.
const PREVIEW_CHARS: usize = 200;
/// How long a request may wait for a chat slot before failing.
const QUEUE_WAIT_SECS: u64 = 30;

type EventStream = Pin<Box<dyn Stream<Item = std::result::Result<Event, Infallible>> + Send>>;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub repo_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub prior_turns: Option<Vec<ChatTurn>>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub retrieved_chunks: Vec<RetrievedChunk>,
}

/// POST /chat - Answer a question about an ingested repository.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    // ── Step 1: Validate and sanitize input ───────────────
    let prepared = prepare_request(req)?;

    // ── Step 2: Acquire a chat slot ───────────────────────
    let _permit = acquire_chat_permit(&state).await?;

    // ── Step 3: Check readiness, retrieve context ─────────
    ensure_ready(&state, prepared.repo_id).await?;
    let (scored, retrieved) =
        retrieve_for_chat(&state, prepared.repo_id, &prepared.message, prepared.top_k).await?;

    // ── Step 4: Generate the full answer ──────────────────
    let messages = build_messages(
        build_system_prompt(),
        &prepared.history,
        &build_context_block(&scored),
        &prepared.message,
    );
    let answer = complete_chat(&state.http, &state.config.llm, messages).await?;

    Ok(Json(ChatResponse {
        message: answer,
        retrieved_chunks: retrieved,
    }))
}

/// POST /chat/stream - Answer a question as a stream of SSE events.
///
/// The protocol is one `chunks` event with retrieval metadata, then any
/// number of `chunk` content increments, then exactly one terminal event
/// (`{"done":true}` or `{"error":...}`). Failures after the request has
/// been accepted, including an unready repository, are delivered in-band
/// as the single event of the stream.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<EventStream>> {
    let prepared = prepare_request(req)?;

    let events = match answer_stream(state, prepared).await {
        Ok(events) => events,
        Err(e) => single_event(StreamEvent::Error(e.stream_message())),
    };
    Ok(Sse::new(events))
}

/// Everything past input validation. Any error here becomes the one
/// terminal event of the stream rather than an HTTP error.
async fn answer_stream(state: AppState, prepared: PreparedChat) -> Result<EventStream> {
    let permit = acquire_chat_permit(&state).await?;

    ensure_ready(&state, prepared.repo_id).await?;
    let (scored, retrieved) =
        retrieve_for_chat(&state, prepared.repo_id, &prepared.message, prepared.top_k).await?;

    let messages = build_messages(
        build_system_prompt(),
        &prepared.history,
        &build_context_block(&scored),
        &prepared.message,
    );
    let deltas = stream_chat(&state.http, &state.config.llm, messages).await?;

    let idle_timeout = Duration::from_secs(state.config.chat_idle_timeout_secs);
    // The permit rides inside the closure so the slot stays held until the
    // client disconnects or the stream ends.
    let events = chat_events(retrieved, deltas, idle_timeout).map(move |event| {
        let _permit = &permit;
        sse_event(&event)
    });
    Ok(Box::pin(events))
}

// ─── Request preparation ─────────────────────────────────────

#[derive(Debug)]
struct PreparedChat {
    repo_id: Uuid,
    message: String,
    top_k: usize,
    history: Vec<ChatTurn>,
}

fn prepare_request(req: ChatRequest) -> Result<PreparedChat> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err(Error::InvalidInput("message is required".to_string()));
    }
    let message = sanitize_for_prompt(&truncate_to_char_boundary(&message, MAX_CHAT_MESSAGE_LEN));

    let top_k = match req.top_k {
        None => DEFAULT_TOP_K,
        Some(k) if k >= 1 => k as usize,
        Some(k) => {
            return Err(Error::InvalidInput(format!(
                "top_k must be at least 1, got {k}"
            )))
        }
    };

    Ok(PreparedChat {
        repo_id: req.repo_id,
        message,
        top_k,
        history: sanitize_history(req.prior_turns),
    })
}

/// Keep only well-formed user/assistant turns, cap at the most recent
/// `MAX_HISTORY_TURNS`, and sanitize each one.
fn sanitize_history(history: Option<Vec<ChatTurn>>) -> Vec<ChatTurn> {
    let turns: Vec<ChatTurn> = history
        .unwrap_or_default()
        .into_iter()
        .filter(|turn| turn.role == "user" || turn.role == "assistant")
        .map(|turn| ChatTurn {
            role: turn.role,
            content: sanitize_for_prompt(&truncate_to_char_boundary(
                &turn.content,
                MAX_CHAT_MESSAGE_LEN,
            )),
        })
        .collect();
    let skip = turns.len().saturating_sub(MAX_HISTORY_TURNS);
    turns.into_iter().skip(skip).collect()
}

/// Strip chat-template control tokens so user input and retrieved text
/// cannot break out of their message role.
fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|im_start|>", "").replace("<|im_end|>", "")
}

fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

// ─── Readiness and retrieval ─────────────────────────────────

/// Chat requires a completed ingestion. An unknown id reads the same as
/// an unfinished one so callers cannot probe which repos exist.
async fn ensure_ready(state: &AppState, repo_id: Uuid) -> Result<()> {
    match state.jobs.find(repo_id).await? {
        Some(job) if job.status == JobStatus::Completed => Ok(()),
        _ => Err(Error::RepositoryNotReady(repo_id)),
    }
}

async fn retrieve_for_chat(
    state: &AppState,
    repo_id: Uuid,
    message: &str,
    top_k: usize,
) -> Result<(Vec<ScoredChunk>, Vec<RetrievedChunk>)> {
    let scored = state.retriever.retrieve_scored(repo_id, message, top_k).await?;
    let retrieved = scored
        .iter()
        .map(|hit| RetrievedChunk {
            id: hit.chunk.id,
            similarity: hit.similarity,
            source_ref: hit.chunk.source_ref.clone(),
            text: truncate_to_char_boundary(&hit.chunk.text, PREVIEW_CHARS),
        })
        .collect();
    Ok((scored, retrieved))
}

async fn acquire_chat_permit(state: &AppState) -> Result<OwnedSemaphorePermit> {
    tokio::time::timeout(
        Duration::from_secs(QUEUE_WAIT_SECS),
        state.chat_limit.clone().acquire_owned(),
    )
    .await
    .map_err(|_| Error::Timeout(format!("waited over {QUEUE_WAIT_SECS}s for a chat slot")))?
    .map_err(|_| Error::Internal(anyhow::anyhow!("chat limiter closed")))
}

// ─── Prompt assembly ─────────────────────────────────────────

fn build_system_prompt() -> String {
    String::from(
        "You are a code mentor for a git repository the user has ingested into this service.\n\
         Each user message includes excerpts retrieved from that repository's files and\n\
         commit history. Answer ONLY from the provided excerpts. Never use outside knowledge\n\
         and never claim you cannot access the repository; the excerpts are in the message.\n\
         If the excerpts do not answer the question, say what you found and what is missing.\n\
         Cite file paths, line ranges, and commit hashes. Use markdown code blocks for code.",
    )
}

fn build_context_block(hits: &[ScoredChunk]) -> String {
    let mut ctx = String::from("Here are excerpts retrieved from the repository:\n\n");
    if hits.is_empty() {
        ctx.push_str("(No relevant excerpts were found for this question.)\n");
    }
    for hit in hits {
        let header = match &hit.chunk.source_ref {
            SourceRef::File {
                path,
                start_line,
                end_line,
            } => format!("{path} (lines {start_line}-{end_line})"),
            SourceRef::Commit { hash, committed_at } => {
                format!("commit {} ({})", hash, committed_at.format("%Y-%m-%d"))
            }
        };
        let _ = write!(
            ctx,
            "--- {header} ---\n{}\n\n",
            sanitize_for_prompt(&hit.chunk.text)
        );
    }
    ctx
}

/// Context rides inside the final user message rather than the system
/// prompt; small local models attend to it more reliably there.
fn build_messages(
    system_prompt: String,
    history: &[ChatTurn],
    context_block: &str,
    message: &str,
) -> Vec<ChatTurn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatTurn {
        role: "system".to_string(),
        content: system_prompt,
    });
    messages.extend(history.iter().cloned());
    messages.push(ChatTurn {
        role: "user".to_string(),
        content: format!("{context_block}---\nQuestion: {message}"),
    });
    messages
}

// ─── Event plumbing ──────────────────────────────────────────

/// The full event sequence: retrieval metadata first, then the delta
/// machine.
fn chat_events(
    retrieved: Vec<RetrievedChunk>,
    deltas: ChatStream,
    idle_timeout: Duration,
) -> impl Stream<Item = StreamEvent> + Send {
    stream::once(async move { StreamEvent::Chunks(retrieved) })
        .chain(delta_machine(deltas, idle_timeout))
}

enum DeltaState {
    Streaming(ChatStream),
    Finished,
}

/// Drives the model stream to completion, emitting exactly one terminal
/// event. After an error or `done` the machine parks in `Finished` and
/// never polls the model stream again.
fn delta_machine(
    deltas: ChatStream,
    idle_timeout: Duration,
) -> impl Stream<Item = StreamEvent> + Send {
    stream::unfold(DeltaState::Streaming(deltas), move |state| async move {
        let mut deltas = match state {
            DeltaState::Streaming(deltas) => deltas,
            DeltaState::Finished => return None,
        };
        match tokio::time::timeout(idle_timeout, deltas.next()).await {
            Ok(Some(Ok(content))) => Some((
                StreamEvent::Content(content),
                DeltaState::Streaming(deltas),
            )),
            Ok(Some(Err(e))) => Some((
                StreamEvent::Error(e.stream_message()),
                DeltaState::Finished,
            )),
            Ok(None) => Some((StreamEvent::Done, DeltaState::Finished)),
            Err(_) => Some((
                StreamEvent::Error(format!(
                    "model stream stalled (no output for {}s)",
                    idle_timeout.as_secs()
                )),
                DeltaState::Finished,
            )),
        }
    })
}

fn single_event(event: StreamEvent) -> EventStream {
    Box::pin(stream::once(async move { sse_event(&event) }))
}

fn sse_event(event: &StreamEvent) -> std::result::Result<Event, Infallible> {
    let payload = event.to_payload();
    Ok(Event::default()
        .json_data(&payload)
        .unwrap_or_else(|_| Event::default().data(payload.to_string())))
}
