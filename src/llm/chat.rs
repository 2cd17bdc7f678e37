use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::models::ChatTurn;

/// Generation can far outlive the client's default deadline, so chat
/// requests carry their own.
const STREAM_TIMEOUT_SECS: u64 = 300;

/// Stream of content deltas from the model, one per chunk.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream a chat completion from the configured provider.
pub async fn stream_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatTurn>,
) -> Result<ChatStream> {
    match config.provider.as_str() {
        "ollama" => stream_ollama(client, config, messages).await,
        "openai" => stream_openai(client, config, messages).await,
        other => Err(Error::Internal(anyhow::anyhow!(
            "Unknown LLM provider: {other}"
        ))),
    }
}

/// Run a chat completion to the end and return the full answer.
pub async fn complete_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatTurn>,
) -> Result<String> {
    match config.provider.as_str() {
        "ollama" => complete_ollama(client, config, messages).await,
        "openai" => complete_openai(client, config, messages).await,
        other => Err(Error::Internal(anyhow::anyhow!(
            "Unknown LLM provider: {other}"
        ))),
    }
}

fn send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("chat request timed out after {STREAM_TIMEOUT_SECS}s"))
    } else {
        Error::ModelGeneration(format!("Failed to reach chat API: {e}"))
    }
}

async fn api_error(provider: &str, resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Error::ModelGeneration(format!("{provider} chat API returned {status}: {body}"))
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatTurn>,
    stream: bool,
}

#[derive(Deserialize)]
struct TurnBody {
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<TurnBody>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

async fn stream_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatTurn>,
) -> Result<ChatStream> {
    let url = format!("{}/api/chat", config.base_url);
    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages,
        stream: true,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
        .json(&req)
        .send()
        .await
        .map_err(send_error)?;

    if !resp.status().is_success() {
        return Err(api_error("Ollama", resp).await);
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(|line| async move {
        match line {
            Ok(line) => parse_ollama_line(&line),
            Err(e) => Some(Err(e)),
        }
    });
    Ok(Box::pin(stream))
}

async fn complete_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatTurn>,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);
    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages,
        stream: false,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
        .json(&req)
        .send()
        .await
        .map_err(send_error)?;

    if !resp.status().is_success() {
        return Err(api_error("Ollama", resp).await);
    }

    let body: OllamaChatChunk = resp
        .json()
        .await
        .map_err(|e| Error::ModelGeneration(format!("Bad chat response: {e}")))?;
    if let Some(err) = body.error {
        return Err(Error::ModelGeneration(err));
    }
    Ok(body.message.map(|m| m.content).unwrap_or_default())
}

/// Parse one Ollama streaming line. Returns:
/// - `Some(Ok(content))` for content deltas
/// - `Some(Err(e))` for in-band errors and parse failures
/// - `None` to skip (empty content or done marker)
fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaChatChunk>(line) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                return Some(Err(Error::ModelGeneration(err)));
            }
            if chunk.done {
                return None;
            }
            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(Error::ModelGeneration(format!(
            "Failed to parse model output: {e}"
        )))),
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatTurn>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChatChoice>,
}

#[derive(Deserialize)]
struct OpenAiChatChoice {
    message: TurnBody,
}

async fn stream_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatTurn>,
) -> Result<ChatStream> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let req = OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages,
        stream: true,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
        .header(
            "Authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or("")),
        )
        .json(&req)
        .send()
        .await
        .map_err(send_error)?;

    if !resp.status().is_success() {
        return Err(api_error("OpenAI", resp).await);
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(|line| async move {
        match line {
            Ok(line) => parse_openai_line(&line),
            Err(e) => Some(Err(e)),
        }
    });
    Ok(Box::pin(stream))
}

async fn complete_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatTurn>,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let req = OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages,
        stream: false,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
        .header(
            "Authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or("")),
        )
        .json(&req)
        .send()
        .await
        .map_err(send_error)?;

    if !resp.status().is_success() {
        return Err(api_error("OpenAI", resp).await);
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .map_err(|e| Error::ModelGeneration(format!("Bad chat response: {e}")))?;
    Ok(body
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default())
}

/// Parse one OpenAI SSE line. Returns:
/// - `Some(Ok(content))` for content deltas
/// - `Some(Err(e))` for in-band errors and parse failures
/// - `None` to skip (non-data lines, `[DONE]`, role-only chunks)
fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(parse_err) => {
            // Providers report failures mid-stream as {"error": {...}}.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                if let Some(msg) = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                {
                    return Some(Err(Error::ModelGeneration(msg.to_string())));
                }
            }
            Some(Err(Error::ModelGeneration(format!(
                "Failed to parse model output: {parse_err}"
            ))))
        }
    }
}

// ─── Line buffering ──────────────────────────────────────

/// Convert a byte stream into a stream of complete non-empty lines.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    futures_util::stream::unfold(
        (Box::pin(byte_stream), String::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                    Some(Err(e)) => {
                        return Some((
                            Err(Error::ModelGeneration(format!("Stream read error: {e}"))),
                            (stream, buffer),
                        ));
                    }
                    None => {
                        // Stream ended; flush whatever is left.
                        if buffer.trim().is_empty() {
                            return None;
                        }
                        let rest = std::mem::take(&mut buffer);
                        return Some((Ok(rest), (stream, buffer)));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Ollama parsing ──────────────────────────────────

    #[test]
    fn test_parse_ollama_delta() {
        let line = r#"{"message":{"role":"assistant","content":"The ingest"},"done":false}"#;
        assert_eq!(parse_ollama_line(line).unwrap().unwrap(), "The ingest");
    }

    #[test]
    fn test_parse_ollama_done() {
        let line = r#"{"message":{"role":"assistant","content":""},"done":true}"#;
        assert!(parse_ollama_line(line).is_none());
    }

    #[test]
    fn test_parse_ollama_empty_content() {
        let line = r#"{"message":{"role":"assistant","content":""},"done":false}"#;
        assert!(parse_ollama_line(line).is_none());
    }

    #[test]
    fn test_parse_ollama_error_field() {
        let line = r#"{"error":"model runner has unexpectedly stopped"}"#;
        let err = parse_ollama_line(line).unwrap().unwrap_err();
        assert_eq!(err.kind(), "ModelGenerationError");
        assert!(err.to_string().contains("unexpectedly stopped"));
    }

    #[test]
    fn test_parse_ollama_malformed() {
        assert!(parse_ollama_line("not valid json{{{").unwrap().is_err());
    }

    // ─── OpenAI parsing ──────────────────────────────────

    #[test]
    fn test_parse_openai_data_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_openai_line(line).unwrap().unwrap(), "Hello");
    }

    #[test]
    fn test_parse_openai_data_line_without_space() {
        let line = r#"data:{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_openai_line(line).unwrap().unwrap(), "Hi");
    }

    #[test]
    fn test_parse_openai_done() {
        assert!(parse_openai_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_openai_empty_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":null}}]}"#;
        assert!(parse_openai_line(line).is_none());
    }

    #[test]
    fn test_parse_openai_role_only_chunk() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_openai_line(line).is_none());
    }

    #[test]
    fn test_parse_openai_error_payload() {
        let line = r#"data: {"error":{"message":"rate limit reached","type":"requests"}}"#;
        let err = parse_openai_line(line).unwrap().unwrap_err();
        assert_eq!(err.kind(), "ModelGenerationError");
        assert!(err.to_string().contains("rate limit reached"));
    }

    #[test]
    fn test_parse_openai_malformed() {
        assert!(parse_openai_line("data: {broken json").unwrap().is_err());
    }

    #[test]
    fn test_parse_openai_non_data_line() {
        assert!(parse_openai_line("event: message").is_none());
    }

    // ─── Edge cases ──────────────────────────────────────

    #[test]
    fn test_parse_blank_lines() {
        assert!(parse_ollama_line("").is_none());
        assert!(parse_openai_line("").is_none());
        assert!(parse_ollama_line("   ").is_none());
        assert!(parse_openai_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_stream_lines_splits_and_flushes() {
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from("first li")),
            Ok(bytes::Bytes::from("ne\nsecond line\n\ntail")),
        ];
        let lines: Vec<String> = stream_lines(futures_util::stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["first line", "second line", "tail"]);
    }
}
