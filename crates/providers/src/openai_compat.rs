//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/v1/chat/completions`.
//!
//! Supports:
//! - Streaming chat completions (SSE)
//! - Tool use / function calling, with tool calls assembled from deltas
//!   and reported in emission order

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tides_core::error::ProviderError;
use tides_core::message::{Message, MessagePart, Role};
use tides_core::provider::*;
use tides_core::tool::ToolCall;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert the system preamble and our turns to OpenAI API format.
    ///
    /// Tool turns expand to one API message per result; parts the model
    /// cannot consume are dropped.
    fn to_api_messages(system: &str, messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            out.push(ApiMessage::text("system", system));
        }

        for m in messages {
            match m.role {
                Role::User => {
                    let text = m.text();
                    if !text.is_empty() {
                        out.push(ApiMessage::text("user", &text));
                    }
                }
                Role::Assistant => {
                    let text = m.text();
                    let tool_calls: Vec<ApiToolCall> = m
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            MessagePart::ToolCall { id, name, arguments } => Some(ApiToolCall {
                                id: id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: name.clone(),
                                    arguments: encode_arguments(arguments),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    if text.is_empty() && tool_calls.is_empty() {
                        continue;
                    }
                    out.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
                Role::Tool => {
                    for part in &m.parts {
                        if let MessagePart::ToolResult { call_id, output, .. } = part {
                            out.push(ApiMessage {
                                role: "tool".into(),
                                content: Some(output.clone()),
                                tool_calls: None,
                                tool_call_id: Some(call_id.clone()),
                            });
                        }
                    }
                }
            }
        }
        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.system, &request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

/// Tool arguments travel as a JSON-encoded string on the wire. Arguments the
/// model sent as unparseable text are kept verbatim.
fn encode_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Decode the model's argument string. Unparseable text is kept as a JSON
/// string so schema validation rejects it downstream.
fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn call_id_or_new(id: String) -> String {
    if id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        id
    }
}

#[async_trait]
impl tides_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward parsed chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for chunk in parser.feed(&bytes, &provider_name) {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                    if done {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(parser.finish(None))).await;
        });

        Ok(rx)
    }
}

/// Incremental parser for the chat-completions SSE format.
///
/// Text deltas are emitted as they arrive; tool-call deltas are accumulated
/// per index and emitted, in index order, on the final `done` chunk.
///
/// Input is buffered as bytes and only complete lines are decoded, so a
/// multibyte character split across network reads survives intact.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseParser {
    /// Feed raw bytes; returns the chunks completed by them.
    fn feed(&mut self, bytes: &[u8], provider_name: &str) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if self.finished {
            return chunks;
        }
        self.buffer.extend_from_slice(bytes);

        // '\n' never occurs inside a UTF-8 multibyte sequence
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let decoded = String::from_utf8_lossy(&raw[..line_end]);
            let line = decoded.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                chunks.push(self.finish(None));
                return chunks;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    if let Some(choice) = stream_resp.choices.into_iter().next() {
                        if let Some(tc_deltas) = choice.delta.tool_calls {
                            for tc_delta in tc_deltas {
                                self.accumulate(tc_delta);
                            }
                        }

                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            chunks.push(StreamChunk {
                                content: Some(content),
                                ..StreamChunk::default()
                            });
                        }
                    }

                    // Usage arrives on the last chunk when stream_options asks for it
                    if let Some(usage) = stream_resp.usage {
                        chunks.push(self.finish(Some(usage.into_usage())));
                        return chunks;
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %provider_name,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
        chunks
    }

    fn accumulate(&mut self, delta: StreamToolCallDelta) {
        let acc = self.tool_calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            acc.id = id;
        }
        if let Some(func) = delta.function {
            if let Some(name) = func.name {
                acc.name = name;
            }
            if let Some(args) = func.arguments {
                acc.arguments.push_str(&args);
            }
        }
    }

    /// The terminal chunk carrying every assembled tool call.
    fn finish(&mut self, usage: Option<Usage>) -> StreamChunk {
        self.finished = true;
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        StreamChunk {
            content: None,
            tool_calls,
            done: true,
            usage,
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: call_id_or_new(self.id),
            name: self.name,
            arguments: decode_arguments(&self.arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tides_core::Provider;

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test");
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url().contains("api.openai.com"));
    }

    #[test]
    fn system_preamble_leads_the_conversation() {
        let messages = vec![Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages("You are Tides", &messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[0].content.as_deref(), Some("You are Tides"));
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn tool_turns_convert_to_api_messages() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "check_packages".into(),
            arguments: serde_json::json!({"unitNumber": "101"}),
        };
        let messages = vec![
            Message::user("Any packages?"),
            Message::assistant_with_calls("Checking that for you...", &[call]),
            Message::tool_result("call_1", "check_packages", "No pending packages found.", false),
        ];
        let api = OpenAiCompatProvider::to_api_messages("", &messages);
        assert_eq!(api.len(), 3);

        let tc = api[1].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "check_packages");
        assert_eq!(tc[0].function.arguments, r#"{"unitNumber":"101"}"#);
        assert_eq!(api[1].content.as_deref(), Some("Checking that for you..."));

        assert_eq!(api[2].role, "tool");
        assert_eq!(api[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn unsupported_only_turns_are_dropped() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"assistant","parts":[{"type":"step-start"}]}"#).unwrap();
        let api = OpenAiCompatProvider::to_api_messages("", &[msg]);
        assert!(api.is_empty());
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "log_pickup".into(),
            description: "Mark all packages for a unit as picked up.".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "log_pickup");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn request_body_includes_tools_and_stream_options() {
        let request = ProviderRequest {
            model: "gpt-4o".into(),
            system: "sys".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.7,
            max_tokens: Some(256),
            tools: vec![ToolDefinition {
                name: "check_packages".into(),
                description: "d".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            stream: true,
        };
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["tools"][0]["function"]["name"], "check_packages");
    }

    #[test]
    fn unparseable_arguments_are_kept_verbatim() {
        assert_eq!(decode_arguments(r#"{"unitNumber":"101"}"#)["unitNumber"], "101");
        assert_eq!(
            decode_arguments("{unitNumber: 101"),
            serde_json::Value::String("{unitNumber: 101".into())
        );
        assert_eq!(decode_arguments(""), serde_json::json!({}));
        assert_eq!(encode_arguments(&serde_json::Value::String("raw".into())), "raw");
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn sse_parser_emits_text_deltas_then_done() {
        let mut parser = SseParser::default();
        let chunks = parser.feed(
            "data: {\"choices\":[{\"delta\":{\"content\":\"You have \"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"two packages.\"}}]}\n\n\
             data: [DONE]\n\n"
                .as_bytes(),
            "test",
        );
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.as_deref(), Some("You have "));
        assert_eq!(chunks[1].content.as_deref(), Some("two packages."));
        assert!(chunks[2].done);
        assert!(chunks[2].tool_calls.is_empty());
    }

    #[test]
    fn sse_parser_handles_lines_split_across_reads() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"choices\":[{\"delta\":{\"con", "test").is_empty());
        let chunks = parser.feed(b"tent\":\"Hi\"}}]}\r\n", "test");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("Hi"));
    }

    #[test]
    fn sse_parser_keeps_multibyte_characters_split_across_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Sí, señor\"}}]}\n".as_bytes();
        // Cut between the two bytes of 'í' (0xC3 0xAD)
        let cut = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert_eq!(line[cut], 0xAD);

        let mut parser = SseParser::default();
        assert!(parser.feed(&line[..cut], "test").is_empty());
        let chunks = parser.feed(&line[cut..], "test");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("Sí, señor"));
    }

    #[test]
    fn sse_parser_assembles_tool_calls_in_index_order() {
        let mut parser = SseParser::default();
        let stream = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[",
            "{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"log_pickup\",\"arguments\":\"\"}},",
            "{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"check_packages\",\"arguments\":\"\"}}",
            "]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"unitNumber\\\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":\\\"101\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"function\":{\"arguments\":\"{\\\"unitNumber\\\":\\\"101\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n",
        );
        let chunks = parser.feed(stream.as_bytes(), "test");
        let done = chunks.last().unwrap();
        assert!(done.done);
        assert_eq!(done.usage.as_ref().unwrap().total_tokens, 5);
        assert_eq!(done.tool_calls.len(), 2);
        assert_eq!(done.tool_calls[0].id, "call_a");
        assert_eq!(done.tool_calls[0].name, "check_packages");
        assert_eq!(done.tool_calls[0].arguments["unitNumber"], "101");
        assert_eq!(done.tool_calls[1].name, "log_pickup");
    }

    #[test]
    fn sse_parser_ignores_comments_and_garbage() {
        let mut parser = SseParser::default();
        let chunks = parser.feed(b": keep-alive\ndata: not json\nevent: ping\n", "test");
        assert!(chunks.is_empty());
    }

    #[test]
    fn sse_parser_finish_without_done_marker() {
        let mut parser = SseParser::default();
        parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"name\":\"check_packages\",\"arguments\":\"{}\"}}]}}]}\n",
            "test",
        );
        let chunk = parser.finish(None);
        assert!(chunk.done);
        assert_eq!(chunk.tool_calls.len(), 1);
        // Missing ids are generated
        assert!(chunk.tool_calls[0].id.starts_with("call_"));
    }
}
