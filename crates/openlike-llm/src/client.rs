use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, StreamExt};
use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, warn};

use openlike_core::config::{env_setting, resolve_setting, ClientOptions};
use openlike_core::error::{DecodeError, OpenlikeError, Result};
use openlike_core::traits::ChatModel;
use openlike_core::types::*;

use crate::providers::openai::{
    convert_messages, error_message, ChatCompletion, ChatRequest, StreamChunk, StreamOptions,
};
use crate::providers::{infer_provider, ClientProfile, ProviderId};
use crate::reasoning::extract_reasoning;
use crate::retry::RetryPolicy;
use crate::streaming::{SseEvent, SseReader, SseStream};
use crate::transport::{BlockingCompletions, Completions, Endpoint};

/// Blocking iterator over normalized stream chunks.
pub type ChunkIter<'a> = Box<dyn Iterator<Item = Result<GenerationChunk>> + Send + 'a>;

/// Caller-supplied HTTP clients. When absent the client builds its own.
#[derive(Debug, Clone, Default)]
pub struct TransportOverrides {
    pub http_client: Option<reqwest::Client>,
    pub blocking_http_client: Option<reqwest::blocking::Client>,
}

/// Whether `model` must run in streaming mode.
///
/// Only models inferred as DashScope are affected: qwen3 models stream
/// unless thinking is explicitly off, and any qwen model streams with
/// thinking turned on. A bare `qwq`/`qvq` name does not infer as DashScope,
/// so those prefixes only matter for names that also contain `qwen`.
pub fn requires_streaming(model: &str, enable_thinking: Option<bool>) -> bool {
    infer_provider(model) == ProviderId::Dashscope
        && ((model.starts_with("qwen3") && enable_thinking != Some(false))
            || model.starts_with("qwq")
            || model.starts_with("qvq")
            || enable_thinking == Some(true))
}

/// Force streaming on raw options when the thinking policy demands it.
pub fn apply_streaming_policy(model: &str, options: &mut ClientOptions) {
    if requires_streaming(model, options.enable_thinking) {
        if options.streaming != Some(true) {
            debug!(model, "Forcing streaming mode for thinking-capable model");
        }
        options.streaming = Some(true);
    }
}

/// OpenAI-compatible chat client configured by a provider profile.
#[derive(Debug, Clone)]
pub struct ChatOpenAiLike {
    profile: Arc<ClientProfile>,
    model: String,
    api_base: String,
    options: ClientOptions,
    streaming: bool,
    endpoint: Endpoint,
    completions: Completions,
    blocking_http: Option<reqwest::blocking::Client>,
    blocking: OnceLock<BlockingCompletions>,
}

impl ChatOpenAiLike {
    /// Build a client, resolving credential and base URL from `options`,
    /// then the profile's environment variables, then the profile defaults.
    pub fn new(
        profile: Arc<ClientProfile>,
        model: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self> {
        Self::with_transport(profile, model, options, TransportOverrides::default())
    }

    pub fn with_transport(
        profile: Arc<ClientProfile>,
        model: impl Into<String>,
        mut options: ClientOptions,
        transport: TransportOverrides,
    ) -> Result<Self> {
        let model = model.into();
        apply_streaming_policy(&model, &mut options);

        let api_base = resolve_setting(
            options.api_base.as_deref(),
            env_setting(profile.api_base_env),
            profile.default_base_url,
        )
        .ok_or_else(|| {
            OpenlikeError::Config(format!(
                "base URL must be set via constructor argument or the {} environment variable",
                profile.api_base_env
            ))
        })?;

        let api_key = resolve_setting(
            options.api_key.as_deref(),
            env_setting(profile.api_key_env),
            None,
        )
        .ok_or_else(|| {
            OpenlikeError::Config(format!(
                "api_key is not set; the {} environment variable is required",
                profile.secret_env_var()
            ))
        })?;

        let timeout = options.request_timeout_secs.map(Duration::from_secs);
        let endpoint = Endpoint::new(
            &api_base,
            SecretString::from(api_key),
            &options.default_headers,
            &options.default_query,
            timeout,
            RetryPolicy::new(options.max_retries),
        )?;

        let http = match transport.http_client {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build().map_err(|e| {
                    OpenlikeError::Config(format!("failed to build HTTP client: {e}"))
                })?
            }
        };

        // The resolved key lives in the endpoint only
        options.api_key = None;
        options.api_base = Some(api_base.clone());
        let streaming = options.streaming.unwrap_or(false);

        debug!(
            provider = %profile.provider,
            model = %model,
            base_url = %api_base,
            streaming,
            "Created chat client"
        );

        Ok(Self {
            completions: Completions::new(http, endpoint.clone()),
            profile,
            model,
            api_base,
            options,
            streaming,
            endpoint,
            blocking_http: transport.blocking_http_client,
            blocking: OnceLock::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> ProviderId {
        self.profile.provider
    }

    pub fn profile(&self) -> &Arc<ClientProfile> {
        &self.profile
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn enable_thinking(&self) -> Option<bool> {
        self.options.enable_thinking
    }

    pub fn set_enable_thinking(&mut self, enabled: Option<bool>) {
        self.options.enable_thinking = enabled;
    }

    pub fn thinking_budget(&self) -> Option<u32> {
        self.options.thinking_budget
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn llm_type(&self) -> String {
        self.profile.llm_type()
    }

    /// Full request body for one call.
    pub fn build_request_body(
        &self,
        messages: Vec<ChatMessage>,
        call: &CallOptions,
        stream: bool,
    ) -> Value {
        if !call.metadata.is_empty() {
            debug!(
                model = %self.model,
                metadata = %serde_json::Value::Object(call.metadata.clone()),
                "Call metadata"
            );
        }
        let request = ChatRequest {
            model: self.model.clone(),
            messages: convert_messages(messages),
            stream,
            // Usage accounting on the final streamed chunk
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            tools: call.tools.clone(),
            tool_choice: call.tool_choice.clone(),
            parallel_tool_calls: call.parallel_tool_calls,
            stop: call.stop.clone(),
        };
        let extra_body = self.options.effective_extra_body();
        request.into_body(std::iter::once(&self.options.model_kwargs).chain(extra_body.as_ref()))
    }

    fn decode_error(&self, doc: &str, err: &serde_json::Error) -> OpenlikeError {
        warn!(provider = self.profile.api_name, error = %err, "Invalid response from provider");
        DecodeError::from_json(self.profile.api_name, doc, err).into()
    }

    /// Parse a complete (non-streamed) response body.
    pub fn parse_completion(&self, text: &str) -> Result<ChatResult> {
        let completion: ChatCompletion =
            serde_json::from_str(text).map_err(|e| self.decode_error(text, &e))?;
        if let Some(message) = error_message(completion.error.as_ref()) {
            warn!(
                provider = self.profile.api_name,
                error = %message,
                "Provider returned an error body"
            );
            return Err(OpenlikeError::LlmRequest(format!(
                "{} API error: {}",
                self.profile.api_name, message
            )));
        }
        Ok(self.create_chat_result(&completion))
    }

    /// Base conversion plus reasoning extraction from the first choice.
    pub fn create_chat_result(&self, completion: &ChatCompletion) -> ChatResult {
        let mut result = completion.to_chat_result();
        if let (Some(choice), Some(generation)) =
            (completion.choices.first(), result.generations.first_mut())
        {
            extract_reasoning(&choice.message.extra, &mut generation.message.additional_kwargs);
        }
        result
    }

    /// Parse one SSE payload. `Ok(None)` for chunks that carry nothing.
    pub fn parse_chunk(&self, data: &str) -> Result<Option<GenerationChunk>> {
        let chunk: StreamChunk =
            serde_json::from_str(data).map_err(|e| self.decode_error(data, &e))?;
        if let Some(message) = error_message(chunk.error.as_ref()) {
            warn!(
                provider = self.profile.api_name,
                error = %message,
                "Provider sent an error event"
            );
            return Err(OpenlikeError::LlmStream(format!(
                "{} API error: {}",
                self.profile.api_name, message
            )));
        }
        Ok(self.convert_chunk(&chunk))
    }

    /// Base conversion plus reasoning extraction from the first delta.
    pub fn convert_chunk(&self, chunk: &StreamChunk) -> Option<GenerationChunk> {
        let mut generation = chunk.to_generation_chunk()?;
        if let Some(choice) = chunk.choices.first() {
            extract_reasoning(&choice.delta.extra, &mut generation.message.additional_kwargs);
        }
        Some(generation)
    }

    fn handle_event(&self, event: Result<SseEvent>) -> Option<Result<GenerationChunk>> {
        match event {
            Err(e) => Some(Err(e)),
            Ok(event) if event.is_done() => None,
            Ok(event) => self.parse_chunk(&event.data).transpose(),
        }
    }

    fn blocking_completions(&self) -> Result<&BlockingCompletions> {
        if let Some(handle) = self.blocking.get() {
            return Ok(handle);
        }
        let http = match &self.blocking_http {
            Some(client) => client.clone(),
            None => reqwest::blocking::Client::builder()
                .timeout(self.endpoint.timeout)
                .build()
                .map_err(|e| OpenlikeError::Config(format!("failed to build HTTP client: {e}")))?,
        };
        let handle = BlockingCompletions::new(http, self.endpoint.clone());
        Ok(self.blocking.get_or_init(|| handle))
    }

    /// Blocking streamed completion.
    pub fn stream_blocking(
        &self,
        messages: Vec<ChatMessage>,
        call: &CallOptions,
    ) -> Result<ChunkIter<'_>> {
        let body = self.build_request_body(messages, call, true);
        let response = self.blocking_completions()?.create(&body)?;
        Ok(Box::new(
            SseReader::new(response).filter_map(move |event| self.handle_event(event)),
        ))
    }

    /// Blocking single-shot completion. In streaming mode the chunks are
    /// aggregated into one result.
    pub fn generate_blocking(
        &self,
        messages: Vec<ChatMessage>,
        call: &CallOptions,
    ) -> Result<ChatResult> {
        if self.streaming {
            let chunks = self
                .stream_blocking(messages, call)?
                .collect::<Result<Vec<_>>>()?;
            return Ok(self.aggregate(chunks));
        }

        let body = self.build_request_body(messages, call, false);
        let response = self.blocking_completions()?.create(&body)?;
        let text = response
            .text()
            .map_err(|e| OpenlikeError::LlmRequest(e.to_string()))?;
        self.parse_completion(&text)
    }

    async fn stream_async(
        &self,
        messages: Vec<ChatMessage>,
        call: &CallOptions,
    ) -> Result<BoxStream<'_, Result<GenerationChunk>>> {
        let body = self.build_request_body(messages, call, true);
        let response = self.completions.create(&body).await?;
        let chunks = SseStream::new(response.bytes_stream())
            .filter_map(move |event| future::ready(self.handle_event(event)));
        Ok(Box::pin(chunks) as BoxStream<'_, Result<GenerationChunk>>)
    }

    async fn generate_async(
        &self,
        messages: Vec<ChatMessage>,
        call: &CallOptions,
    ) -> Result<ChatResult> {
        if self.streaming {
            let mut stream = self.stream_async(messages, call).await?;
            let mut chunks = Vec::new();
            while let Some(chunk) = stream.next().await {
                chunks.push(chunk?);
            }
            return Ok(self.aggregate(chunks));
        }

        let body = self.build_request_body(messages, call, false);
        let response = self.completions.create(&body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| OpenlikeError::LlmRequest(e.to_string()))?;
        self.parse_completion(&text)
    }

    fn aggregate(&self, chunks: Vec<GenerationChunk>) -> ChatResult {
        let mut result = ChatResult::from_chunks(chunks);
        result.model = Some(self.model.clone());
        result
    }

    /// Attach tools and call options to this client.
    pub fn bind_tools(&self, tools: Vec<Value>, call: CallOptions) -> BoundModel {
        BoundModel {
            model: self.clone(),
            call: CallOptions { tools, ..call },
        }
    }
}

impl ChatModel for ChatOpenAiLike {
    fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: &CallOptions,
    ) -> BoxFuture<'_, Result<ChatResult>> {
        let options = options.clone();
        Box::pin(async move { self.generate_async(messages, &options).await })
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &CallOptions,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>> {
        let options = options.clone();
        Box::pin(async move { self.stream_async(messages, &options).await })
    }
}

/// A client with tools and call options attached.
#[derive(Debug, Clone)]
pub struct BoundModel {
    pub model: ChatOpenAiLike,
    pub call: CallOptions,
}

impl BoundModel {
    pub async fn generate(&self, messages: Vec<ChatMessage>) -> Result<ChatResult> {
        self.model.generate_async(messages, &self.call).await
    }

    pub async fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'_, Result<GenerationChunk>>> {
        self.model.stream_async(messages, &self.call).await
    }

    pub fn generate_blocking(&self, messages: Vec<ChatMessage>) -> Result<ChatResult> {
        self.model.generate_blocking(messages, &self.call)
    }

    pub fn stream_blocking(&self, messages: Vec<ChatMessage>) -> Result<ChunkIter<'_>> {
        self.model.stream_blocking(messages, &self.call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::get_client_profile;
    use serde_json::json;

    fn client(provider: ProviderId, model: &str, options: ClientOptions) -> Result<ChatOpenAiLike> {
        ChatOpenAiLike::new(
            get_client_profile(provider),
            model,
            options.with_api_key("sk-test").with_api_base("http://localhost:1/v1"),
        )
    }

    #[test]
    fn test_qwen3_defaults_to_streaming() {
        assert!(requires_streaming("qwen3-32b", None));
        assert!(requires_streaming("qwen3-32b", Some(true)));
        assert!(!requires_streaming("qwen3-32b", Some(false)));
    }

    #[test]
    fn test_thinking_flag_forces_streaming() {
        assert!(requires_streaming("qwen-plus", Some(true)));
        assert!(!requires_streaming("qwen-plus", None));
        assert!(!requires_streaming("qwen-plus", Some(false)));
    }

    #[test]
    fn test_bare_qwq_names_are_not_dashscope() {
        // "qwq-plus" infers as custom, so the policy never applies
        assert!(!requires_streaming("qwq-plus", Some(false)));
        assert!(!requires_streaming("qvq-max", None));
    }

    #[test]
    fn test_policy_only_for_dashscope_models() {
        assert!(!requires_streaming("deepseek-reasoner", Some(true)));
        assert!(!requires_streaming("glm-4.5", Some(true)));
    }

    #[test]
    fn test_policy_applied_at_construction() {
        let c = client(ProviderId::Dashscope, "qwen3-32b", ClientOptions::default()).unwrap();
        assert!(c.is_streaming());

        let off = ClientOptions {
            enable_thinking: Some(false),
            ..Default::default()
        };
        let c = client(ProviderId::Dashscope, "qwen3-32b", off).unwrap();
        assert!(!c.is_streaming());

        // Explicit streaming=false does not override the policy
        let forced = ClientOptions {
            enable_thinking: Some(true),
            ..ClientOptions::default().with_streaming(false)
        };
        let c = client(ProviderId::Dashscope, "qwen-plus", forced).unwrap();
        assert!(c.is_streaming());

        let c = client(
            ProviderId::Dashscope,
            "qwq-plus",
            ClientOptions::default().with_streaming(false),
        )
        .unwrap();
        assert!(!c.is_streaming());
    }

    #[test]
    fn test_custom_requires_base_url() {
        let err = ChatOpenAiLike::new(
            get_client_profile(ProviderId::Custom),
            "my-model",
            ClientOptions::default().with_api_key("sk-test"),
        )
        .unwrap_err();
        assert!(matches!(&err, OpenlikeError::Config(m) if m.contains("base URL")));
    }

    #[test]
    fn test_missing_key_names_env_var() {
        let err = ChatOpenAiLike::new(
            get_client_profile(ProviderId::Custom),
            "my-model",
            ClientOptions::default().with_api_base("http://localhost:1/v1"),
        )
        .unwrap_err();
        assert!(matches!(&err, OpenlikeError::Config(m) if m.contains("CUSTOM_API_KEY")));
    }

    #[test]
    fn test_request_body_shape() {
        let options = ClientOptions {
            enable_thinking: Some(true),
            thinking_budget: Some(1024),
            temperature: Some(0.2),
            ..Default::default()
        };
        let c = client(ProviderId::Dashscope, "qwen-plus", options).unwrap();
        let call = CallOptions::default();
        let body = c.build_request_body(vec![ChatMessage::user("hi")], &call, true);

        assert_eq!(body["model"], "qwen-plus");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"], json!({"include_usage": true}));
        assert_eq!(body["enable_thinking"], true);
        assert_eq!(body["thinking_budget"], 1024);
        assert_eq!(body["messages"][0]["role"], "user");

        let body = c.build_request_body(vec![ChatMessage::user("hi")], &call, false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_call_metadata_not_sent() {
        let c = client(ProviderId::DeepseekAi, "deepseek-chat", ClientOptions::default()).unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert("ls_structured_output_format".into(), json!({"schema": {}}));
        let call = CallOptions {
            metadata,
            ..Default::default()
        };
        let body = c.build_request_body(vec![ChatMessage::user("hi")], &call, false);
        assert!(body.get("ls_structured_output_format").is_none());
        assert!(body.get("metadata").is_none());
    }

    #[test]
    fn test_create_chat_result_copies_reasoning() {
        let c = client(ProviderId::DeepseekAi, "deepseek-reasoner", ClientOptions::default())
            .unwrap();
        let result = c
            .parse_completion(
                &json!({
                    "model": "deepseek-reasoner",
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": "4",
                            "reasoning_content": "2 + 2 = 4"
                        },
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
                })
                .to_string(),
            )
            .unwrap();

        let message = result.message().unwrap();
        assert_eq!(message.content, "4");
        assert_eq!(message.reasoning_content(), Some("2 + 2 = 4"));
        assert_eq!(result.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_create_chat_result_proxy_reasoning() {
        let c = client(ProviderId::Custom, "openrouter/some-model", ClientOptions::default())
            .unwrap();
        let result = c
            .parse_completion(
                &json!({
                    "choices": [{
                        "message": {"role": "assistant", "content": "ok", "reasoning": "via proxy"},
                        "finish_reason": "stop"
                    }]
                })
                .to_string(),
            )
            .unwrap();
        assert_eq!(result.message().unwrap().reasoning_content(), Some("via proxy"));
    }

    #[test]
    fn test_convert_chunk_reasoning_delta() {
        let c = client(ProviderId::DeepseekAi, "deepseek-reasoner", ClientOptions::default())
            .unwrap();
        let chunk = c
            .parse_chunk(r#"{"choices":[{"index":0,"delta":{"reasoning_content":"hmm"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.message.reasoning_content(), Some("hmm"));
        assert_eq!(chunk.message.content, "");

        let chunk = c
            .parse_chunk(r#"{"choices":[{"index":0,"delta":{"reasoning":"proxied"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.message.reasoning_content(), Some("proxied"));
    }

    #[test]
    fn test_parse_chunk_decode_error_names_provider() {
        let c = client(ProviderId::MoonshotAi, "kimi-k2-0711-preview", ClientOptions::default())
            .unwrap();
        let err = c.parse_chunk("{not json").unwrap_err();
        match err {
            OpenlikeError::Decode(d) => {
                assert_eq!(d.provider, "moonshot");
                assert_eq!(d.doc, "{not json");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_body_is_request_error() {
        let c = client(ProviderId::DeepseekAi, "deepseek-chat", ClientOptions::default()).unwrap();
        let err = c
            .parse_completion(r#"{"error":{"message":"quota exceeded","code":"402"}}"#)
            .unwrap_err();
        assert!(matches!(&err, OpenlikeError::LlmRequest(m) if m.contains("quota exceeded")));

        // A null error field is not a failure
        let ok = c.parse_completion(
            r#"{"error":null,"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#,
        );
        assert_eq!(ok.unwrap().message().unwrap().content, "hi");
    }

    #[test]
    fn test_error_event_is_stream_error() {
        let c = client(ProviderId::ZhipuAi, "glm-4.5", ClientOptions::default()).unwrap();
        let err = c.parse_chunk(r#"{"error":"upstream overloaded"}"#).unwrap_err();
        assert!(matches!(&err, OpenlikeError::LlmStream(m) if m.contains("upstream overloaded")));
    }
}
