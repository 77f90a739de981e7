use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key under which reasoning traces are exposed on messages.
pub const REASONING_CONTENT_KEY: &str = "reasoning_content";

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A chat message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }],
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool use blocks from this message.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    ContentFilter,
}

impl StopReason {
    /// Map an OpenAI `finish_reason` string.
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "tool_calls" | "function_call" => Self::ToolUse,
            "length" => Self::MaxTokens,
            "content_filter" => Self::ContentFilter,
            _ => Self::EndTurn,
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A complete tool call on an assistant message. `arguments` is the raw JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn parse_arguments(&self) -> serde_json::Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// A fragment of a tool call as it arrives in a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Assistant message produced by a single-shot completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Provider extras that have no dedicated field (e.g. `reasoning_content`).
    #[serde(default)]
    pub additional_kwargs: Map<String, Value>,
}

impl AssistantMessage {
    pub fn reasoning_content(&self) -> Option<&str> {
        self.additional_kwargs
            .get(REASONING_CONTENT_KEY)
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatGeneration {
    pub message: AssistantMessage,
    pub finish_reason: Option<StopReason>,
}

/// Parsed result of a chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResult {
    pub generations: Vec<ChatGeneration>,
    pub usage: Option<Usage>,
    pub model: Option<String>,
}

impl ChatResult {
    /// The first generation's message, if any.
    pub fn message(&self) -> Option<&AssistantMessage> {
        self.generations.first().map(|g| &g.message)
    }

    /// Fold a sequence of stream chunks into a single result.
    pub fn from_chunks(chunks: impl IntoIterator<Item = GenerationChunk>) -> Self {
        let mut merged = MessageChunk::default();
        let mut finish_reason = None;
        let mut usage = None;

        for chunk in chunks {
            merged.append(chunk.message);
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        Self {
            generations: vec![ChatGeneration {
                message: merged.into_message(),
                finish_reason,
            }],
            usage,
            model: None,
        }
    }
}

/// Incremental message content carried by one stream chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageChunk {
    pub content: String,
    #[serde(default)]
    pub tool_call_chunks: Vec<ToolCallChunk>,
    #[serde(default)]
    pub additional_kwargs: Map<String, Value>,
}

impl MessageChunk {
    pub fn reasoning_content(&self) -> Option<&str> {
        self.additional_kwargs
            .get(REASONING_CONTENT_KEY)
            .and_then(Value::as_str)
    }

    /// Merge `other` into `self`: text is concatenated, string extras are
    /// concatenated, tool-call fragments are merged by index.
    pub fn append(&mut self, other: MessageChunk) {
        self.content.push_str(&other.content);

        for (key, value) in other.additional_kwargs {
            match (self.additional_kwargs.get_mut(&key), value) {
                (Some(Value::String(existing)), Value::String(more)) => existing.push_str(&more),
                (_, value) => {
                    self.additional_kwargs.insert(key, value);
                }
            }
        }

        for fragment in other.tool_call_chunks {
            match self
                .tool_call_chunks
                .iter_mut()
                .find(|c| c.index == fragment.index)
            {
                Some(existing) => {
                    if existing.id.is_none() {
                        existing.id = fragment.id;
                    }
                    if let Some(name) = fragment.name {
                        existing.name.get_or_insert_with(String::new).push_str(&name);
                    }
                    if let Some(args) = fragment.arguments {
                        existing
                            .arguments
                            .get_or_insert_with(String::new)
                            .push_str(&args);
                    }
                }
                None => self.tool_call_chunks.push(fragment),
            }
        }
    }

    pub fn into_message(self) -> AssistantMessage {
        let mut fragments = self.tool_call_chunks;
        fragments.sort_by_key(|c| c.index);
        AssistantMessage {
            content: self.content,
            tool_calls: fragments
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id.unwrap_or_default(),
                    name: c.name.unwrap_or_default(),
                    arguments: c.arguments.unwrap_or_default(),
                })
                .collect(),
            additional_kwargs: self.additional_kwargs,
        }
    }
}

/// One normalized element of a streamed completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationChunk {
    pub message: MessageChunk,
    pub finish_reason: Option<StopReason>,
    pub usage: Option<Usage>,
}

/// Per-call request options layered on top of the client configuration.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// OpenAI tool objects (`{"type": "function", "function": {...}}`).
    pub tools: Vec<Value>,
    pub tool_choice: Option<Value>,
    pub parallel_tool_calls: Option<bool>,
    pub stop: Vec<String>,
    /// Trace metadata. Logged, never sent upstream.
    pub metadata: Map<String, Value>,
}
