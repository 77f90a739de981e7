//! OpenAI chat-completions wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use openlike_core::types::*;

// Request types
#[derive(Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<OaiMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ChatRequest {
    /// Serialize, then merge `extras` over the top-level keys in order.
    pub fn into_body<'a>(self, extras: impl IntoIterator<Item = &'a Map<String, Value>>) -> Value {
        let mut body = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for extra in extras {
            for (k, v) in extra {
                body.insert(k.clone(), v.clone());
            }
        }
        Value::Object(body)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Serialize)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<OaiFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

// Response types
#[derive(Deserialize, Debug)]
pub struct ChatCompletion {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    /// Error object some providers return with a 200 status.
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct CompletionChoice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message or delta. Fields without a dedicated slot land in `extra`.
#[derive(Deserialize, Debug, Default)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens),
        }
    }
}

impl ChatCompletion {
    /// Plain conversion; provider extras are not inspected.
    pub fn to_chat_result(&self) -> ChatResult {
        ChatResult {
            generations: self
                .choices
                .iter()
                .map(|choice| ChatGeneration {
                    message: AssistantMessage {
                        content: choice.message.content.clone().unwrap_or_default(),
                        tool_calls: choice.message.tool_calls(),
                        additional_kwargs: Map::new(),
                    },
                    finish_reason: choice
                        .finish_reason
                        .as_deref()
                        .map(StopReason::from_finish_reason),
                })
                .collect(),
            usage: self.usage.map(Usage::from),
            model: self.model.clone(),
        }
    }
}

impl StreamChunk {
    /// Plain conversion of the first choice. `None` when the chunk carries
    /// neither a choice nor usage.
    pub fn to_generation_chunk(&self) -> Option<GenerationChunk> {
        let usage = self.usage.map(Usage::from);
        let Some(choice) = self.choices.first() else {
            return usage.map(|usage| GenerationChunk {
                usage: Some(usage),
                ..Default::default()
            });
        };

        Some(GenerationChunk {
            message: MessageChunk {
                content: choice.delta.content.clone().unwrap_or_default(),
                tool_call_chunks: choice.delta.tool_call_chunks(),
                additional_kwargs: Map::new(),
            },
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(StopReason::from_finish_reason),
            usage,
        })
    }
}

impl ResponseMessage {
    pub(crate) fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .flatten()
            .filter_map(|tc| {
                let func = tc.function.as_ref()?;
                Some(ToolCall {
                    id: tc.id.clone().unwrap_or_default(),
                    name: func.name.clone().unwrap_or_default(),
                    arguments: func.arguments.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    pub(crate) fn tool_call_chunks(&self) -> Vec<ToolCallChunk> {
        self.tool_calls
            .iter()
            .flatten()
            .map(|tc| ToolCallChunk {
                index: tc.index,
                id: tc.id.clone(),
                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                arguments: tc.function.as_ref().and_then(|f| f.arguments.clone()),
            })
            .collect()
    }
}

/// Human-readable text for an upstream `error` payload, or `None` when
/// the field is absent or null.
pub fn error_message(error: Option<&Value>) -> Option<String> {
    match error? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

/// Convert tool definitions into OpenAI tool objects.
pub fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect()
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                oai_msgs.push(OaiMessage {
                    role: "system".to_string(),
                    content: Some(Value::String(msg.text())),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Role::User | Role::Tool => {
                let tool_results: Vec<_> = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .collect();

                if !tool_results.is_empty() {
                    for (id, content) in tool_results {
                        oai_msgs.push(OaiMessage {
                            role: "tool".to_string(),
                            content: Some(Value::String(content)),
                            tool_calls: None,
                            tool_call_id: Some(id),
                        });
                    }
                } else {
                    oai_msgs.push(OaiMessage {
                        role: "user".to_string(),
                        content: Some(Value::String(msg.text())),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
            }
            Role::Assistant => {
                let tool_uses = msg.tool_uses();
                let text = msg.text();
                let calls: Vec<OaiToolCall> = tool_uses
                    .iter()
                    .enumerate()
                    .map(|(i, (id, name, input))| OaiToolCall {
                        index: i,
                        id: Some(id.to_string()),
                        r#type: Some("function".to_string()),
                        function: Some(OaiFunction {
                            name: Some(name.to_string()),
                            arguments: Some(input.to_string()),
                        }),
                    })
                    .collect();

                oai_msgs.push(OaiMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() && !calls.is_empty() {
                        None
                    } else {
                        Some(Value::String(text))
                    },
                    tool_calls: if calls.is_empty() { None } else { Some(calls) },
                    tool_call_id: None,
                });
            }
        }
    }

    oai_msgs
}
