//! Structured output via tool calling.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::debug;

use openlike_core::error::{OpenlikeError, Result};
use openlike_core::types::*;

use crate::client::{BoundModel, ChatOpenAiLike};
use crate::providers::openai::convert_tools;

/// Models known to honor a forced `tool_choice`.
pub const TOOL_CHOICE_MODELS: &[&str] = &[
    "qwen-max",
    "qwen-max-latest",
    "qwen-plus",
    "qwen-plus-latest",
    "qwen-turbo",
    "qwen-turbo-latest",
    "qwen3-235b-a22b",
    "qwen3-32b",
    "qwen3-30b-a3b",
    "qwen3-14b",
    "qwen3-8b",
    "kimi-k2-0711-preview",
    "moonshot-v1-8k",
    "moonshot-v1-32k",
    "moonshot-v1-128k",
    "glm-4.5",
    "glm-4.5-air",
    "glm-4-plus",
    "hunyuan-turbos-latest",
    "hunyuan-functioncall",
];

pub fn supports_tool_choice(model: &str) -> bool {
    TOOL_CHOICE_MODELS.contains(&model)
}

/// Target shape for structured output.
#[derive(Debug, Clone)]
pub enum OutputSchema {
    /// A plain mapping: an OpenAI tool object, a `{name, parameters}`
    /// function object, or a JSON Schema carrying a `title`.
    Json(Value),
    /// Arguments are validated against `input_schema` before being returned.
    Validated(ToolDefinition),
}

impl OutputSchema {
    /// The OpenAI tool object for this schema.
    pub fn to_openai_tool(&self) -> Result<Value> {
        match self {
            Self::Validated(def) => Ok(convert_tools(std::slice::from_ref(def)).remove(0)),
            Self::Json(value) => json_schema_to_tool(value),
        }
    }

    fn as_json(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Validated(def) => serde_json::to_value(def).unwrap_or(Value::Null),
        }
    }
}

fn json_schema_to_tool(value: &Value) -> Result<Value> {
    let obj = value
        .as_object()
        .ok_or_else(|| OpenlikeError::InvalidArgument("schema must be a JSON object".into()))?;

    if obj.get("type").and_then(Value::as_str) == Some("function")
        && obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .is_some()
    {
        return Ok(value.clone());
    }

    if obj.get("name").and_then(Value::as_str).is_some()
        && (obj.contains_key("parameters") || obj.contains_key("description"))
    {
        return Ok(json!({"type": "function", "function": value}));
    }

    if let Some(title) = obj.get("title").and_then(Value::as_str) {
        let mut parameters = obj.clone();
        parameters.remove("title");
        let description = parameters
            .remove("description")
            .unwrap_or_else(|| Value::String(String::new()));
        return Ok(json!({
            "type": "function",
            "function": {
                "name": title,
                "description": description,
                "parameters": parameters,
            }
        }));
    }

    Err(OpenlikeError::InvalidArgument(
        "schema must be an OpenAI tool, a function with a 'name', \
         or a JSON Schema with a 'title'"
            .into(),
    ))
}

fn tool_name(tool: &Value) -> Result<String> {
    tool.pointer("/function/name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OpenlikeError::InvalidArgument("tool has no function name".into()))
}

/// Requested structured-output strategy. Only function calling is
/// implemented; the others are coerced to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StructuredMethod {
    #[default]
    FunctionCalling,
    JsonMode,
    JsonSchema,
}

impl StructuredMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FunctionCalling => "function_calling",
            Self::JsonMode => "json_mode",
            Self::JsonSchema => "json_schema",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructuredOutputOptions {
    pub method: StructuredMethod,
    /// Return the raw message alongside the parsed value.
    pub include_raw: bool,
    pub strict: Option<bool>,
    /// Anything else the caller passed. Must be empty.
    pub extra: Map<String, Value>,
}

/// Extracts the first matching tool call from a message.
#[derive(Clone)]
pub enum ToolOutputParser {
    /// Arguments of the first call to `key_name`, as plain JSON.
    KeyName { key_name: String },
    /// Arguments of the first call to `name`, validated against a schema.
    Validated {
        name: String,
        validator: Arc<jsonschema::Validator>,
    },
}

impl fmt::Debug for ToolOutputParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyName { key_name } => f
                .debug_struct("KeyName")
                .field("key_name", key_name)
                .finish(),
            Self::Validated { name, .. } => {
                f.debug_struct("Validated").field("name", name).finish()
            }
        }
    }
}

impl ToolOutputParser {
    fn name(&self) -> &str {
        match self {
            Self::KeyName { key_name } => key_name,
            Self::Validated { name, .. } => name,
        }
    }

    /// `Ok(None)` when the message has no call to the tool.
    pub fn parse(&self, message: &AssistantMessage) -> Result<Option<Value>> {
        let Some(call) = message.tool_calls.iter().find(|c| c.name == self.name()) else {
            return Ok(None);
        };

        let args = call.parse_arguments().map_err(|e| {
            OpenlikeError::StructuredParse(format!("invalid arguments for {}: {e}", call.name))
        })?;

        if let Self::Validated { validator, .. } = self {
            let errors: Vec<String> = validator
                .iter_errors(&args)
                .map(|err| format!("{} at {}", err, err.instance_path))
                .collect();
            if !errors.is_empty() {
                return Err(OpenlikeError::StructuredParse(errors.join("; ")));
            }
        }

        Ok(Some(args))
    }
}

/// Output of a structured call.
#[derive(Debug, Clone, Default)]
pub struct StructuredResponse {
    /// Populated only when raw output was requested.
    pub raw: Option<AssistantMessage>,
    pub parsed: Option<Value>,
    pub parsing_error: Option<String>,
}

impl StructuredResponse {
    /// Merge a parse outcome with the raw message without failing.
    fn with_raw(raw: AssistantMessage, outcome: Result<Option<Value>>) -> Self {
        match outcome {
            Ok(parsed) => Self {
                raw: Some(raw),
                parsed,
                parsing_error: None,
            },
            Err(e) => Self {
                raw: Some(raw),
                parsed: None,
                parsing_error: Some(e.to_string()),
            },
        }
    }

    pub fn parsed_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.parsed
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| OpenlikeError::StructuredParse(e.to_string()))
    }
}

/// A tool-bound client paired with a parser.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub bound: BoundModel,
    pub parser: ToolOutputParser,
    pub include_raw: bool,
}

impl StructuredOutput {
    pub async fn invoke(&self, messages: Vec<ChatMessage>) -> Result<StructuredResponse> {
        let result = self.bound.generate(messages).await?;
        self.finish(result)
    }

    pub fn invoke_blocking(&self, messages: Vec<ChatMessage>) -> Result<StructuredResponse> {
        let result = self.bound.generate_blocking(messages)?;
        self.finish(result)
    }

    fn finish(&self, result: ChatResult) -> Result<StructuredResponse> {
        let raw = result
            .generations
            .into_iter()
            .next()
            .map(|g| g.message)
            .unwrap_or_default();
        let outcome = self.parser.parse(&raw);

        if self.include_raw {
            return Ok(StructuredResponse::with_raw(raw, outcome));
        }
        Ok(StructuredResponse {
            raw: None,
            parsed: outcome?,
            parsing_error: None,
        })
    }
}

impl ChatOpenAiLike {
    /// Bind `schema` as the only tool and pair it with a parser.
    ///
    /// Models in [`TOOL_CHOICE_MODELS`] are forced to call the tool; for
    /// qwen models this also turns thinking off on this client, since the
    /// two cannot be combined.
    pub fn with_structured_output(
        &mut self,
        schema: Option<OutputSchema>,
        options: StructuredOutputOptions,
    ) -> Result<StructuredOutput> {
        if !options.extra.is_empty() {
            return Err(OpenlikeError::InvalidArgument(format!(
                "Received unsupported arguments {}",
                Value::Object(options.extra)
            )));
        }

        if options.method != StructuredMethod::FunctionCalling {
            debug!(
                requested = options.method.as_str(),
                "Using function_calling for structured output"
            );
        }
        let method = StructuredMethod::FunctionCalling;

        let schema = schema.ok_or_else(|| {
            OpenlikeError::InvalidArgument(
                "schema must be specified when method is not 'json_mode'. Received None.".into(),
            )
        })?;

        let mut tool = schema.to_openai_tool()?;
        let name = tool_name(&tool)?;
        if let (Some(strict), Some(function)) = (options.strict, tool.get_mut("function")) {
            function["strict"] = Value::Bool(strict);
        }

        let force_tool = supports_tool_choice(self.model());
        if force_tool && self.model().contains("qwen") {
            self.set_enable_thinking(Some(false));
        }

        let mut metadata = Map::new();
        metadata.insert(
            "ls_structured_output_format".to_string(),
            json!({
                "kwargs": {"method": method.as_str(), "strict": options.strict},
                "schema": schema.as_json(),
            }),
        );

        let call = CallOptions {
            parallel_tool_calls: Some(false),
            tool_choice: force_tool
                .then(|| json!({"type": "function", "function": {"name": name}})),
            metadata,
            ..Default::default()
        };

        debug!(
            model = self.model(),
            tool = %name,
            forced = force_tool,
            "Binding structured output tool"
        );

        let parser = match &schema {
            OutputSchema::Json(_) => ToolOutputParser::KeyName { key_name: name },
            OutputSchema::Validated(def) => {
                let validator = jsonschema::validator_for(&def.input_schema).map_err(|e| {
                    OpenlikeError::InvalidArgument(format!("Invalid JSON Schema: {}", e))
                })?;
                ToolOutputParser::Validated {
                    name,
                    validator: Arc::new(validator),
                }
            }
        };

        Ok(StructuredOutput {
            bound: self.bind_tools(vec![tool], call),
            parser,
            include_raw: options.include_raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{get_client_profile, ProviderId};
    use openlike_core::config::ClientOptions;

    fn client(provider: ProviderId, model: &str) -> ChatOpenAiLike {
        ChatOpenAiLike::new(
            get_client_profile(provider),
            model,
            ClientOptions::default()
                .with_api_key("sk-test")
                .with_api_base("http://localhost:1/v1"),
        )
        .unwrap()
    }

    fn weather_schema() -> Value {
        json!({
            "title": "get_weather",
            "description": "Look up the weather",
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        })
    }

    fn weather_message(args: &str) -> AssistantMessage {
        AssistantMessage {
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                arguments: args.into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_unlisted_model_binds_without_forcing() {
        let mut c = client(ProviderId::DeepseekAi, "deepseek-chat");
        let out = c
            .with_structured_output(Some(OutputSchema::Json(weather_schema())), Default::default())
            .unwrap();

        assert!(out.bound.call.tool_choice.is_none());
        assert_eq!(out.bound.call.parallel_tool_calls, Some(false));
        assert_eq!(out.bound.call.tools.len(), 1);
        assert_eq!(out.bound.call.tools[0]["function"]["name"], "get_weather");
        assert!(out.bound.call.metadata.contains_key("ls_structured_output_format"));
    }

    #[test]
    fn test_listed_qwen_model_forces_tool_and_disables_thinking() {
        let mut c = client(ProviderId::Dashscope, "qwen-plus");
        c.set_enable_thinking(Some(true));
        let out = c
            .with_structured_output(Some(OutputSchema::Json(weather_schema())), Default::default())
            .unwrap();

        assert_eq!(
            out.bound.call.tool_choice,
            Some(json!({"type": "function", "function": {"name": "get_weather"}}))
        );
        assert_eq!(c.enable_thinking(), Some(false));
        assert_eq!(out.bound.model.enable_thinking(), Some(false));
    }

    #[test]
    fn test_listed_non_qwen_model_keeps_thinking() {
        let mut c = client(ProviderId::ZhipuAi, "glm-4.5");
        c.set_enable_thinking(Some(true));
        let out = c
            .with_structured_output(Some(OutputSchema::Json(weather_schema())), Default::default())
            .unwrap();
        assert!(out.bound.call.tool_choice.is_some());
        assert_eq!(c.enable_thinking(), Some(true));
    }

    #[test]
    fn test_rejects_extra_arguments_and_missing_schema() {
        let mut c = client(ProviderId::DeepseekAi, "deepseek-chat");
        let mut extra = Map::new();
        extra.insert("foo".into(), json!(1));
        let err = c
            .with_structured_output(
                Some(OutputSchema::Json(weather_schema())),
                StructuredOutputOptions {
                    extra,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(&err, OpenlikeError::InvalidArgument(m) if m.contains("foo")));

        let err = c.with_structured_output(None, Default::default()).unwrap_err();
        assert!(matches!(err, OpenlikeError::InvalidArgument(_)));
    }

    #[test]
    fn test_other_methods_coerced_to_function_calling() {
        let mut c = client(ProviderId::DeepseekAi, "deepseek-chat");
        let out = c
            .with_structured_output(
                Some(OutputSchema::Json(weather_schema())),
                StructuredOutputOptions {
                    method: StructuredMethod::JsonSchema,
                    strict: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        let trace = &out.bound.call.metadata["ls_structured_output_format"];
        assert_eq!(trace["kwargs"]["method"], "function_calling");
        assert_eq!(out.bound.call.tools[0]["function"]["strict"], true);
    }

    #[test]
    fn test_schema_shapes() {
        let tool = json!({"type": "function", "function": {"name": "a", "parameters": {}}});
        assert_eq!(OutputSchema::Json(tool.clone()).to_openai_tool().unwrap(), tool);

        let function = json!({"name": "b", "parameters": {"type": "object"}});
        let wrapped = OutputSchema::Json(function).to_openai_tool().unwrap();
        assert_eq!(wrapped["function"]["name"], "b");

        let titled = OutputSchema::Json(weather_schema()).to_openai_tool().unwrap();
        assert_eq!(titled["function"]["description"], "Look up the weather");
        assert!(titled["function"]["parameters"].get("title").is_none());

        assert!(OutputSchema::Json(json!({"type": "object"})).to_openai_tool().is_err());
    }

    #[test]
    fn test_key_name_parser_takes_first_matching_call() {
        let parser = ToolOutputParser::KeyName {
            key_name: "get_weather".into(),
        };
        let parsed = parser.parse(&weather_message("{\"city\":\"Paris\"}")).unwrap();
        assert_eq!(parsed, Some(json!({"city": "Paris"})));
        assert_eq!(parser.parse(&AssistantMessage::default()).unwrap(), None);
    }

    #[test]
    fn test_validated_parser_rejects_bad_arguments() {
        let def = ToolDefinition {
            name: "get_weather".into(),
            description: "Look up the weather".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        };
        let mut c = client(ProviderId::DeepseekAi, "deepseek-chat");
        let out = c
            .with_structured_output(Some(OutputSchema::Validated(def)), Default::default())
            .unwrap();

        assert!(out.parser.parse(&weather_message("{\"city\":\"Paris\"}")).is_ok());
        let err = out.parser.parse(&weather_message("{\"town\":1}")).unwrap_err();
        assert!(matches!(err, OpenlikeError::StructuredParse(_)));
    }

    #[test]
    fn test_include_raw_captures_parse_failure() {
        let response = StructuredResponse::with_raw(
            weather_message("not json"),
            Err(OpenlikeError::StructuredParse("bad".into())),
        );
        assert!(response.raw.is_some());
        assert!(response.parsed.is_none());
        assert!(response.parsing_error.unwrap().contains("bad"));
    }
}
