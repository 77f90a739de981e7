pub mod client;
pub mod providers;
pub mod reasoning;
pub mod retry;
pub mod streaming;
pub mod structured;
pub mod transport;

use tracing::debug;

use openlike_core::config::ClientOptions;
use openlike_core::error::Result;

pub use client::{requires_streaming, BoundModel, ChatOpenAiLike, ChunkIter, TransportOverrides};
pub use providers::{get_client_profile, infer_provider, ClientProfile, ProviderId};
pub use structured::{
    OutputSchema, StructuredMethod, StructuredOutput, StructuredOutputOptions, StructuredResponse,
};

/// Create a chat client for `model`.
///
/// When `provider` is `None` it is inferred from the model name. Explicit
/// `enable_thinking` / `thinking_budget` take precedence over the same
/// fields in `options`.
pub fn get_instance(
    model: &str,
    provider: Option<ProviderId>,
    enable_thinking: Option<bool>,
    thinking_budget: Option<u32>,
    mut options: ClientOptions,
) -> Result<ChatOpenAiLike> {
    let provider = provider.unwrap_or_else(|| infer_provider(model));
    if enable_thinking.is_some() {
        options.enable_thinking = enable_thinking;
    }
    if thinking_budget.is_some() {
        options.thinking_budget = thinking_budget;
    }

    debug!(%provider, model, "Creating chat client instance");
    ChatOpenAiLike::new(get_client_profile(provider), model, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ClientOptions {
        ClientOptions::default()
            .with_api_key("sk-test")
            .with_api_base("http://localhost:1/v1")
    }

    #[test]
    fn test_get_instance_infers_provider() {
        let c = get_instance("kimi-k2-0711-preview", None, None, None, options()).unwrap();
        assert_eq!(c.provider(), ProviderId::MoonshotAi);
        assert_eq!(c.llm_type(), "chat-moonshot-model");
    }

    #[test]
    fn test_explicit_provider_wins() {
        let c = get_instance(
            "qwen3-32b",
            Some(ProviderId::Custom),
            Some(false),
            None,
            options(),
        )
        .unwrap();
        assert_eq!(c.provider(), ProviderId::Custom);
        assert_eq!(c.enable_thinking(), Some(false));
    }

    #[test]
    fn test_thinking_arguments_override_options() {
        let base = ClientOptions {
            enable_thinking: Some(false),
            thinking_budget: Some(10),
            ..options()
        };
        let c = get_instance("qwen-plus", None, Some(true), Some(2048), base).unwrap();
        assert_eq!(c.enable_thinking(), Some(true));
        assert_eq!(c.thinking_budget(), Some(2048));
        assert!(c.is_streaming());
    }
}
