use super::registry::ProviderId;

/// Ordered model-name patterns; the first match wins.
const MODEL_PATTERNS: &[(&str, ProviderId)] = &[
    ("deepseek", ProviderId::DeepseekAi),
    ("qwen", ProviderId::Dashscope),
    ("hunyuan", ProviderId::TencentCloud),
    ("kimi", ProviderId::MoonshotAi),
    ("glm", ProviderId::ZhipuAi),
    ("minimax", ProviderId::Minimax),
];

/// Infer the provider serving `model` by case-insensitive substring match.
/// Unrecognized names map to [`ProviderId::Custom`].
pub fn infer_provider(model: &str) -> ProviderId {
    let lowered = model.to_lowercase();
    MODEL_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, provider)| *provider)
        .unwrap_or(ProviderId::Custom)
}
