use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use openlike_core::error::{OpenlikeError, Result};

/// A known OpenAI-compatible provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "deepseek-ai")]
    DeepseekAi,
    #[serde(rename = "dashscope")]
    Dashscope,
    #[serde(rename = "tencent-cloud")]
    TencentCloud,
    #[serde(rename = "moonshot-ai")]
    MoonshotAi,
    #[serde(rename = "zhipu-ai")]
    ZhipuAi,
    #[serde(rename = "minimax")]
    Minimax,
    #[serde(rename = "custom")]
    Custom,
}

impl ProviderId {
    pub const ALL: [ProviderId; 7] = [
        Self::DeepseekAi,
        Self::Dashscope,
        Self::TencentCloud,
        Self::MoonshotAi,
        Self::ZhipuAi,
        Self::Minimax,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepseekAi => "deepseek-ai",
            Self::Dashscope => "dashscope",
            Self::TencentCloud => "tencent-cloud",
            Self::MoonshotAi => "moonshot-ai",
            Self::ZhipuAi => "zhipu-ai",
            Self::Minimax => "minimax",
            Self::Custom => "custom",
        }
    }

    pub fn descriptor(&self) -> &'static ProviderDescriptor {
        get_descriptor(*self)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = OpenlikeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| OpenlikeError::UnsupportedProvider(s.to_string()))
    }
}

/// Static description of a provider endpoint.
#[derive(Debug, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    /// Name used in decode error messages and `llm_type`.
    pub api_name: &'static str,
    pub api_key_env: &'static str,
    pub api_base_env: &'static str,
    /// `None` means the base URL must be supplied externally.
    pub default_base_url: Option<&'static str>,
    pub model_name: &'static str,
}

static DESCRIPTORS: [ProviderDescriptor; 7] = [
    ProviderDescriptor {
        id: ProviderId::DeepseekAi,
        api_name: "deepseek",
        api_key_env: "DEEPSEEK_API_KEY",
        api_base_env: "DEEPSEEK_API_BASE",
        default_base_url: Some("https://api.deepseek.com/v1"),
        model_name: "ChatDeepseekModel",
    },
    ProviderDescriptor {
        id: ProviderId::Dashscope,
        api_name: "dashscope",
        api_key_env: "DASHSCOPE_API_KEY",
        api_base_env: "DASHSCOPE_API_BASE",
        default_base_url: Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        model_name: "ChatDashscopeModel",
    },
    ProviderDescriptor {
        id: ProviderId::TencentCloud,
        api_name: "tencent",
        api_key_env: "TENCENT_API_KEY",
        api_base_env: "TENCENT_API_BASE",
        default_base_url: Some("https://api.hunyuan.cloud.tencent.com/v1"),
        model_name: "ChatTencentModel",
    },
    ProviderDescriptor {
        id: ProviderId::MoonshotAi,
        api_name: "moonshot",
        api_key_env: "MOONSHOT_API_KEY",
        api_base_env: "MOONSHOT_API_BASE",
        default_base_url: Some("https://api.moonshot.cn/v1"),
        model_name: "ChatMoonshotModel",
    },
    ProviderDescriptor {
        id: ProviderId::ZhipuAi,
        api_name: "zhipu",
        api_key_env: "ZHIPU_API_KEY",
        api_base_env: "ZHIPUAI_API_BASE",
        default_base_url: Some("https://open.bigmodel.cn/api/paas/v4/"),
        model_name: "ChatZhipuModel",
    },
    ProviderDescriptor {
        id: ProviderId::Minimax,
        api_name: "minimax",
        api_key_env: "MINIMAX_API_KEY",
        api_base_env: "MINIMAX_API_BASE",
        default_base_url: Some("https://api.minimaxi.com/v1"),
        model_name: "ChatMinimaxModel",
    },
    ProviderDescriptor {
        id: ProviderId::Custom,
        api_name: "CUSTOM",
        api_key_env: "CUSTOM_API_KEY",
        api_base_env: "CUSTOM_API_BASE",
        default_base_url: None,
        model_name: "ChatCustomOpenAILikeModel",
    },
];

/// Look up the descriptor for a provider.
pub fn get_descriptor(provider: ProviderId) -> &'static ProviderDescriptor {
    // DESCRIPTORS is ordered like ProviderId::ALL
    &DESCRIPTORS[provider as usize]
}

/// All known provider descriptors, in registry order.
pub fn all_descriptors() -> &'static [ProviderDescriptor] {
    &DESCRIPTORS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptor_order_matches_ids() {
        for id in ProviderId::ALL {
            assert_eq!(get_descriptor(id).id, id);
        }
    }

    #[test]
    fn test_identifiers_are_unique() {
        let names: HashSet<_> = all_descriptors().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(names.len(), all_descriptors().len());
    }

    #[test]
    fn test_custom_has_no_default_url() {
        assert!(ProviderId::Custom.descriptor().default_base_url.is_none());
        for d in all_descriptors().iter().filter(|d| d.id != ProviderId::Custom) {
            assert!(d.default_base_url.is_some(), "{} lacks a default URL", d.id);
        }
    }

    #[test]
    fn test_zhipu_env_names() {
        let d = ProviderId::ZhipuAi.descriptor();
        assert_eq!(d.api_key_env, "ZHIPU_API_KEY");
        assert_eq!(d.api_base_env, "ZHIPUAI_API_BASE");
    }

    #[test]
    fn test_parse_provider_tag() {
        assert_eq!("moonshot-ai".parse::<ProviderId>().unwrap(), ProviderId::MoonshotAi);
        assert_eq!("custom".parse::<ProviderId>().unwrap(), ProviderId::Custom);
        let err = "openai".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, OpenlikeError::UnsupportedProvider(p) if p == "openai"));
    }

    #[test]
    fn test_serde_uses_provider_tags() {
        let json = serde_json::to_string(&ProviderId::TencentCloud).unwrap();
        assert_eq!(json, "\"tencent-cloud\"");
        let back: ProviderId = serde_json::from_str("\"zhipu-ai\"").unwrap();
        assert_eq!(back, ProviderId::ZhipuAi);
    }
}
