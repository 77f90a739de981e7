use std::io::Write;

use openlike_core::config::AppConfig;
use openlike_core::error::OpenlikeError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
model = "qwen-plus"
provider = "dashscope"
api_key = "sk-test-key"
api_base = "https://dashscope.example.com/v1"
enable_thinking = true
thinking_budget = 2048
temperature = 0.5
max_tokens = 4096
request_timeout_secs = 30
max_retries = 5

[model.default_headers]
X-Trace = "on"

[model.extra_body]
top_k = 20
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    let model = &config.model;

    assert_eq!(model.model, "qwen-plus");
    assert_eq!(model.provider.as_deref(), Some("dashscope"));
    assert_eq!(model.options.api_key.as_deref(), Some("sk-test-key"));
    assert_eq!(model.options.enable_thinking, Some(true));
    assert_eq!(model.options.thinking_budget, Some(2048));
    assert_eq!(model.options.temperature, Some(0.5));
    assert_eq!(model.options.max_tokens, Some(4096));
    assert_eq!(model.options.request_timeout_secs, Some(30));
    assert_eq!(model.options.max_retries, 5);
    assert_eq!(model.options.default_headers["X-Trace"], "on");

    let extra = model.options.effective_extra_body().unwrap();
    assert_eq!(extra["top_k"], 20);
    assert_eq!(extra["enable_thinking"], true);
    assert_eq!(extra["thinking_budget"], 2048);
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[model]\nmodel = \"deepseek-chat\"\n").unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.model.model, "deepseek-chat");
    assert!(config.model.provider.is_none());
    assert!(config.model.options.api_key.is_none());
    assert!(config.model.options.streaming.is_none());
    assert_eq!(config.model.options.max_retries, 2);
    assert!(config.model.options.effective_extra_body().is_none());
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("OPENLIKE_TEST_CONFIG_KEY", "sk-from-env");

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[model]\nmodel = \"glm-4.5\"\napi_key = \"${OPENLIKE_TEST_CONFIG_KEY}\"\n")
        .unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.model.options.api_key.as_deref(), Some("sk-from-env"));

    std::env::remove_var("OPENLIKE_TEST_CONFIG_KEY");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/openlike.toml")).unwrap_err();
    assert!(matches!(err, OpenlikeError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[model\nmodel = ").unwrap();

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, OpenlikeError::Config(_)));
}
