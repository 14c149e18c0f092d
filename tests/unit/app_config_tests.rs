/*!
 * Tests for app configuration
 */

use std::str::FromStr;
use std::time::Duration;

use videoscribe::app_config::{normalize_openai_endpoint, Config, Device, ProviderKind, UnitCostKind};
use videoscribe::chunker::UnitCost;
use videoscribe::errors::ConfigError;

use crate::common;

#[test]
fn test_default_shouldCarryPipelineDefaults() {
    let config = Config::default();
    assert_eq!(config.provider, ProviderKind::OpenAI);
    assert_eq!(config.available_providers.len(), 3);
    assert_eq!(config.asr.model, "large-v2");
    assert!(config.asr.engine.is_system());
    assert!(config.asr.vad_filter);
    assert!(config.optimize.enabled);
    assert_eq!(config.optimize.concurrency, 4);
    assert_eq!(config.optimize.max_attempts, 5);
    assert_eq!(config.get_endpoint(), "https://api.openai.com/v1");
}

#[test]
fn test_load_withPartialFile_shouldFillDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "conf.json",
        r#"{"provider": "ollama", "optimize": {"concurrency": 2, "unit_cost": "tokens"}}"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();

    assert_eq!(config.provider, ProviderKind::Ollama);
    assert_eq!(config.optimize.concurrency, 2);
    assert_eq!(UnitCost::from(config.optimize.unit_cost), UnitCost::EstimatedTokens);
    assert_eq!(config.optimize.max_unit_budget, 1000);
    assert_eq!(config.get_model(), "llama3.2:3b");
    assert!(config.validate().is_ok());
}

#[test]
fn test_saveThenLoad_shouldKeepValues() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");
    let mut config = common::test_config(dir.path());
    config.asr.language = Some("de".to_string());
    config.optimize.unit_cost = UnitCostKind::Tokens;

    config.save(&path).unwrap();
    let loaded = Config::load(&path).unwrap();

    assert_eq!(loaded.asr.language.as_deref(), Some("de"));
    assert_eq!(loaded.optimize.unit_cost, UnitCostKind::Tokens);
    assert_eq!(loaded.get_api_key(), "test-key");
    assert_eq!(loaded.cache_dir, dir.path());
}

#[test]
fn test_load_withMissingFile_shouldReturnLoadError() {
    let result = Config::load("/definitely/not/here/conf.json");
    assert!(matches!(result, Err(ConfigError::Load { .. })));
}

#[test]
fn test_validate_withZeroConcurrency_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::test_config(dir.path());
    config.optimize.concurrency = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withUnknownLanguage_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::test_config(dir.path());
    config.asr.language = Some("xx".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withOptimizationDisabled_shouldNotNeedKey() {
    let mut config = Config::default();
    config.provider = ProviderKind::Anthropic;
    config.active_provider_config_mut().api_key.clear();
    config.optimize.enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_activeProviderConfigMut_withMissingEntry_shouldCreateIt() {
    let mut config = Config::default();
    config.available_providers.clear();
    config.provider = ProviderKind::Anthropic;
    config.active_provider_config_mut().timeout_secs = 5;

    assert_eq!(config.available_providers.len(), 1);
    assert_eq!(config.get_timeout(), Duration::from_secs(5));
    assert_eq!(config.get_model(), "claude-3-haiku-20240307");
}

#[test]
fn test_normalizeOpenaiEndpoint_shouldAppendVersionOnlyForBareHosts() {
    assert_eq!(normalize_openai_endpoint("http://localhost:8000/"), "http://localhost:8000/v1");
    assert_eq!(normalize_openai_endpoint("https://api.example.com/v2"), "https://api.example.com/v2");
    assert_eq!(normalize_openai_endpoint(""), "https://api.openai.com/v1");
}

#[test]
fn test_fromStr_shouldParseProvidersAndDevices() {
    assert_eq!(ProviderKind::from_str("Anthropic").unwrap(), ProviderKind::Anthropic);
    assert!(ProviderKind::from_str("gemini").is_err());
    assert_eq!(Device::from_str("gpu").unwrap(), Device::Cuda);
    assert_eq!(ProviderKind::Ollama.api_key_env_var(), None);
}

#[test]
fn test_modelResource_shouldOnlyApplyToNamedDownloadedModels() {
    let mut config = Config::default();
    assert!(config.asr.model_resource().is_none());

    config.asr.download_model = true;
    let spec = config.asr.model_resource().unwrap();
    assert_eq!(spec.name, "faster-whisper-large-v2");
    assert_eq!(spec.files.len(), 4);

    config.asr.model = "/models/faster-whisper-small".to_string();
    assert!(config.asr.model_resource().is_none());
}
