//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TOOLCHAT__*` 覆盖（双下划线表示嵌套，如 `TOOLCHAT__LLM__PROVIDER=mock`）。
//! 工具服务器的 command / args / env 支持 `${VAR}` 与 `${VAR:-default}` 展开。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Deserialize;

use crate::core::ChatError;
use crate::llm::RetryConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You have access to tools. When you choose to call a tool, do not narrate status updates. After tools run, return only a concise final answer.";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    /// [servers.<name>]：MCP 工具服务器
    pub servers: HashMap<String, ServerConfig>,
}

/// [app] 段：标题与系统提示词
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            title: default_title(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_title() -> String {
    "MCP Tool Chat".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// [llm] 段：后端选择、模型、凭据所在环境变量、采样温度、重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / gemini / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 保存 API Key 的环境变量名；未设置时按 provider 取默认值
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            temperature: default_temperature(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

impl LlmSection {
    /// 规范化后的 provider（去空白、小写），校验与构建都以它为准
    pub fn provider_name(&self) -> String {
        self.provider.trim().to_lowercase()
    }

    pub fn api_key_env(&self) -> String {
        match &self.api_key_env {
            Some(name) if !name.is_empty() => name.clone(),
            _ if self.provider_name() == "openai" => "OPENAI_API_KEY".to_string(),
            _ => crate::llm::GEMINI_API_KEY_ENV.to_string(),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env())
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn is_mock(&self) -> bool {
        self.provider_name() == "mock"
    }
}

/// [tools] 段：单次调用超时与并发上限
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    4
}

/// [servers.<name>] 段：stdio 工具服务器的启动参数
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    fn expanded(&self) -> Self {
        Self {
            command: expand_env_vars(&self.command),
            args: self.args.iter().map(|a| expand_env_vars(a)).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand_env_vars(v)))
                .collect(),
            enabled: self.enabled,
        }
    }
}

static ENV_VAR_RE: OnceLock<Regex> = OnceLock::new();

/// 展开 `${VAR}` / `${VAR:-default}`；变量未设置且无默认值时替换为空串
pub fn expand_env_vars(value: &str) -> String {
    let re = ENV_VAR_RE.get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap());
    re.replace_all(value, |caps: &Captures| {
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

impl AppConfig {
    /// 启用的服务器（已展开环境变量），按名称排序
    pub fn enabled_servers(&self) -> Vec<(String, ServerConfig)> {
        let mut servers: Vec<(String, ServerConfig)> = self
            .servers
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(name, s)| (name.clone(), s.expanded()))
            .collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));
        servers
    }
}

/// 启动前置条件校验：凭据存在、至少一个启用的服务器（mock 后端两者都不要求）
pub fn validate_config(config: &AppConfig) -> Result<(), ChatError> {
    if config.llm.is_mock() {
        tracing::info!("Configuration validation passed (mock provider)");
        return Ok(());
    }
    match config.llm.provider_name().as_str() {
        "openai" | "gemini" => {}
        other => {
            return Err(ChatError::Configuration(format!(
                "unknown llm.provider '{}' (expected openai, gemini or mock)",
                other
            )))
        }
    }
    let key_env = config.llm.api_key_env();
    if config.llm.api_key().is_none() {
        return Err(ChatError::Configuration(format!(
            "Environment variable {} not set",
            key_env
        )));
    }
    if config.enabled_servers().is_empty() {
        return Err(ChatError::Configuration("No servers configured".to_string()));
    }
    tracing::info!("Configuration validation passed");
    Ok(())
}

/// 从 config 目录加载配置，环境变量 TOOLCHAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键；文件不存在视为配置错误）
/// 3. 最后叠加环境变量 TOOLCHAT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ChatError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if !path.exists() {
            return Err(ChatError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path.clone()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TOOLCHAT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    tracing::info!(provider = %cfg.llm.provider, servers = cfg.servers.len(), "Configuration loaded");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TOOLCHAT_TEST_HOME", "/opt/tools");
        std::env::remove_var("TOOLCHAT_TEST_MISSING");
        assert_eq!(expand_env_vars("${TOOLCHAT_TEST_HOME}/math.py"), "/opt/tools/math.py");
        assert_eq!(expand_env_vars("${TOOLCHAT_TEST_MISSING:-python3}"), "python3");
        assert_eq!(expand_env_vars("${TOOLCHAT_TEST_MISSING}"), "");
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "mock"

[tools]
call_timeout_secs = 5

[servers.math]
command = "python3"
args = ["math_server.py"]

[servers.weather]
command = "node"
enabled = false
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.tools.call_timeout_secs, 5);
        assert_eq!(cfg.tools.max_concurrent, 4);
        let enabled = cfg.enabled_servers();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, "math");
        assert_eq!(enabled[0].1.args, vec!["math_server.py"]);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = load_config(Some(PathBuf::from("/nonexistent/toolchat.toml"))).unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn test_validate_requires_key_and_servers() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "gemini".to_string();
        cfg.llm.api_key_env = Some("TOOLCHAT_TEST_NO_SUCH_KEY".to_string());
        std::env::remove_var("TOOLCHAT_TEST_NO_SUCH_KEY");
        match validate_config(&cfg) {
            Err(ChatError::Configuration(msg)) => assert!(msg.contains("TOOLCHAT_TEST_NO_SUCH_KEY")),
            _ => panic!("Expected Configuration error"),
        }

        std::env::set_var("TOOLCHAT_TEST_KEY_SET", "secret");
        cfg.llm.api_key_env = Some("TOOLCHAT_TEST_KEY_SET".to_string());
        match validate_config(&cfg) {
            Err(ChatError::Configuration(msg)) => assert!(msg.contains("No servers")),
            _ => panic!("Expected Configuration error"),
        }

        cfg.servers.insert(
            "math".to_string(),
            ServerConfig {
                command: "python3".to_string(),
                ..Default::default()
            },
        );
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_mock_provider_needs_nothing() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_provider_name_is_case_insensitive() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = " Gemini ".to_string();
        cfg.llm.api_key_env = Some("TOOLCHAT_TEST_CASE_KEY".to_string());
        std::env::set_var("TOOLCHAT_TEST_CASE_KEY", "secret");
        cfg.servers.insert(
            "math".to_string(),
            ServerConfig {
                command: "python3".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(cfg.llm.provider_name(), "gemini");
        assert!(validate_config(&cfg).is_ok());

        cfg.llm.provider = "MOCK".to_string();
        assert!(cfg.llm.is_mock());

        cfg.llm.provider = "OpenAI".to_string();
        cfg.llm.api_key_env = None;
        assert_eq!(cfg.llm.api_key_env(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_env_var_pattern_compiled_once() {
        std::env::set_var("TOOLCHAT_TEST_ONCE", "a");
        assert_eq!(expand_env_vars("${TOOLCHAT_TEST_ONCE}-${TOOLCHAT_TEST_ONCE}"), "a-a");
        let first = ENV_VAR_RE.get().map(|re| re as *const Regex);
        assert!(first.is_some());
        assert_eq!(expand_env_vars("${TOOLCHAT_TEST_UNSET_ONCE:-b}"), "b");
        assert_eq!(ENV_VAR_RE.get().map(|re| re as *const Regex), first);
    }

    #[test]
    fn test_default_api_key_env_per_provider() {
        let mut llm = LlmSection::default();
        assert_eq!(llm.api_key_env(), "GEMINI_API_KEY");
        llm.provider = "openai".to_string();
        assert_eq!(llm.api_key_env(), "OPENAI_API_KEY");
    }
}
