//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CODA__*` 覆盖（双下划线表示嵌套，如 `CODA__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段：工作区根目录与对话轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作区根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 对话历史保留轮数
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            max_context_turns: default_max_context_turns(),
        }
    }
}

fn default_max_context_turns() -> usize {
    20
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [tools] 段：两档执行超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_bridge_timeout")]
    pub bridge_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            bridge_timeout_secs: default_bridge_timeout(),
        }
    }
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_bridge_timeout() -> u64 {
    15
}

/// [orchestrator] 段：执行循环预算与上下文压缩额度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 单步骤内 LLM 工具迭代上限
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// 最近两个已完成步骤的结果保留字符数
    #[serde(default = "default_recent_context_chars")]
    pub recent_context_chars: usize,
    /// 更早已完成步骤的结果保留字符数
    #[serde(default = "default_older_context_chars")]
    pub older_context_chars: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            recent_context_chars: default_recent_context_chars(),
            older_context_chars: default_older_context_chars(),
        }
    }
}

fn default_max_tool_iterations() -> usize {
    10
}

fn default_recent_context_chars() -> usize {
    2000
}

fn default_older_context_chars() -> usize {
    500
}

/// 从 config 目录加载配置，环境变量 CODA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CODA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
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
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CODA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
