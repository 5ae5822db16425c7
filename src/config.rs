//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MNEMO__*` 覆盖（双下划线表示嵌套，如 `MNEMO__LLM__MODEL=gpt-4o`）。
//! 配置对象显式构造并注入各组件，不做全局单例。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [embedding] 段：语义检索用的嵌入端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub enabled: bool,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_embedding_model(),
            base_url: None,
            api_key: None,
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// 分类的检索上下文模式：all 全文直出，rag 仅经相似度检索（可窗口化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    All,
    Rag,
}

/// 一个基础分类的声明：名称、文件名、描述、检索模式
#[derive(Debug, Clone, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    /// 缺省为 `<name>.md`
    pub filename: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_context")]
    pub context: ContextMode,
    #[serde(default = "default_rag_length")]
    pub rag_length: usize,
}

fn default_context() -> ContextMode {
    ContextMode::All
}

fn default_rag_length() -> usize {
    50
}

impl CategorySpec {
    pub fn filename(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("{}.md", self.name))
    }
}

/// [memory] 段：存储根目录、默认检索分类、基础分类表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub root: PathBuf,
    /// 默认检索直出的分类（context=all）
    pub default_categories: Vec<String>,
    pub categories: Vec<CategorySpec>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("memory"),
            default_categories: vec!["profile".to_string(), "event".to_string()],
            categories: default_categories(),
        }
    }
}

fn default_categories() -> Vec<CategorySpec> {
    vec![
        CategorySpec {
            name: "profile".to_string(),
            filename: None,
            description: "Basic personal information: age, location, occupation, education, family status, demographics".to_string(),
            context: ContextMode::All,
            rag_length: default_rag_length(),
        },
        CategorySpec {
            name: "event".to_string(),
            filename: None,
            description: "Specific events, dates, milestones, appointments, meetings with time references".to_string(),
            context: ContextMode::All,
            rag_length: default_rag_length(),
        },
        CategorySpec {
            name: "activity".to_string(),
            filename: None,
            description: "Detailed descriptions of conversations and activities, including time, place, and people involved".to_string(),
            context: ContextMode::Rag,
            rag_length: default_rag_length(),
        },
    ]
}

/// 从 config 目录加载配置，环境变量 MNEMO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MNEMO__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("MNEMO")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
