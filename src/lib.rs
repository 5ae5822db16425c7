//! Mnemo - Rust 对话记忆引擎
//!
//! 模块划分：
//! - **agent**: 会话编排器（Function Calling 循环驱动六个记忆操作）
//! - **config**: 应用配置加载（TOML + 环境变量，含基础分类表）
//! - **error**: 错误类型（thiserror）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）+ 嵌入提供方
//! - **observability**: tracing 初始化
//! - **ops**: 记忆操作引擎（摄取 / 心智推理 / 建议 / 调和更新 / 关联 / 聚类）
//! - **recall**: 回忆引擎（默认分类 / 相关分类 / 相关条目 三种检索）
//! - **store**: 行编解码、分类注册表、分类文件存储、嵌入索引

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod ops;
pub mod recall;
pub mod store;

pub use agent::{ConversationTurn, MemoryAgent, ProcessResult};
pub use error::MemoryError;
