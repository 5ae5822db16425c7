//! 错误类型
//!
//! 库内部用 MemoryError 传播；操作边界将其转为结构化失败报告（success=false + error 文本），
//! 不让异常穿越操作边界（见 ops 模块）。

use thiserror::Error;

/// 记忆引擎内部错误
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("storage error for category '{category}': {source}")]
    Store {
        category: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemoryError {
    pub fn store(category: impl Into<String>, source: std::io::Error) -> Self {
        Self::Store {
            category: category.into(),
            source,
        }
    }
}
