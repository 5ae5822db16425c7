//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）+ 嵌入提供方

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, MockEmbedder, OpenAiEmbedder};
pub use mock::ScriptedLlm;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{ChatReply, LlmClient, LlmError, Message, Role, ToolCall, ToolSpec};
