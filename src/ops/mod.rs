//! 记忆操作层
//!
//! 七个记忆操作（活动入库、心智推断、分类建议、建议落库、关联链接、主题聚类、
//! 分类查询）统一走 MemoryAction 接口：枚举键注册、JSON Schema 声明参数、
//! JSON 报告返回结果。操作失败以 {success: false, error} 报告上浮，不向
//! 编排层抛错。共享资源（LLM、嵌入、存储）集中在 MemoryCore，由调用方注入。

pub mod categories;
pub mod cluster;
pub mod ingest;
pub mod infer;
pub mod link;
pub mod parse;
pub mod suggest;
pub mod update;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::llm::{EmbeddingProvider, LlmClient, ToolSpec};
use crate::store::{CategoryStore, EmbeddingIndex, MemoryItem};

pub use parse::{OpCode, PlannedOp};

/// 操作共享的资源集合
pub struct MemoryCore {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub store: CategoryStore,
    pub index: EmbeddingIndex,
}

impl MemoryCore {
    pub fn embeddings_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    /// 为新条目写入嵌入；未启用嵌入时为空操作，写入失败记日志不上浮
    pub(crate) async fn embed_items(&self, category: &str, character: &str, items: &[MemoryItem]) {
        let Some(embedder) = &self.embedder else {
            return;
        };
        if items.is_empty() {
            return;
        }
        if let Err(e) = self
            .index
            .append_records(category, character, items, embedder.as_ref())
            .await
        {
            warn!(category, "embedding write failed: {e}");
        }
    }
}

/// 工具调用里传递的记忆条目参数
#[derive(Clone, Debug, Deserialize)]
pub struct ItemPayload {
    pub memory_id: String,
    #[serde(default)]
    pub mentioned_at: String,
    pub content: String,
}

impl ItemPayload {
    /// 缺省时间戳回填会话日期
    pub fn into_item(self, session_date: &str) -> MemoryItem {
        let mentioned_at = if self.mentioned_at.is_empty() {
            session_date.to_string()
        } else {
            self.mentioned_at
        };
        MemoryItem {
            memory_id: self.memory_id,
            mentioned_at,
            content: self.content,
            links: String::new(),
        }
    }
}

/// 今日日期（YYYY-MM-DD）
pub(crate) fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// 操作枚举：注册表的键
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AddActivityMemory,
    RunTheoryOfMind,
    GenerateMemorySuggestions,
    UpdateMemoryWithSuggestions,
    LinkRelatedMemories,
    ClusterMemories,
    GetAvailableCategories,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::AddActivityMemory,
        ActionKind::RunTheoryOfMind,
        ActionKind::GenerateMemorySuggestions,
        ActionKind::UpdateMemoryWithSuggestions,
        ActionKind::LinkRelatedMemories,
        ActionKind::ClusterMemories,
        ActionKind::GetAvailableCategories,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::AddActivityMemory => "add_activity_memory",
            ActionKind::RunTheoryOfMind => "run_theory_of_mind",
            ActionKind::GenerateMemorySuggestions => "generate_memory_suggestions",
            ActionKind::UpdateMemoryWithSuggestions => "update_memory_with_suggestions",
            ActionKind::LinkRelatedMemories => "link_related_memories",
            ActionKind::ClusterMemories => "cluster_memories",
            ActionKind::GetAvailableCategories => "get_available_categories",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// 记忆操作接口：声明 Schema，执行返回 JSON 报告（总是返回，不抛错）
#[async_trait]
pub trait MemoryAction: Send + Sync {
    fn kind(&self) -> ActionKind;
    fn schema(&self) -> Value;
    async fn execute(&self, core: &MemoryCore, args: Value) -> Value;
}

/// 给报告附加操作名与时间戳
pub(crate) fn finish_report(kind: ActionKind, mut report: Value) -> Value {
    if let Some(map) = report.as_object_mut() {
        map.insert("action_name".to_string(), json!(kind.name()));
        map.insert(
            "timestamp".to_string(),
            json!(chrono::Local::now().to_rfc3339()),
        );
    }
    report
}

/// 失败报告
pub(crate) fn failure(kind: ActionKind, error: impl Into<String>) -> Value {
    let error = error.into();
    warn!(action = kind.name(), "action failed: {error}");
    finish_report(kind, json!({"success": false, "error": error}))
}

/// 操作注册表：每个枚举键对应一个具体实现
pub struct ActionSet {
    ingest: ingest::AddActivityMemory,
    infer: infer::RunTheoryOfMind,
    suggest: suggest::GenerateMemorySuggestions,
    update: update::UpdateMemoryWithSuggestions,
    link: link::LinkRelatedMemories,
    cluster: cluster::ClusterMemories,
    categories: categories::GetAvailableCategories,
}

impl Default for ActionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSet {
    pub fn new() -> Self {
        Self {
            ingest: ingest::AddActivityMemory,
            infer: infer::RunTheoryOfMind,
            suggest: suggest::GenerateMemorySuggestions,
            update: update::UpdateMemoryWithSuggestions,
            link: link::LinkRelatedMemories::default(),
            cluster: cluster::ClusterMemories,
            categories: categories::GetAvailableCategories,
        }
    }

    pub fn get(&self, kind: ActionKind) -> &dyn MemoryAction {
        match kind {
            ActionKind::AddActivityMemory => &self.ingest,
            ActionKind::RunTheoryOfMind => &self.infer,
            ActionKind::GenerateMemorySuggestions => &self.suggest,
            ActionKind::UpdateMemoryWithSuggestions => &self.update,
            ActionKind::LinkRelatedMemories => &self.link,
            ActionKind::ClusterMemories => &self.cluster,
            ActionKind::GetAvailableCategories => &self.categories,
        }
    }

    /// 全部操作的函数声明，供 function calling 使用
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        ActionKind::ALL
            .iter()
            .map(|kind| {
                let schema = self.get(*kind).schema();
                ToolSpec {
                    name: schema["name"].as_str().unwrap_or(kind.name()).to_string(),
                    description: schema["description"].as_str().unwrap_or("").to_string(),
                    parameters: schema["parameters"].clone(),
                }
            })
            .collect()
    }

    /// 按名字分发执行；未知函数名返回失败报告并列出可用函数
    pub async fn dispatch(&self, core: &MemoryCore, name: &str, args: Value) -> Value {
        match ActionKind::from_name(name) {
            Some(kind) => self.get(kind).execute(core, args).await,
            None => json!({
                "success": false,
                "error": format!("Unknown function: {name}"),
                "available_functions": ActionKind::ALL.iter().map(|k| k.name()).collect::<Vec<_>>(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_names_roundtrip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ActionKind::from_name("no_such_function"), None);
    }

    #[test]
    fn test_tool_specs_cover_all_actions() {
        let set = ActionSet::new();
        let specs = set.tool_specs();
        assert_eq!(specs.len(), ActionKind::ALL.len());
        assert!(specs.iter().any(|s| s.name == "add_activity_memory"));
        for spec in &specs {
            assert!(spec.parameters.is_object());
        }
    }

    #[test]
    fn test_item_payload_backfills_session_date() {
        let payload = ItemPayload {
            memory_id: "a1b2c3".to_string(),
            mentioned_at: String::new(),
            content: "Alice lives in Seattle.".to_string(),
        };
        let item = payload.into_item("2024-01-15");
        assert_eq!(item.mentioned_at, "2024-01-15");
        assert_eq!(item.links, "");
    }
}
