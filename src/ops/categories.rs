//! 可用分类查询
//!
//! 返回除 activity 外的 basic 分类（文件名、描述、条目数）以及当前派生出的
//! cluster 分类（条目数）。activity 由入库操作独占。

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{finish_report, ActionKind, MemoryAction, MemoryCore};
use crate::store::CategoryScope;

pub struct GetAvailableCategories;

#[async_trait]
impl MemoryAction for GetAvailableCategories {
    fn kind(&self) -> ActionKind {
        ActionKind::GetAvailableCategories
    }

    fn schema(&self) -> Value {
        json!({
            "name": "get_available_categories",
            "description": "Get all available memory categories, their descriptions and item counts (excluding activity category)",
            "parameters": {"type": "object", "properties": {}, "required": []}
        })
    }

    async fn execute(&self, core: &MemoryCore, _args: Value) -> Value {
        let registry = core.store.registry();
        let mut categories = Map::new();

        for name in registry.basic_names() {
            if name == "activity" {
                continue;
            }
            if let Some(spec) = registry.basic_spec(&name) {
                categories.insert(
                    name.clone(),
                    json!({
                        "filename": spec.filename(),
                        "description": spec.description,
                        "items": core.store.file_info(&name).lines,
                    }),
                );
            }
        }

        let mut clusters = Map::new();
        for name in core.store.list(CategoryScope::Cluster) {
            clusters.insert(
                name.clone(),
                json!({ "items": core.store.file_info(&name).lines }),
            );
        }

        let total = categories.len() + clusters.len();
        finish_report(
            self.kind(),
            json!({
                "success": true,
                "categories": categories,
                "cluster_categories": clusters,
                "total_categories": total,
                "embeddings_enabled": core.embeddings_enabled(),
                "excluded_categories": ["activity"],
                "message": format!("Found {total} memory categories (excluding activity)"),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::llm::ScriptedLlm;
    use crate::store::{CategoryRegistry, CategoryStore, EmbeddingIndex};

    #[tokio::test]
    async fn test_excludes_activity() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        let core = MemoryCore {
            llm: Arc::new(ScriptedLlm::new()),
            embedder: None,
            store: CategoryStore::new(dir.path(), "agent1", "Alice", registry),
            index: EmbeddingIndex::new(dir.path(), "agent1", "Alice"),
        };

        let report = GetAvailableCategories.execute(&core, json!({})).await;
        assert_eq!(report["success"], true);
        assert_eq!(report["total_categories"], 2);
        let categories = report["categories"].as_object().unwrap();
        assert!(categories.contains_key("profile"));
        assert!(categories.contains_key("event"));
        assert!(!categories.contains_key("activity"));
        assert_eq!(report["categories"]["profile"]["filename"], "profile.md");
        assert_eq!(report["categories"]["profile"]["items"], 0);
        assert_eq!(report["embeddings_enabled"], false);
    }

    #[tokio::test]
    async fn test_counts_items_and_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        let core = MemoryCore {
            llm: Arc::new(ScriptedLlm::new()),
            embedder: None,
            store: CategoryStore::new(dir.path(), "agent1", "Alice", registry),
            index: EmbeddingIndex::new(dir.path(), "agent1", "Alice"),
        };
        core.store
            .write("profile", "[a1][mentioned at 2024-01-15] Likes tea. []\n[b2][mentioned at 2024-01-15] Lives in Austin. []");
        core.store.create_cluster("hiking");
        core.store
            .write("hiking", "[c3][mentioned at 2024-01-15] Hiked Blue Ridge. []");

        let report = GetAvailableCategories.execute(&core, json!({})).await;
        assert_eq!(report["categories"]["profile"]["items"], 2);
        assert_eq!(report["cluster_categories"]["hiking"]["items"], 1);
        assert_eq!(report["total_categories"], 3);
    }
}
