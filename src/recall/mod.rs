//! 语义回忆
//!
//! 三个检索入口：默认分类全文、按查询找相关分类（嵌入优先、关键词重叠兜底）、
//! 跨全部侧文件的条目级嵌入检索。读分类内容时按分类声明的 context 模式取全文
//! 或末尾 rag_length 行窗口。检索全部只读，不触碰分类文件。

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ContextMode;
use crate::llm::EmbeddingProvider;
use crate::store::{cosine_similarity, CategoryScope, CategoryStore, EmbeddingIndex};

/// 条目级检索的最低相似度门槛
const MEMORY_SIMILARITY_FLOOR: f32 = 0.1;

pub struct RecallAgent {
    store: CategoryStore,
    index: EmbeddingIndex,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    default_categories: Vec<String>,
}

impl RecallAgent {
    pub fn new(
        store: CategoryStore,
        index: EmbeddingIndex,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        default_categories: Vec<String>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            default_categories,
        }
    }

    pub fn semantic_search_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    /// 分类内容按声明的 context 模式窗口化：rag 取末尾 rag_length 行
    fn windowed_content(&self, category: &str, content: &str) -> String {
        let Some(spec) = self.store.registry().basic_spec(category).cloned() else {
            return content.to_string();
        };
        match spec.context {
            ContextMode::All => content.to_string(),
            ContextMode::Rag => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(spec.rag_length);
                lines[start..].join("\n")
            }
        }
    }

    /// 默认分类全文检索：按配置顺序返回有内容的默认分类，缺失或空文件直接省略
    pub fn retrieve_default_category(&self) -> Value {
        let all_categories = self.store.list(CategoryScope::All);
        let existing_defaults: Vec<&String> = self
            .default_categories
            .iter()
            .filter(|c| all_categories.contains(c))
            .collect();

        let mut results = Vec::new();
        for category in &self.default_categories {
            let content = self.store.read(category);
            if content.is_empty() {
                debug!(category, "no content for default category");
                continue;
            }
            let content = self.windowed_content(category, &content);
            results.push(json!({
                "category": category,
                "content": content,
                "content_type": "default_category",
                "length": content.len(),
                "lines": content.lines().count(),
                "file_exists": all_categories.contains(category),
            }));
        }

        json!({
            "success": true,
            "method": "retrieve_default_category",
            "requested_categories": self.default_categories,
            "existing_categories": existing_defaults,
            "all_categories_found": all_categories,
            "total_items": results.len(),
            "message": format!(
                "Retrieved {} default categories (found {}/{} requested files)",
                results.len(),
                existing_defaults.len(),
                self.default_categories.len()
            ),
            "results": results,
        })
    }

    /// 相关分类检索：默认分类与 activity 除外，嵌入比对内容前缀，
    /// 嵌入不可用或失败时退回关键词重叠分数；零分分类不入榜
    pub async fn retrieve_relevant_category(&self, query: &str, top_k: usize) -> Value {
        let all_categories = self.store.list(CategoryScope::All);
        let mut excluded = self.default_categories.clone();
        excluded.push("activity".to_string());
        let relevant: Vec<String> = all_categories
            .iter()
            .filter(|c| !excluded.contains(c))
            .cloned()
            .collect();

        if relevant.is_empty() {
            return json!({
                "success": true,
                "method": "retrieve_relevant_category",
                "query": query,
                "results": [],
                "total_items": 0,
                "message": "No categories available (excluding default categories and activity)",
            });
        }

        let mut scored = Vec::new();
        for category in &relevant {
            let content = self.store.read(category);
            if content.is_empty() {
                continue;
            }

            let (score, semantic_used) = self.score_content(query, &content).await;
            if score <= 0.0 {
                continue;
            }
            let content = self.windowed_content(category, &content);
            scored.push((
                score,
                json!({
                    "category": category,
                    "content": content,
                    "content_type": "relevant_category",
                    "relevance_score": score,
                    "semantic_search_used": semantic_used,
                    "length": content.len(),
                    "lines": content.lines().count(),
                }),
            ));
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        let results: Vec<Value> = scored.into_iter().take(top_k).map(|(_, v)| v).collect();

        json!({
            "success": true,
            "method": "retrieve_relevant_category",
            "query": query,
            "top_k": top_k,
            "all_categories_found": all_categories,
            "excluded_categories": excluded,
            "available_categories": relevant,
            "semantic_search_enabled": self.semantic_search_enabled(),
            "total_items": results.len(),
            "message": format!(
                "Retrieved top {} relevant categories for query '{}' from {} total categories",
                results.len(),
                query,
                all_categories.len()
            ),
            "results": results,
        })
    }

    /// 条目级检索：扫全部嵌入侧文件，阈值 0.1，全局排序取 top_k
    pub async fn retrieve_relevant_memories(&self, query: &str, top_k: usize) -> Value {
        let Some(embedder) = &self.embedder else {
            return json!({
                "success": false,
                "error": "Semantic search not available - embedding client not initialized",
                "method": "retrieve_relevant_memories",
                "query": query,
            });
        };

        let query_embedding = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                return json!({
                    "success": false,
                    "error": e.to_string(),
                    "method": "retrieve_relevant_memories",
                    "query": query,
                });
            }
        };

        let categories = self.index.categories_with_sidecars();
        if categories.is_empty() {
            return json!({
                "success": true,
                "method": "retrieve_relevant_memories",
                "query": query,
                "results": [],
                "total_items": 0,
                "message": format!("No embeddings found in {}", self.index.dir().display()),
            });
        }

        let mut candidates: Vec<_> = self
            .index
            .scan(&categories, &query_embedding)
            .into_iter()
            .filter(|c| c.similarity > MEMORY_SIMILARITY_FLOOR)
            .collect();
        candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        let total_candidates = candidates.len();

        let results: Vec<Value> = candidates
            .into_iter()
            .take(top_k)
            .map(|c| {
                json!({
                    "content": c.text,
                    "content_type": "relevant_memory",
                    "semantic_score": c.similarity,
                    "category": c.category,
                    "item_id": c.item_id,
                    "memory_id": c.memory_id,
                    "line_number": c.line_number,
                    "length": c.text.len(),
                    "metadata": c.metadata,
                })
            })
            .collect();

        json!({
            "success": true,
            "method": "retrieve_relevant_memories",
            "query": query,
            "top_k": top_k,
            "semantic_search_enabled": true,
            "total_items": results.len(),
            "total_candidates": total_candidates,
            "message": format!(
                "Retrieved top {} memories from {} candidates",
                results.len(),
                total_candidates
            ),
            "results": results,
        })
    }

    /// 查询对分类内容的相关度；嵌入失败退回关键词重叠
    async fn score_content(&self, query: &str, content: &str) -> (f32, bool) {
        if let Some(embedder) = &self.embedder {
            // 嵌入只看内容前缀，长文件不整段送
            let prefix: String = content.chars().take(1000).collect();
            let embedded = match embedder.embed(query).await {
                Ok(q) => match embedder.embed(&prefix).await {
                    Ok(c) => Some(cosine_similarity(&q, &c)),
                    Err(e) => {
                        warn!("content embedding failed: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!("query embedding failed: {e}");
                    None
                }
            };
            if let Some(score) = embedded {
                return (score, true);
            }
        }
        (keyword_overlap(query, content), false)
    }
}

/// 查询词在内容中出现的比例
fn keyword_overlap(query: &str, content: &str) -> f32 {
    let content_lower = content.to_lowercase();
    let query_lower = query.to_lowercase();
    let words: Vec<&str> = query_lower.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| content_lower.contains(**w)).count();
    hits as f32 / words.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::MockEmbedder;
    use crate::store::{CategoryRegistry, MemoryItem};

    fn agent(dir: &std::path::Path, embedder: Option<Arc<dyn EmbeddingProvider>>) -> RecallAgent {
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        RecallAgent::new(
            CategoryStore::new(dir, "agent1", "Alice", registry),
            EmbeddingIndex::new(dir, "agent1", "Alice"),
            embedder,
            vec!["profile".to_string(), "event".to_string()],
        )
    }

    #[test]
    fn test_default_category_omits_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path(), None);
        a.store
            .write("profile", "[a1][mentioned at 2024-01-15] Alice lives in Seattle. []");
        a.store.write("event", "");

        let report = a.retrieve_default_category();
        assert_eq!(report["success"], true);
        assert_eq!(report["total_items"], 1);
        assert_eq!(report["results"][0]["category"], "profile");
    }

    #[tokio::test]
    async fn test_relevant_category_excludes_defaults_and_activity() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path(), None);
        a.store.write("profile", "Alice hiking facts here");
        a.store.write("activity", "Alice hiking activity log");
        a.store.create_cluster("hiking");
        a.store
            .write("hiking", "[a1][mentioned at 2024-01-15] Alice went hiking. []");

        let report = a.retrieve_relevant_category("hiking trips", 5).await;
        assert_eq!(report["success"], true);
        let results = report["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["category"], "hiking");
        // 无嵌入时走关键词重叠
        assert_eq!(results[0]["semantic_search_used"], false);
    }

    #[tokio::test]
    async fn test_relevant_category_zero_score_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path(), None);
        a.store.create_cluster("cooking");
        a.store
            .write("cooking", "[a1][mentioned at 2024-01-15] Alice baked bread. []");

        let report = a.retrieve_relevant_category("quantum physics", 5).await;
        assert_eq!(report["total_items"], 0);
    }

    #[tokio::test]
    async fn test_relevant_memories_threshold_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedder::new());
        let a = agent(dir.path(), Some(embedder.clone()));

        let items = vec![
            MemoryItem::new("Alice went hiking in Blue Ridge Mountains.", "2024-01-15"),
            MemoryItem::new("Alice filed the quarterly finance report.", "2024-01-15"),
        ];
        a.index
            .append_records("activity", "Alice", &items, embedder.as_ref())
            .await
            .unwrap();

        let report = a
            .retrieve_relevant_memories("hiking in Blue Ridge Mountains", 5)
            .await;
        assert_eq!(report["success"], true);
        let results = report["results"].as_array().unwrap();
        assert!(!results.is_empty());
        assert!(results[0]["content"]
            .as_str()
            .unwrap()
            .contains("hiking"));
        // 返回集与候选集分开计数
        assert!(report["total_candidates"].as_u64().unwrap() >= results.len() as u64);
    }

    #[tokio::test]
    async fn test_relevant_memories_requires_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path(), None);
        let report = a.retrieve_relevant_memories("anything", 5).await;
        assert_eq!(report["success"], false);
    }

    #[test]
    fn test_keyword_overlap_fraction() {
        assert_eq!(keyword_overlap("hiking trips", "alice went hiking"), 0.5);
        assert_eq!(keyword_overlap("", "content"), 0.0);
        assert_eq!(keyword_overlap("alice", "Alice went home"), 1.0);
    }

    #[test]
    fn test_rag_window_limits_lines() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path(), None);
        // activity 声明为 rag 模式
        let many: Vec<String> = (0..60).map(|i| format!("line {i}")).collect();
        let windowed = a.windowed_content("activity", &many.join("\n"));
        assert_eq!(windowed.lines().count(), 50);
        assert!(windowed.starts_with("line 10"));

        // profile 声明为 all 模式，不截断
        let full = a.windowed_content("profile", &many.join("\n"));
        assert_eq!(full.lines().count(), 60);
    }
}
