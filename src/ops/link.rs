//! 记忆关联链接
//!
//! 对目标条目做嵌入检索，在指定分类的侧文件里找相似条目并把 id 写回目标行的
//! 链接括号。候选先全局按相似度排序取 2×top_k，再按阈值过滤，可选再过一遍
//! LLM 相关性筛选（默认关），最后截断 top_k。依赖嵌入开启。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{decode_all, encode_all, ScoredRecord};

use super::{failure, finish_report, parse, ActionKind, MemoryAction, MemoryCore};

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

#[derive(Deserialize)]
struct Args {
    character_name: String,
    category: String,
    #[serde(default)]
    memory_id: Option<String>,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_min_similarity")]
    min_similarity: f32,
    #[serde(default)]
    search_categories: Option<Vec<String>>,
    #[serde(default)]
    link_all_items: bool,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

#[derive(Default)]
pub struct LinkRelatedMemories {
    /// 嵌入初筛后是否再让 LLM 做相关性复核
    pub filter_with_llm: bool,
}

#[async_trait]
impl MemoryAction for LinkRelatedMemories {
    fn kind(&self) -> ActionKind {
        ActionKind::LinkRelatedMemories
    }

    fn schema(&self) -> Value {
        json!({
            "name": "link_related_memories",
            "description": "Find related memories using embedding search and create links between them",
            "parameters": {
                "type": "object",
                "properties": {
                    "character_name": {
                        "type": "string",
                        "description": "Name of the character"
                    },
                    "memory_id": {
                        "type": "string",
                        "description": "ID of the memory item to find related memories for (optional if link_all_items is true)"
                    },
                    "category": {
                        "type": "string",
                        "description": "Category containing the target memory item"
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "Number of top related memories to find",
                        "default": 5
                    },
                    "min_similarity": {
                        "type": "number",
                        "description": "Minimum similarity threshold (0.0-1.0)",
                        "default": 0.3
                    },
                    "search_categories": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Categories to search in (default: all available categories)"
                    },
                    "link_all_items": {
                        "type": "boolean",
                        "description": "Whether to link all memory items in the category (if true, memory_id can be omitted)",
                        "default": false
                    }
                },
                "required": ["character_name", "category"]
            }
        })
    }

    async fn execute(&self, core: &MemoryCore, args: Value) -> Value {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return failure(self.kind(), format!("Invalid arguments: {e}")),
        };
        if !core.embeddings_enabled() {
            return failure(
                self.kind(),
                "Embeddings are not enabled. Cannot perform similarity search.",
            );
        }
        if !core.store.registry().is_basic(&args.category) {
            return failure(
                self.kind(),
                format!(
                    "Skipping category '{}' not in available categories. Available: {:?}",
                    args.category,
                    core.store.registry().basic_names()
                ),
            );
        }

        let search_categories = args
            .search_categories
            .clone()
            .unwrap_or_else(|| core.store.registry().basic_names());

        if args.link_all_items {
            return self.link_all(core, &args, &search_categories).await;
        }

        let Some(memory_id) = args.memory_id.clone() else {
            return failure(self.kind(), "memory_id is required when link_all_items is false");
        };

        let items = decode_all(&core.store.read(&args.category));
        let Some(target) = items.iter().find(|i| i.memory_id == memory_id) else {
            return failure(
                self.kind(),
                format!(
                    "Memory ID '{}' not found in {} for {}",
                    memory_id, args.category, args.character_name
                ),
            );
        };

        let related = self
            .find_related(core, &target.content, &memory_id, &search_categories, &args)
            .await;
        let link_ids: Vec<String> = related.iter().map(|r| r.memory_id.clone()).collect();

        if !link_ids.is_empty() {
            write_links(core, &args.category, &memory_id, &link_ids);
        }

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "linked_memory_ids": link_ids,
                "total_related": related.len(),
                "message": format!("Found {} related memories for {}", related.len(), memory_id),
            }),
        )
    }
}

impl LinkRelatedMemories {
    /// 嵌入初筛 + 可选 LLM 复核
    async fn find_related(
        &self,
        core: &MemoryCore,
        target_content: &str,
        exclude_memory_id: &str,
        search_categories: &[String],
        args: &Args,
    ) -> Vec<ScoredRecord> {
        let Some(embedder) = &core.embedder else {
            return Vec::new();
        };
        let target_embedding = match embedder.embed(target_content).await {
            Ok(v) => v,
            Err(e) => {
                warn!("target embedding failed: {e}");
                return Vec::new();
            }
        };

        let mut candidates: Vec<ScoredRecord> = core
            .index
            .scan(search_categories, &target_embedding)
            .into_iter()
            .filter(|c| c.memory_id != exclude_memory_id)
            .collect();
        candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        let mut filtered: Vec<ScoredRecord> = candidates
            .into_iter()
            .take(args.top_k * 2)
            .filter(|c| c.similarity >= args.min_similarity)
            .collect();
        if filtered.is_empty() {
            return filtered;
        }

        if self.filter_with_llm {
            filtered = self
                .filter_relevant_with_llm(core, &args.character_name, filtered, target_content)
                .await;
        }

        filtered.truncate(args.top_k);
        filtered
    }

    async fn filter_relevant_with_llm(
        &self,
        core: &MemoryCore,
        character_name: &str,
        candidates: Vec<ScoredRecord>,
        target_content: &str,
    ) -> Vec<ScoredRecord> {
        let candidates_text = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{}. [ID: {}] [{}] {} (similarity: {:.3})",
                    i + 1,
                    c.memory_id,
                    c.category,
                    c.text,
                    c.similarity
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = relevance_prompt(character_name, target_content, &candidates_text);
        let response = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                // 复核失败退回嵌入排序结果
                warn!("relevance filtering failed: {e}");
                return candidates;
            }
        };

        let indices = parse::parse_relevance_numbers(&response);
        indices
            .into_iter()
            .filter(|&i| i >= 1 && i <= candidates.len())
            .map(|i| candidates[i - 1].clone())
            .collect()
    }

    /// 批量模式：给分类里每个条目各找一遍关联
    async fn link_all(&self, core: &MemoryCore, args: &Args, search_categories: &[String]) -> Value {
        let items = decode_all(&core.store.read(&args.category));
        if items.is_empty() {
            return failure(
                self.kind(),
                format!(
                    "No memory items found in {} for {}",
                    args.category, args.character_name
                ),
            );
        }

        let mut total_linked = 0;
        for item in &items {
            let related = self
                .find_related(core, &item.content, &item.memory_id, search_categories, args)
                .await;
            let link_ids: Vec<String> = related.iter().map(|r| r.memory_id.clone()).collect();
            if !link_ids.is_empty() && write_links(core, &args.category, &item.memory_id, &link_ids)
            {
                total_linked += 1;
            }
        }

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "category": args.category,
                "total_items_processed": items.len(),
                "total_items_linked": total_linked,
                "message": format!(
                    "Linked {} out of {} memory items in {}",
                    total_linked,
                    items.len(),
                    args.category
                ),
            }),
        )
    }
}

/// 重写目标行的链接括号，其余行原样保留
fn write_links(core: &MemoryCore, category: &str, memory_id: &str, link_ids: &[String]) -> bool {
    let mut items = decode_all(&core.store.read(category));
    let Some(target) = items.iter_mut().find(|i| i.memory_id == memory_id) else {
        return false;
    };
    target.links = link_ids.join(",");
    core.store.write(category, &encode_all(&items))
}

fn relevance_prompt(character_name: &str, target_content: &str, candidates_text: &str) -> String {
    format!(
        r#"You are evaluating whether candidate memories are truly related to a target memory for {character_name}.

TARGET MEMORY:
{target_content}

CANDIDATE MEMORIES:
{candidates_text}

**TASK**: Determine which candidate memories are genuinely related to the target memory.

**CRITERIA FOR RELEVANCE**:
- Memories should share meaningful connections (people, places, events, topics, themes)
- Avoid superficial similarities (just sharing common words like "the", "and", "is")
- Consider contextual relationships (cause-effect, temporal sequences, thematic connections)
- Focus on memories that would provide useful context or background for understanding the target memory

**EVALUATION GUIDELINES**:
- RELEVANT: Memories about the same people, events, locations, or directly related topics
- RELEVANT: Memories that provide context, background, or related information
- NOT RELEVANT: Memories that only share common words but different contexts
- NOT RELEVANT: Memories about completely different topics/people/events

**OUTPUT FORMAT**:
Return ONLY the numbers (1, 2, 3, etc.) of the truly relevant memories, separated by commas. If no memories are relevant, return "NONE".

Examples:
- If memories 1, 3, and 5 are relevant: "1, 3, 5"
- If no memories are relevant: "NONE"
- If only memory 2 is relevant: "2"

RELEVANT MEMORY NUMBERS:"#
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{MockEmbedder, ScriptedLlm};
    use crate::store::{CategoryRegistry, CategoryStore, EmbeddingIndex, MemoryItem};

    async fn seeded_core(dir: &std::path::Path, llm: ScriptedLlm) -> MemoryCore {
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        let core = MemoryCore {
            llm: Arc::new(llm),
            embedder: Some(Arc::new(MockEmbedder::new())),
            store: CategoryStore::new(dir, "agent1", "Alice", registry),
            index: EmbeddingIndex::new(dir, "agent1", "Alice"),
        };

        let profile = vec![
            MemoryItem {
                memory_id: "target".to_string(),
                mentioned_at: "2024-01-15".to_string(),
                content: "Alice went hiking in Blue Ridge Mountains.".to_string(),
                links: String::new(),
            },
            MemoryItem {
                memory_id: "hike01".to_string(),
                mentioned_at: "2024-01-10".to_string(),
                content: "Alice bought hiking boots for Blue Ridge Mountains.".to_string(),
                links: String::new(),
            },
            MemoryItem {
                memory_id: "work01".to_string(),
                mentioned_at: "2024-01-05".to_string(),
                content: "Quarterly finance report deadlines at TechFlow Solutions.".to_string(),
                links: String::new(),
            },
        ];
        core.store.write("profile", &encode_all(&profile));
        let embedder = core.embedder.clone().unwrap();
        core.index
            .append_records("profile", "Alice", &profile, embedder.as_ref())
            .await
            .unwrap();
        core
    }

    #[tokio::test]
    async fn test_link_excludes_target_and_writes_back() {
        let dir = tempfile::tempdir().unwrap();
        let core = seeded_core(dir.path(), ScriptedLlm::new()).await;

        let report = LinkRelatedMemories::default()
            .execute(
                &core,
                json!({
                    "character_name": "Alice",
                    "category": "profile",
                    "memory_id": "target",
                    "min_similarity": 0.2
                }),
            )
            .await;

        assert_eq!(report["success"], true);
        let ids: Vec<&str> = report["linked_memory_ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(!ids.contains(&"target"));
        assert!(ids.contains(&"hike01"));

        let items = decode_all(&core.store.read("profile"));
        let target = items.iter().find(|i| i.memory_id == "target").unwrap();
        assert!(target.links.contains("hike01"));
        // 其余行不被触碰
        let other = items.iter().find(|i| i.memory_id == "work01").unwrap();
        assert_eq!(other.links, "");
    }

    #[tokio::test]
    async fn test_link_requires_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        let core = MemoryCore {
            llm: Arc::new(ScriptedLlm::new()),
            embedder: None,
            store: CategoryStore::new(dir.path(), "agent1", "Alice", registry),
            index: EmbeddingIndex::new(dir.path(), "agent1", "Alice"),
        };
        let report = LinkRelatedMemories::default()
            .execute(
                &core,
                json!({"character_name": "Alice", "category": "profile", "memory_id": "x"}),
            )
            .await;
        assert_eq!(report["success"], false);
        assert!(report["error"].as_str().unwrap().contains("not enabled"));
    }

    #[tokio::test]
    async fn test_link_missing_memory_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let core = seeded_core(dir.path(), ScriptedLlm::new()).await;
        let report = LinkRelatedMemories::default()
            .execute(&core, json!({"character_name": "Alice", "category": "profile"}))
            .await;
        assert_eq!(report["success"], false);
        assert!(report["error"].as_str().unwrap().contains("memory_id is required"));
    }

    #[tokio::test]
    async fn test_link_all_items_batch() {
        let dir = tempfile::tempdir().unwrap();
        let core = seeded_core(dir.path(), ScriptedLlm::new()).await;
        let report = LinkRelatedMemories::default()
            .execute(
                &core,
                json!({
                    "character_name": "Alice",
                    "category": "profile",
                    "link_all_items": true,
                    "min_similarity": 0.2
                }),
            )
            .await;
        assert_eq!(report["success"], true);
        assert_eq!(report["total_items_processed"], 3);
        assert!(report["total_items_linked"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_llm_relevance_filter_none_reply() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        llm.push_content("NONE");
        let core = seeded_core(dir.path(), llm).await;

        let action = LinkRelatedMemories {
            filter_with_llm: true,
        };
        let report = action
            .execute(
                &core,
                json!({
                    "character_name": "Alice",
                    "category": "profile",
                    "memory_id": "target",
                    "min_similarity": 0.2
                }),
            )
            .await;
        assert_eq!(report["success"], true);
        assert!(report["linked_memory_ids"].as_array().unwrap().is_empty());
    }
}
