//! 主题聚类
//!
//! 两阶段：先判断新条目归属哪些已有 cluster 分类（有才问），再发现值得新建的
//! 事件主题（不超过三个词、仅字母与空格、统一小写）。命中的条目按行格式追加进
//! 对应 cluster 文件；LLM 回空按“无聚类结果”处理而非失败。

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{encode, normalize_cluster_name, CategoryScope, MemoryItem};

use super::{failure, finish_report, parse, today, ActionKind, ItemPayload, MemoryAction, MemoryCore};

#[derive(Deserialize)]
struct Args {
    character_name: String,
    conversation_content: String,
    new_memory_items: Vec<ItemPayload>,
    #[serde(default)]
    new_theory_of_mind_items: Vec<ItemPayload>,
    #[serde(default)]
    session_date: Option<String>,
}

pub struct ClusterMemories;

#[async_trait]
impl MemoryAction for ClusterMemories {
    fn kind(&self) -> ActionKind {
        ActionKind::ClusterMemories
    }

    fn schema(&self) -> Value {
        json!({
            "name": "cluster_memories",
            "description": "Cluster memories into different categories",
            "parameters": {
                "type": "object",
                "properties": {
                    "character_name": {
                        "type": "string",
                        "description": "Name of the character"
                    },
                    "conversation_content": {
                        "type": "string",
                        "description": "The full conversation content to provide context for clustering"
                    },
                    "new_memory_items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "memory_id": {"type": "string"},
                                "content": {"type": "string"},
                                "mentioned_at": {"type": "string"}
                            },
                            "required": ["memory_id", "content"]
                        },
                        "description": "List of new memory items from the conversation"
                    }
                },
                "required": ["character_name", "conversation_content", "new_memory_items"]
            }
        })
    }

    async fn execute(&self, core: &MemoryCore, args: Value) -> Value {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return failure(self.kind(), format!("Invalid arguments: {e}")),
        };
        let session_date = args.session_date.clone().filter(|d| !d.is_empty()).unwrap_or_else(today);

        // 活动条目与推断条目合并，按 id 去重（后到覆盖）
        let mut items: Vec<MemoryItem> = Vec::new();
        for payload in args
            .new_memory_items
            .iter()
            .chain(args.new_theory_of_mind_items.iter())
            .cloned()
        {
            let item = payload.into_item(&session_date);
            match items.iter().position(|i| i.memory_id == item.memory_id) {
                Some(pos) => items[pos] = item,
                None => items.push(item),
            }
        }
        if items.is_empty() {
            return failure(self.kind(), "No memory items provided");
        }

        let existing_clusters = core.store.list(CategoryScope::Cluster);

        let mut updated: BTreeSet<String> = BTreeSet::new();
        if !existing_clusters.is_empty() {
            updated = self
                .merge_existing(core, &args, &existing_clusters, &items)
                .await;
        }

        let new_clusters = self
            .detect_new(core, &args, &existing_clusters, &items, &mut updated)
            .await;

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "updated_clusters": updated.iter().collect::<Vec<_>>(),
                "new_clusters": new_clusters.iter().collect::<Vec<_>>(),
                "message": format!(
                    "Analyzed {} new memory items. Updated {} existing clusters and detected {} new clusters",
                    items.len(),
                    updated.len(),
                    new_clusters.len()
                ),
            }),
        )
    }
}

impl ClusterMemories {
    async fn merge_existing(
        &self,
        core: &MemoryCore,
        args: &Args,
        existing_clusters: &[String],
        items: &[MemoryItem],
    ) -> BTreeSet<String> {
        let prompt = merge_prompt(&args.conversation_content, existing_clusters, items);
        let response = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("cluster merge call failed: {e}");
                return BTreeSet::new();
            }
        };

        let mut updated = BTreeSet::new();
        for (memory_id, clusters) in parse::parse_bullet_map(&response) {
            let Some(item) = items.iter().find(|i| i.memory_id == memory_id) else {
                continue;
            };
            for cluster in clusters {
                let cluster = normalize_cluster_name(&cluster);
                if !existing_clusters.contains(&cluster) {
                    continue;
                }
                if core.store.append(&cluster, &encode(item)) {
                    updated.insert(cluster);
                }
            }
        }
        updated
    }

    async fn detect_new(
        &self,
        core: &MemoryCore,
        args: &Args,
        existing_clusters: &[String],
        items: &[MemoryItem],
        updated: &mut BTreeSet<String>,
    ) -> BTreeSet<String> {
        let prompt = detect_prompt(&args.conversation_content, existing_clusters, items);
        let response = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("cluster detection call failed: {e}");
                return BTreeSet::new();
            }
        };

        let mut new_clusters = BTreeSet::new();
        for (name, memory_ids) in parse::parse_bullet_map(&response) {
            let name = normalize_cluster_name(&name);
            if name.is_empty() {
                continue;
            }

            let already_exists = existing_clusters.contains(&name);
            if !already_exists && !new_clusters.contains(&name) {
                if !core.store.create_cluster(&name) {
                    continue;
                }
                new_clusters.insert(name.clone());
            }

            for memory_id in memory_ids {
                let Some(item) = items.iter().find(|i| i.memory_id == memory_id) else {
                    continue;
                };
                if core.store.append(&name, &encode(item)) && already_exists {
                    updated.insert(name.clone());
                }
            }
        }
        new_clusters
    }
}

fn items_text(items: &[MemoryItem]) -> String {
    items
        .iter()
        .map(|item| format!("Memory ID: {}\nContent: {}", item.memory_id, item.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn clusters_list(clusters: &[String]) -> String {
    clusters
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn merge_prompt(
    conversation_content: &str,
    existing_clusters: &[String],
    items: &[MemoryItem],
) -> String {
    let clusters_list = clusters_list(existing_clusters);
    let memory_items_text = items_text(items);

    format!(
        r#"You are an expert in analyzing and categorizing memories items.

You are given a list of existing clusters, a list of memory items, and the full conversation context that generated these memories.
Your task is to analyze if each of the memory items is related to any of the existing clusters.

**CONVERSATION CONTEXT:**
{conversation_content}

**EXISTING CLUSTERS:**
{clusters_list}

**MEMORY ITEMS:**
{memory_items_text}

**INSTRUCTIONS:**
1. Use the conversation context to better understand the background and relationships of the memory items.
2. It is possible that a memory item is related to multiple clusters.
Example: "We went to hiking in Blue Ridge Mountains this summer" is related to both "hiking" and "summer events" clusters, if both these two clusters are in the Existing Clusters.
3. If it possible that some memory items are not related to any of the existing clusters, you don't need to force them into any cluster.
4. DO NOT output memory items that are not related to any of the existing clusters.
5. Consider the conversation context when determining relationships - topics discussed together might belong to the same cluster.

**OUTPUT FORMAT:**
- [Memory ID]: [Cluster names that the memory item is related to, separated by comma]
- [Memory ID]: [Cluster names that the memory item is related to, separated by comma]
- ...
"#
    )
}

fn detect_prompt(
    conversation_content: &str,
    existing_clusters: &[String],
    items: &[MemoryItem],
) -> String {
    let existing_clusters_list = clusters_list(existing_clusters);
    let memory_items_text = items_text(items);

    format!(
        r#"You are an expert in discovering some important or repeating events in one's memory records.

You are given a conversation context, a list of memory items extracted from this conversation, and existing clusters.
Your task is to discover NEW events/themes that are either:
- Important (e.g., marriage, job promotion, etc.), or
- Repeating, periodical, or routine (e.g., going to gym, attending specific events, etc.).

**CONVERSATION CONTEXT:**
{conversation_content}

**EXISTING CLUSTERS (DO NOT recreate these):**
{existing_clusters_list}

**MEMORY ITEMS:**
{memory_items_text}

**INSTRUCTIONS:**
1. Use the conversation context to better understand the significance and relationships of events.
2. Only create NEW clusters - do not recreate existing clusters listed above.
3. You should create a Event Name for each NEW event you discover.
4. The Event Name should be short and clear. A single word is the best (e.g., "marriage", "hiking"). Never let the name be longer than 3 words.
5. The Event Name should contains only alphabets or space. DO NOT use any other characters including hyphen, underscore, etc.
6. An event can be considered repeating, periodical, or routine, if they are mentioned at least twice in the memory items OR if the conversation context suggests it's a recurring theme.
7. If an event is considered important enough (e.g., proposal), you should record it no matter how many times it is mentioned.
8. For event content that are close (e.g., hiking and backpacking), you can merge them into a single event, and accumulate the count.
9. Consider the conversation flow - events discussed together might indicate related themes or patterns.

**OUTPUT FORMAT:**
- [Event Name]: [Memory ID of ALL memory items related to this event, separated by comma]
- [Event Name]: [Memory ID of ALL memory items related to this event, separated by comma]
- ...
"#
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::llm::ScriptedLlm;
    use crate::store::{decode_all, CategoryRegistry, CategoryStore, EmbeddingIndex};

    fn core(dir: &std::path::Path, llm: ScriptedLlm) -> MemoryCore {
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        MemoryCore {
            llm: Arc::new(llm),
            embedder: None,
            store: CategoryStore::new(dir, "agent1", "Alice", registry),
            index: EmbeddingIndex::new(dir, "agent1", "Alice"),
        }
    }

    fn item_args() -> Value {
        json!([
            {"memory_id": "a1", "content": "Alice went hiking in Blue Ridge Mountains.", "mentioned_at": "2024-01-15"},
            {"memory_id": "b2", "content": "Alice planned another hiking trip for March.", "mentioned_at": "2024-01-15"}
        ])
    }

    #[tokio::test]
    async fn test_detect_creates_new_cluster_and_appends_items() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        // 没有已有 cluster 时只有探测调用
        llm.push_content("- Hiking: a1, b2");
        let core = core(dir.path(), llm);

        let report = ClusterMemories
            .execute(
                &core,
                json!({
                    "character_name": "Alice",
                    "conversation_content": "USER: hiking talk",
                    "new_memory_items": item_args()
                }),
            )
            .await;

        assert_eq!(report["success"], true);
        assert_eq!(report["new_clusters"], json!(["hiking"]));
        assert_eq!(report["updated_clusters"], json!([]));
        let items = decode_all(&core.store.read("hiking"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].memory_id, "a1");
    }

    #[tokio::test]
    async fn test_merge_appends_to_existing_cluster_only() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        // 第一问：归并到已有 cluster；第二问：没有新主题
        llm.push_content("- a1: hiking, nonexistent cluster\n- zz: hiking");
        llm.push_content("");
        let core = core(dir.path(), llm);
        core.store.create_cluster("hiking");

        let report = ClusterMemories
            .execute(
                &core,
                json!({
                    "character_name": "Alice",
                    "conversation_content": "USER: hiking talk",
                    "new_memory_items": item_args()
                }),
            )
            .await;

        assert_eq!(report["success"], true);
        assert_eq!(report["updated_clusters"], json!(["hiking"]));
        assert_eq!(report["new_clusters"], json!([]));
        let items = decode_all(&core.store.read("hiking"));
        // 未知 memory_id（zz）与未知 cluster 均被跳过
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].memory_id, "a1");
    }

    #[tokio::test]
    async fn test_no_items_fails() {
        let dir = tempfile::tempdir().unwrap();
        let core = core(dir.path(), ScriptedLlm::new());
        let report = ClusterMemories
            .execute(
                &core,
                json!({"character_name": "Alice", "conversation_content": "x", "new_memory_items": []}),
            )
            .await;
        assert_eq!(report["success"], false);
    }
}
