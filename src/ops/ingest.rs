//! 活动记忆入库
//!
//! 原始对话文本先经 LLM 规整成“一行一个自包含活动、禁用代词”的条目，再编码
//! 追加进 activity 分类并写嵌入。LLM 回空视为失败，不落任何数据。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::store::{encode_all, MemoryItem};

use super::{failure, finish_report, today, ActionKind, MemoryAction, MemoryCore};

#[derive(Deserialize)]
struct Args {
    character_name: String,
    content: String,
    #[serde(default)]
    session_date: Option<String>,
    #[serde(default = "default_true")]
    generate_embeddings: bool,
}

fn default_true() -> bool {
    true
}

pub struct AddActivityMemory;

#[async_trait]
impl MemoryAction for AddActivityMemory {
    fn kind(&self) -> ActionKind {
        ActionKind::AddActivityMemory
    }

    fn schema(&self) -> Value {
        json!({
            "name": "add_activity_memory",
            "description": "Add new activity memory content with strict no-pronouns formatting for complete, self-contained memory items",
            "parameters": {
                "type": "object",
                "properties": {
                    "character_name": {
                        "type": "string",
                        "description": "Name of the character"
                    },
                    "content": {
                        "type": "string",
                        "description": "Complete original conversation text exactly as provided - do NOT modify, extract, or summarize"
                    },
                    "session_date": {
                        "type": "string",
                        "description": "Date of the session (e.g., '2024-01-15')"
                    },
                    "generate_embeddings": {
                        "type": "boolean",
                        "description": "Whether to generate embeddings for semantic search",
                        "default": true
                    }
                },
                "required": ["character_name", "content"]
            }
        })
    }

    async fn execute(&self, core: &MemoryCore, args: Value) -> Value {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return failure(self.kind(), format!("Invalid arguments: {e}")),
        };
        let session_date = args.session_date.filter(|d| !d.is_empty()).unwrap_or_else(today);

        let prompt = format_prompt(&args.character_name, &args.content, &session_date);
        let formatted = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => return failure(self.kind(), e.to_string()),
        };
        if formatted.trim().is_empty() {
            return failure(self.kind(), "LLM returned empty formatted content");
        }

        let items: Vec<MemoryItem> = formatted
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| MemoryItem::new(line, session_date.clone()))
            .collect();

        if !core.store.append("activity", &encode_all(&items)) {
            return failure(self.kind(), "Failed to save activity memory");
        }

        if args.generate_embeddings {
            core.embed_items("activity", &args.character_name, &items).await;
        }

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "category": "activity",
                "session_date": session_date,
                "memory_items_added": items.len(),
                "memory_items": items,
                "message": format!(
                    "Successfully generated {} self-contained activity memory items for {}",
                    items.len(),
                    args.character_name
                ),
            }),
        )
    }
}

fn format_prompt(character_name: &str, content: &str, session_date: &str) -> String {
    format!(
        r#"You are formatting activity memory content for {character_name} on {session_date}.

Raw content to format:
{content}

**CRITICAL REQUIREMENT: GROUP RELATED CONTENT INTO MEANINGFUL ACTIVITIES**

Transform this raw content into properly formatted activity memory items following these rules:

**MEANINGFUL ACTIVITY GROUPING REQUIREMENTS:**
- Group related sentences/statements into single, comprehensive activity descriptions
- Each activity should be a complete, self-contained description of what happened
- Combine related dialogue, actions, and context into cohesive activity blocks
- Only create separate items for genuinely different activities or topics
- Each activity item should tell a complete "story" or "event"

**SELF-CONTAINED MEMORY REQUIREMENTS:**
- EVERY activity item must be complete and standalone
- ALWAYS include the full subject (do not use "she/he/they/it")
- NEVER use pronouns that depend on context (no "she", "he", "they", "it")
- Include specific names, places, dates, and full context in each item
- Each activity should be understandable without reading other items
- Include all relevant details, emotions, and outcomes in the activity description

**FORMAT REQUIREMENTS:**
1. Each line = one complete, meaningful activity (may include multiple related sentences)
2. NO markdown headers, bullets, numbers, or structure
3. Write in plain text only
4. Focus on comprehensive, meaningful activity descriptions
5. Use specific names, titles, places, and dates
6. Each line ends with a period

**GOOD EXAMPLES (meaningful activities, one per line):**
{character_name} attended a LGBTQ support group where {character_name} heard inspiring transgender stories and felt happy, thankful, accepted, and gained courage to embrace {character_name}'s true self.
{character_name} discussed future career plans with Melanie, expressing keen interest in counseling and mental health work to support people with similar issues, and Melanie encouraged {character_name} saying {character_name} would be a great counselor due to {character_name}'s empathy and understanding.

**BAD EXAMPLES (too fragmented):**
{character_name} went to a LGBTQ support group.
{character_name} heard transgender stories.
{character_name} felt happy and thankful.

**ACTIVITY GROUPING GUIDELINES:**
- Conversations about the same topic -> Single activity
- Related actions and their outcomes -> Single activity
- Emotional reactions to specific events -> Include in the main activity
- Sequential related events -> Single comprehensive activity
- Different topics or unrelated events -> Separate activities

**QUALITY STANDARDS:**
- Never use "he", "she", "they", "it" - always use the person's actual name
- Never use "the book", "the place", "the friend" - always include full titles and names
- Each activity must be complete and tell the full story
- Include emotional context, outcomes, and significance
- Merge related content intelligently to create meaningful activity summaries

Transform the raw content into properly formatted activity memory items (ONE MEANINGFUL ACTIVITY PER LINE):

"#
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{MockEmbedder, ScriptedLlm};
    use crate::store::{decode_all, CategoryRegistry, CategoryStore, EmbeddingIndex};

    fn core(dir: &std::path::Path, llm: ScriptedLlm) -> MemoryCore {
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        MemoryCore {
            llm: Arc::new(llm),
            embedder: Some(Arc::new(MockEmbedder::new())),
            store: CategoryStore::new(dir, "agent1", "Alice", registry),
            index: EmbeddingIndex::new(dir, "agent1", "Alice"),
        }
    }

    #[tokio::test]
    async fn test_add_activity_appends_lines_and_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        llm.push_content(
            "Alice went hiking in Blue Ridge Mountains with Melanie and enjoyed the sunrise.\nAlice started a new job at TechFlow Solutions as a senior engineer.",
        );
        let core = core(dir.path(), llm);

        let report = AddActivityMemory
            .execute(
                &core,
                json!({
                    "character_name": "Alice",
                    "content": "USER: went hiking... ASSISTANT: nice!",
                    "session_date": "2024-01-15"
                }),
            )
            .await;

        assert_eq!(report["success"], true);
        assert_eq!(report["memory_items_added"], 2);
        let items = decode_all(&core.store.read("activity"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].mentioned_at, "2024-01-15");
        assert!(items[0].content.contains("Blue Ridge"));
        assert_eq!(core.index.load("activity").total_embeddings, 2);
    }

    #[tokio::test]
    async fn test_add_activity_empty_llm_reply_fails_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        llm.push_content("   \n  ");
        let core = core(dir.path(), llm);

        let report = AddActivityMemory
            .execute(
                &core,
                json!({"character_name": "Alice", "content": "something"}),
            )
            .await;

        assert_eq!(report["success"], false);
        assert_eq!(report["error"], "LLM returned empty formatted content");
        assert_eq!(core.store.read("activity"), "");
    }
}
