//! 建议落库
//!
//! 把某分类的建议文本交给 LLM 决策成 ADD/UPDATE/DELETE/TOUCH 操作序列，再按序
//! 应用到条目工作副本上，最后全量重写分类文件。操作应用是纯函数，可独立测试。
//! 目标 id 不存在的 UPDATE/DELETE/TOUCH 仍计入已执行操作（意图审计），只记警告。
//! 仅 ADD/UPDATE 产生的条目重新写嵌入。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{decode_all, encode_all, MemoryItem};

use super::{failure, finish_report, parse, today, ActionKind, MemoryAction, MemoryCore, OpCode, PlannedOp};

#[derive(Deserialize)]
struct Args {
    character_name: String,
    category: String,
    suggestion: String,
    #[serde(default)]
    session_date: Option<String>,
    #[serde(default = "default_true")]
    generate_embeddings: bool,
}

fn default_true() -> bool {
    true
}

/// 操作序列应用结果
pub(crate) struct Applied {
    pub items: Vec<MemoryItem>,
    pub executed: Vec<PlannedOp>,
    pub new_items: Vec<MemoryItem>,
    /// 需要重写嵌入的条目（仅 ADD/UPDATE 产物）
    pub reembed: Vec<MemoryItem>,
}

/// 按序应用操作序列到条目工作副本。缺必填字段的操作整体跳过；
/// 目标 id 找不到的操作不改动条目，但仍计入 executed。
pub(crate) fn apply_operations(
    existing: Vec<MemoryItem>,
    ops: &[PlannedOp],
    session_date: &str,
) -> Applied {
    let mut items = existing;
    let mut executed = Vec::new();
    let mut new_items = Vec::new();
    let mut reembed = Vec::new();

    for op in ops {
        match op.op {
            OpCode::Add => {
                let Some(content) = &op.content else {
                    continue;
                };
                let item = MemoryItem::new(content.clone(), session_date);
                items.push(item.clone());
                new_items.push(item.clone());
                reembed.push(item);
                executed.push(op.clone());
            }
            OpCode::Update => {
                let (Some(target), Some(content)) = (&op.target_id, &op.content) else {
                    continue;
                };
                match items.iter_mut().find(|i| &i.memory_id == target) {
                    Some(item) => {
                        item.content = content.clone();
                        reembed.push(item.clone());
                    }
                    None => warn!(target, "UPDATE target not found, recorded as intent"),
                }
                executed.push(op.clone());
            }
            OpCode::Delete => {
                let Some(target) = &op.target_id else {
                    continue;
                };
                let before = items.len();
                items.retain(|i| &i.memory_id != target);
                if items.len() == before {
                    warn!(target, "DELETE target not found, recorded as intent");
                }
                executed.push(op.clone());
            }
            OpCode::Touch => {
                let Some(target) = &op.target_id else {
                    continue;
                };
                if !items.iter().any(|i| &i.memory_id == target) {
                    warn!(target, "TOUCH target not found, recorded as intent");
                }
                executed.push(op.clone());
            }
        }
    }

    Applied {
        items,
        executed,
        new_items,
        reembed,
    }
}

fn executed_report(ops: &[PlannedOp]) -> Vec<Value> {
    ops.iter()
        .map(|op| {
            json!({
                "operation": op.op.as_str(),
                "target_id": op.target_id,
                "memory_content": op.content,
            })
        })
        .collect()
}

pub struct UpdateMemoryWithSuggestions;

#[async_trait]
impl MemoryAction for UpdateMemoryWithSuggestions {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateMemoryWithSuggestions
    }

    fn schema(&self) -> Value {
        json!({
            "name": "update_memory_with_suggestions",
            "description": "Update memory categories with different operation types (ADD, UPDATE, DELETE, TOUCH)",
            "parameters": {
                "type": "object",
                "properties": {
                    "character_name": {
                        "type": "string",
                        "description": "Name of the character"
                    },
                    "category": {
                        "type": "string",
                        "description": "Memory category to update"
                    },
                    "suggestion": {
                        "type": "string",
                        "description": "Suggestion for what content should be processed in this category"
                    },
                    "session_date": {
                        "type": "string",
                        "description": "Session date for the memory items (format: YYYY-MM-DD)"
                    },
                    "generate_embeddings": {
                        "type": "boolean",
                        "default": true,
                        "description": "Whether to generate embeddings for the new content"
                    }
                },
                "required": ["character_name", "category", "suggestion"]
            }
        })
    }

    async fn execute(&self, core: &MemoryCore, args: Value) -> Value {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return failure(self.kind(), format!("Invalid arguments: {e}")),
        };
        if !core.store.registry().is_basic(&args.category) {
            return failure(
                self.kind(),
                format!(
                    "Invalid category '{}'. Available: {:?}",
                    args.category,
                    core.store.registry().basic_names()
                ),
            );
        }
        let session_date = args.session_date.filter(|d| !d.is_empty()).unwrap_or_else(today);

        let existing = decode_all(&core.store.read(&args.category));
        let prompt = operation_prompt(
            &args.category,
            &args.character_name,
            &existing,
            &args.suggestion,
        );
        let response = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => return failure(self.kind(), e.to_string()),
        };
        if response.trim().is_empty() {
            return failure(
                self.kind(),
                format!("LLM returned empty operation analysis for {}", args.category),
            );
        }

        let ops = parse::parse_operations(&response);
        let applied = apply_operations(existing, &ops, &session_date);

        if !core.store.write(&args.category, &encode_all(&applied.items)) {
            return failure(
                self.kind(),
                format!("Failed to save updated {} memory", args.category),
            );
        }

        if args.generate_embeddings {
            core.embed_items(&args.category, &args.character_name, &applied.reembed)
                .await;
        }

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "category": args.category,
                "operation_executed": executed_report(&applied.executed),
                "new_memory_items": applied.new_items,
                "message": format!(
                    "Successfully performed {} memory operations for {}",
                    applied.executed.len(),
                    args.category
                ),
            }),
        )
    }
}

fn operation_prompt(
    category: &str,
    character_name: &str,
    existing: &[MemoryItem],
    suggestion: &str,
) -> String {
    let existing_content = if existing.is_empty() {
        "No existing content".to_string()
    } else {
        existing
            .iter()
            .map(|item| format!("[Memory ID: {}] {}", item.memory_id, item.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are an expert in analyzing the following memory update scenario and determining the memory operations that should be performed.

Character: {character_name}
Memory Category: {category}

Existing Memory Items in {category}:
{existing_content}

Memory Update Suggestion:
{suggestion}

**CRITICAL REQUIREMENT: The object of memory operations must be SELF-CONTAINED MEMORY ITEMS**

**SELF-CONTAINED MEMORY REQUIREMENTS:**
- EVERY activity item must be complete and standalone
- ALWAYS include the full subject (do not use "she/he/they/it")
- NEVER use pronouns that depend on context (no "she", "he", "they", "it")
- Include specific names, places, dates, and full context in each item
- Each activity should be understandable without reading other items
- Include all relevant details, emotions, and outcomes in the activity description

**OPERATION TYPES:**
1. **ADD**: Add completely new memory items that doesn't exist in Existing Memory Items
2. **UPDATE**: Modify or enhance existing memory items with new details
3. **DELETE**: Remove outdated, incorrect, or irrelevant memory items
4. **TOUCH**: Touch memory items that already exists in current content (only for updating last-mentioned timestamp)

**ANALYSIS GUIDELINES:**
- Read the Memory Update Suggestion carefully to determine what new memory items are offered
- Read the Existing Memory Items to view all memory items that are already present
- Determine the most appropriate operation type FOR EACH NEW MEMORY ITEM based on the new information and existing content
- **Use ADD for:** New memory items that are not covered in existing content
- **Use UPDATE for:** New memory items that provide updated details for existing memory items
- **Use DELETE for:** Existing memory items that are outdated/incorrect based on new memory items
- **Use TOUCH for:** Existing memory items that already covers the new memory items adequately

**OUTPUT INSTRUCTIONS:**
- **IMPORTANT** Output ALL necessary memory operations. It is common that you should perform different operations for different specific memory items
- For ADD and UPDATE operations, provide the content of the new memory items following the self-contained memory requirements
- For UPDATE, DELETE, and TOUCH operations, provide the target memory IDs associated with the memory items
- If there are multiple actions for an operation type (e.g, multiple ADDs), output them separately, do not put them in a single **OPERATION:** block
- **IMPORTANT** If a memory item in suggestion uses modal adverbs (perhaps, probably, likely, etc.) to indicate an uncertain inference, keep the modal adverbs as-is in your output

**OUTPUT FORMAT:**

**OPERATION:** [ADD/UPDATE/DELETE/TOUCH]
- Target Memory ID: [Only if operation is UPDATE, DELETE, or TOUCH][Memory ID of the memory item that is the target of the operation]
- Memory Item Content: [Only if operation is ADD or UPDATE][Content of the new memory item]

**OPERATION:** [ADD/UPDATE/DELETE/TOUCH]
- Target Memory ID: [Only if operation is UPDATE, DELETE, or TOUCH][Memory ID of the memory item that is the target of the operation]
- Memory Item Content: [Only if operation is ADD or UPDATE][Content of the new memory item]

... other operations ...
"#
    )
}
