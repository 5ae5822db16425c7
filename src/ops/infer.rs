//! 心智推断
//!
//! 基于对话与活动条目推断未明说的信息，产出与记忆条目同格式的推断条目。
//! 条目不直接落盘，交由后续的建议与落库操作处理。推断段为空是合法结果。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::store::MemoryItem;

use super::{failure, finish_report, parse, today, ActionKind, ItemPayload, MemoryAction, MemoryCore};

#[derive(Deserialize)]
struct Args {
    character_name: String,
    conversation_text: String,
    activity_items: Vec<ItemPayload>,
    #[serde(default)]
    session_date: Option<String>,
}

pub struct RunTheoryOfMind;

#[async_trait]
impl MemoryAction for RunTheoryOfMind {
    fn kind(&self) -> ActionKind {
        ActionKind::RunTheoryOfMind
    }

    fn schema(&self) -> Value {
        json!({
            "name": "run_theory_of_mind",
            "description": "Analyze the conversation and memory items to extract subtle, obscure, and hidden information behind the conversation.",
            "parameters": {
                "type": "object",
                "properties": {
                    "character_name": {
                        "type": "string",
                        "description": "Name of the character"
                    },
                    "conversation_text": {
                        "type": "string",
                        "description": "The full conversation text to analyze"
                    },
                    "activity_items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "memory_id": {"type": "string"},
                                "content": {"type": "string"}
                            },
                            "required": ["memory_id", "content"]
                        },
                        "description": "List of new activity items from the conversation"
                    },
                    "session_date": {
                        "type": "string",
                        "description": "Date of the session (e.g., '2024-01-15')"
                    }
                },
                "required": ["character_name", "conversation_text", "activity_items"]
            }
        })
    }

    async fn execute(&self, core: &MemoryCore, args: Value) -> Value {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return failure(self.kind(), format!("Invalid arguments: {e}")),
        };
        if args.conversation_text.trim().is_empty() {
            return failure(self.kind(), "Empty conversation text provided");
        }
        if args.activity_items.is_empty() {
            return failure(self.kind(), "No memory items provided");
        }
        let session_date = args.session_date.filter(|d| !d.is_empty()).unwrap_or_else(today);

        let prompt = inference_prompt(
            &args.character_name,
            &args.conversation_text,
            &args.activity_items,
        );
        let response = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => return failure(self.kind(), e.to_string()),
        };
        if response.trim().is_empty() {
            return failure(self.kind(), "LLM returned empty response");
        }

        let (reasoning_process, lines) = parse::parse_sectioned_inference(&response);
        let items: Vec<MemoryItem> = lines
            .into_iter()
            .map(|line| MemoryItem::new(line, session_date.clone()))
            .collect();

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "theory_of_mind_items_added": items.len(),
                "theory_of_mind_items": items,
                "reasoning_process": reasoning_process,
                "message": format!(
                    "Extracted {} theory of mind items from conversation",
                    items.len()
                ),
            }),
        )
    }
}

fn inference_prompt(
    character_name: &str,
    conversation_text: &str,
    activity_items: &[ItemPayload],
) -> String {
    let activity_items_text = activity_items
        .iter()
        .map(|item| format!("- {}", item.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are analyzing the following conversation and activity items for {character_name} to try to infer information that is not explicitly mentioned by {character_name} in the conversation, but he or she might meant to express or the listener can reasonably deduce.

Conversation:
{conversation_text}

Activity Items:
{activity_items_text}

**CRITICAL REQUIREMENT: Inference results must be SELF-CONTAINED MEMORY ITEMS**

Your task it to leverage your reasoning skills to infer the information that is not explicitly mentioned in the conversation, but the character might meant to express or the listener can reasonably deduce.

**SELF-CONTAINED MEMORY REQUIREMENTS:**
- Plain text only, no markdown grammar
- EVERY activity item must be complete and standalone
- ALWAYS include the full subject (do not use "she/he/they/it")
- NEVER use pronouns that depend on context (no "she", "he", "they", "it")
- Include specific names, places, dates, and full context in each item
- Each activity should be understandable without reading other items
- You can use words like "perhaps" or "maybe" to indicate that the information is obtained through reasoning and is not 100% certain
- NO need to include evidences or reasoning processes in the items

**INFERENCE GUIDELINES:**
- Leverage your reasoning skills to infer the information that is not explicitly mentioned
- Use the activity items as a reference to assist your reasoning process and inferences
- DO NOT repeat the information that is already included in the activity items
- Use modal adverbs (perhaps, probably, likely, etc.) to indicate your confidence level of the inference

**COMPLETE SENTENCE EXAMPLES:**
GOOD: "{character_name} may have experience working abroad"
BAD: "Have experience working abroad" (missing subject)
BAD: "He may have experience working abroad" (pronouns as subject)
GOOD: "Harry Potter series are probably important to {character_name}'s childhood"

**OUTPUT FORMAT:**

**REASONING PROCESS:**
[Your reasoning process for what kind of implicit information can be hidden behind the conversation, what are the evidences, how you get to your conclusion, and how confident you are.]

**INFERENCE ITEMS:**
[One piece of inference per line, no markdown headers, no structure, no numbering, no bullet points, ends with a period]
[After carefully reasoning, if you determine that there is no implicit information that can be inferred from the conversation beyond the explicit information already mentioned in the activity items, you can leave this section empty. DO NOT output things like "No inference available".]

"#
    )
}
