//! 分类建议生成
//!
//! 分析新记忆条目，按分类给出应落库的建议文本。activity 分类由入库操作独占，
//! 不出现在建议目标里；不在可用分类列表内的建议直接丢弃。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{failure, finish_report, parse, ActionKind, ItemPayload, MemoryAction, MemoryCore};

#[derive(Deserialize)]
struct Args {
    character_name: String,
    new_memory_items: Vec<ItemPayload>,
    #[serde(default)]
    available_categories: Option<Vec<String>>,
}

pub struct GenerateMemorySuggestions;

#[async_trait]
impl MemoryAction for GenerateMemorySuggestions {
    fn kind(&self) -> ActionKind {
        ActionKind::GenerateMemorySuggestions
    }

    fn schema(&self) -> Value {
        json!({
            "name": "generate_memory_suggestions",
            "description": "Analyze new memory items and generate suggestions for what should be added to different memory categories",
            "parameters": {
                "type": "object",
                "properties": {
                    "character_name": {
                        "type": "string",
                        "description": "Name of the character"
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
                "required": ["character_name", "new_memory_items"]
            }
        })
    }

    async fn execute(&self, core: &MemoryCore, args: Value) -> Value {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return failure(self.kind(), format!("Invalid arguments: {e}")),
        };
        if args.new_memory_items.is_empty() {
            return failure(self.kind(), "No memory items provided");
        }

        let available_categories = args.available_categories.unwrap_or_else(|| {
            core.store
                .registry()
                .basic_names()
                .into_iter()
                .filter(|c| c != "activity")
                .collect()
        });
        if available_categories.is_empty() {
            return failure(self.kind(), "No available categories found");
        }

        let prompt = suggestions_prompt(
            &args.character_name,
            &args.new_memory_items,
            &available_categories,
        );
        let response = match core.llm.simple_chat(&prompt).await {
            Ok(text) => text,
            Err(e) => return failure(self.kind(), e.to_string()),
        };
        if response.trim().is_empty() {
            return failure(self.kind(), "LLM returned empty suggestions");
        }

        let suggestions = parse::parse_suggestions(&response, &available_categories);

        finish_report(
            self.kind(),
            json!({
                "success": true,
                "character_name": args.character_name,
                "suggestions": suggestions,
                "categories_analyzed": available_categories,
                "message": format!(
                    "Generated self-contained suggestions for {} categories based on {} memory items",
                    suggestions.len(),
                    args.new_memory_items.len()
                ),
            }),
        )
    }
}

fn suggestions_prompt(
    character_name: &str,
    items: &[ItemPayload],
    available_categories: &[String],
) -> String {
    let memory_items_text = items
        .iter()
        .map(|item| format!("- {}", item.content))
        .collect::<Vec<_>>()
        .join("\n");
    let categories_text = available_categories.join(", ");

    format!(
        r#"You are an expert in analyzing the provided memory items for {character_name} and suggesting the memory items that should be added to each memory category.

New Memory Items:
{memory_items_text}

Available Categories: {categories_text}

**CRITICAL REQUIREMENT: Suggestions must be SELF-CONTAINED MEMORY ITEMS**

**SELF-CONTAINED MEMORY REQUIREMENTS:**
- EVERY activity item must be complete and standalone
- ALWAYS include the full subject (do not use "she/he/they/it")
- NEVER use pronouns that depend on context (no "she", "he", "they", "it")
- Include specific names, places, dates, and full context in each item
- Each activity should be understandable without reading other items
- Include all relevant details, emotions, and outcomes in the activity description

**CATEGORY-SPECIFIC REQUIREMENTS:**

For each category, analyze the new memory items and suggest what specific information should be extracted and added to that category:

- **profile**: ONLY basic personal information (age, location, occupation, education, family status, demographics) - EXCLUDE events, activities, things they did
- **event**: Specific events, dates, milestones, appointments, meetings, activities with time references
- **Other categories**: Relevant information for each specific category

**CRITICAL DISTINCTION - Profile vs Activity/Event:**
- Profile (GOOD): "Alice lives in San Francisco", "Alice is 28 years old", "Alice works at TechFlow Solutions"
- Profile (BAD): "Alice went hiking" (this is activity), "Alice attended workshop" (this is event)
- Activity/Event (GOOD): "Alice went hiking in Blue Ridge Mountains", "Alice attended photography workshop"

**SUGGESTION REQUIREMENTS:**
- Specify that memory items should include "{character_name}" as the subject
- Mention specific names, places, titles, and dates that should be included
- Ensure suggestions lead to complete, self-contained memory items
- Avoid suggesting content that would result in pronouns or incomplete sentences
- For profile: Focus ONLY on stable, factual, demographic information
- If one input memory item involves information belongs to multiple categories, you should reasonable seperete the information and provide suggestions to all involved categories
- **IMPORTANT** If the input memory item use modal adverbs (perhaps, probably, likely, etc.) to indicate an uncertain inference, keep the modal adverbs as-is in your suggestions

**OUTPUT INSTRUCTIONS:**
- **IMPORTANT** NEVER suggest categories that are not in the Available Categories
- Only output categories where there are suggestions for new memory items

**OUTPUT FORMAT:**

**Category: [category_name]**
- Suggestion: [What specific self-contained content should be added to this category, ensuring full subjects and complete context]
- Suggestion: [What specific self-contained content should be added to this category, ensuring full subjects and complete context]

**Category: [category_name]**
- Suggestion: [What specific self-contained content should be added to this category, ensuring full subjects and complete context]

... other categories ...
"#
    )
}
