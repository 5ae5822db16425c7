//! 记忆编排代理
//!
//! 固定六步工作流写进系统提示，LLM 通过 function calling 自主驱动各记忆操作，
//! 直到回复含 PROCESSING_COMPLETE 哨兵或达到迭代上限。同一轮里的工具调用按请
//! 求顺序串行执行；参数 JSON 解析失败记日志跳过该调用。每次 run 持有该
//! (agent_id, user_id) 的进程内建议锁，规避并发读改写。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::llm::{EmbeddingProvider, LlmClient, Message};
use crate::ops::{ActionSet, MemoryCore};
use crate::recall::RecallAgent;
use crate::store::{CategoryRegistry, CategoryStore, EmbeddingIndex, IdentityLocks};

/// 迭代上限缺省值
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// 完成哨兵：LLM 以此宣告流程结束
const COMPLETION_SENTINEL: &str = "PROCESSING_COMPLETE";

/// 一条对话消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// 一次工具调用的记录
#[derive(Clone, Debug, Serialize)]
pub struct CallRecord {
    pub iteration: usize,
    pub function_name: String,
    pub arguments: Value,
    pub result: Value,
}

/// 一次对话处理的结果
#[derive(Clone, Debug, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub character_name: String,
    pub session_date: String,
    pub conversation_length: usize,
    pub iterations: usize,
    pub function_calls: Vec<CallRecord>,
    pub processing_log: Vec<String>,
    pub token_usage: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResult {
    fn failed(character_name: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            character_name: character_name.to_string(),
            session_date: String::new(),
            conversation_length: 0,
            iterations: 0,
            function_calls: Vec::new(),
            processing_log: Vec::new(),
            token_usage: json!(null),
            error: Some(error.into()),
        }
    }
}

pub struct MemoryAgent {
    core: MemoryCore,
    actions: ActionSet,
    recall: RecallAgent,
    locks: IdentityLocks,
}

impl MemoryAgent {
    pub fn new(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        agent_id: &str,
        user_id: &str,
    ) -> Self {
        let registry = Arc::new(CategoryRegistry::new(&config.memory.categories));
        let store = CategoryStore::new(&config.memory.root, agent_id, user_id, registry);
        let index = EmbeddingIndex::new(&config.memory.root, agent_id, user_id);
        let core = MemoryCore {
            llm,
            embedder: embedder.clone(),
            store: store.clone(),
            index: index.clone(),
        };
        let recall = RecallAgent::new(
            store,
            index,
            embedder,
            config.memory.default_categories.clone(),
        );
        Self {
            core,
            actions: ActionSet::new(),
            recall,
            locks: IdentityLocks::new(),
        }
    }

    pub fn recall(&self) -> &RecallAgent {
        &self.recall
    }

    pub fn core(&self) -> &MemoryCore {
        &self.core
    }

    /// 处理一段对话：迭代 function calling 直到哨兵、取消或迭代上限
    pub async fn run(
        &self,
        conversation: &[ConversationTurn],
        character_name: &str,
        session_date: Option<&str>,
        max_iterations: usize,
        cancel: CancellationToken,
    ) -> ProcessResult {
        if conversation.is_empty() {
            return ProcessResult::failed(
                character_name,
                "Invalid conversation format. Expected a non-empty list of messages.",
            );
        }
        if character_name.is_empty() {
            return ProcessResult::failed(character_name, "Character name is required.");
        }

        let session_date = resolve_session_date(session_date);
        let conversation_text = conversation_to_text(conversation);
        info!(character = character_name, %session_date, "starting conversation processing");

        let lock = self
            .locks
            .lock_for(self.core.store.agent_id(), self.core.store.user_id());
        let _guard = lock.lock().await;

        let mut result = ProcessResult {
            success: true,
            character_name: character_name.to_string(),
            session_date: session_date.clone(),
            conversation_length: conversation.len(),
            iterations: 0,
            function_calls: Vec::new(),
            processing_log: Vec::new(),
            token_usage: json!(null),
            error: None,
        };

        let tools = self.actions.tool_specs();
        let mut messages = vec![Message::system(workflow_prompt(
            &conversation_text,
            character_name,
            &session_date,
        ))];

        let mut stopped_early = false;
        for iteration in 0..max_iterations {
            result.iterations = iteration + 1;

            if cancel.is_cancelled() {
                info!("processing cancelled");
                result
                    .processing_log
                    .push(format!("Iteration {}: Cancelled", iteration + 1));
                stopped_early = true;
                break;
            }

            let reply = match self.core.llm.chat(&messages, &tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("LLM call failed: {e}");
                    result
                        .processing_log
                        .push(format!("Iteration {}: LLM error - {e}", iteration + 1));
                    stopped_early = true;
                    break;
                }
            };

            if reply.content.contains(COMPLETION_SENTINEL) {
                info!("processing complete");
                result
                    .processing_log
                    .push(format!("Iteration {}: Processing completed", iteration + 1));
                stopped_early = true;
                break;
            }

            if reply.tool_calls.is_empty() {
                if !reply.content.is_empty() {
                    let prefix: String = reply.content.chars().take(100).collect();
                    result
                        .processing_log
                        .push(format!("Iteration {}: {prefix}", iteration + 1));
                }
                messages.push(Message::assistant(reply.content));
                continue;
            }

            messages.push(Message::assistant_with_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));

            // 同一轮的工具调用按请求顺序串行执行
            for tool_call in &reply.tool_calls {
                let arguments: Value = match serde_json::from_str(&tool_call.arguments) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(
                            function = %tool_call.name,
                            "failed to parse function arguments: {e}"
                        );
                        continue;
                    }
                };

                info!(function = %tool_call.name, "calling function");
                let function_result = self
                    .actions
                    .dispatch(&self.core, &tool_call.name, arguments.clone())
                    .await;

                let succeeded = function_result["success"].as_bool().unwrap_or(false);
                result.processing_log.push(format!(
                    "Iteration {}: Called {} - {}",
                    iteration + 1,
                    tool_call.name,
                    if succeeded {
                        "Success".to_string()
                    } else {
                        format!(
                            "Failed: {}",
                            function_result["error"].as_str().unwrap_or("Unknown error")
                        )
                    }
                ));

                messages.push(Message::tool(
                    tool_call.id.clone(),
                    function_result.to_string(),
                ));
                result.function_calls.push(CallRecord {
                    iteration: iteration + 1,
                    function_name: tool_call.name.clone(),
                    arguments,
                    result: function_result,
                });
            }
        }

        if !stopped_early && result.iterations >= max_iterations {
            warn!("reached maximum iterations ({max_iterations})");
            result
                .processing_log
                .push(format!("Reached maximum iterations ({max_iterations})"));
        }

        let (prompt, completion, total) = self.core.llm.token_usage();
        result.token_usage = json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": total,
        });

        info!(
            iterations = result.iterations,
            calls = result.function_calls.len(),
            "conversation processing finished"
        );
        result
    }
}

/// 会话日期：能按 YYYY-MM-DD 解析就用传入值，否则退回系统当天
fn resolve_session_date(session_date: Option<&str>) -> String {
    if let Some(date) = session_date {
        if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() {
            return date.to_string();
        }
        info!("session date unavailable, using system date");
    }
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn conversation_to_text(conversation: &[ConversationTurn]) -> String {
    conversation
        .iter()
        .map(|turn| format!("{}: {}", turn.role.to_uppercase(), turn.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn workflow_prompt(conversation_text: &str, character_name: &str, session_date: &str) -> String {
    format!(
        r#"You are a memory processing agent. Follow this structured process to analyze and store conversation information for "{character_name}":

CONVERSATION TO PROCESS:
{conversation_text}

CHARACTER: {character_name}
SESSION DATE: {session_date}

PROCESSING WORKFLOW:
1. STORE TO ACTIVITY: Call add_activity_memory with the COMPLETE RAW CONVERSATION TEXT as the 'content' parameter. This will automatically append to existing activity memories. DO NOT extract, modify, or summarize the conversation - pass the entire original conversation text exactly as shown above.

2. THEORY OF MIND: Call run_theory_of_mind to analyze the subtle information behind the conversation and extract the theory of mind of the characters.

3. GENERATE SUGGESTIONS: Call generate_memory_suggestions with the available memory items to get suggestions for what should be added to each category.

4. UPDATE CATEGORIES: For each category that should be updated (based on suggestions), call update_memory_with_suggestions to update that category with the new memory items and suggestions. This will return structured modifications.

5. LINK MEMORIES: For each category that was modified, call link_related_memories with link_all_items=true to add relevant links between ALL memories in that category.

6. CLUSTER MEMORIES: Call cluster_memories to cluster the memories into different categories.

IMPORTANT GUIDELINES:
- Step 1: CRITICAL: For add_activity_memory, the 'content' parameter MUST be the complete original conversation text exactly as shown above. Do NOT modify, extract, or summarize it.
- Step 2: Use both the original conversation and the extracted activity memory items from step 1 for the theory of mind analysis
- Step 3: Use BOTH the extracted memory items from step 1 and theory-of-mind items from step 2 for generating suggestions. You can simply concatenate the two lists of memory items and pass them to the subsequent function.
- Step 4: Use the memory suggestions from step 3 to update EVERY memory categories in suggestions.
- Step 5-6: Use the new memory items returned from step 4 for linking and clustering memories. DO NOT include the memory items returned from step 1 and 2.
- Each memory item should have its own memory_id and focused content
- Follow the suggestions when updating categories
- The update_memory_with_suggestions function will return structured format with memory_id and content
- Always link related memories after updating categories by setting link_all_items=true

Start with step 1 and work through the process systematically. When you complete all steps, respond with "{COMPLETION_SENTINEL}""#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    fn config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.root = root.to_path_buf();
        config
    }

    fn conversation() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::new("user", "I went hiking in Blue Ridge Mountains."),
            ConversationTurn::new("assistant", "That sounds great!"),
        ]
    }

    #[tokio::test]
    async fn test_sentinel_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        llm.push_content("All steps done. PROCESSING_COMPLETE");
        let agent = MemoryAgent::new(&config(dir.path()), Arc::new(llm), None, "agent1", "Alice");

        let result = agent
            .run(
                &conversation(),
                "Alice",
                Some("2024-01-15"),
                DEFAULT_MAX_ITERATIONS,
                CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.iterations, 1);
        assert!(result.function_calls.is_empty());
        assert_eq!(result.session_date, "2024-01-15");
    }

    #[tokio::test]
    async fn test_loop_bounded_by_max_iterations() {
        let dir = tempfile::tempdir().unwrap();
        // 兜底回复永不含哨兵
        let llm = ScriptedLlm::new().with_fallback("still thinking");
        let agent = MemoryAgent::new(&config(dir.path()), Arc::new(llm), None, "agent1", "Alice");

        let result = agent
            .run(
                &conversation(),
                "Alice",
                None,
                3,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.iterations, 3);
        assert!(result
            .processing_log
            .iter()
            .any(|l| l.contains("Reached maximum iterations (3)")));
    }

    #[tokio::test]
    async fn test_unknown_function_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        llm.push_tool_call("no_such_function", json!({"foo": 1}));
        llm.push_content("PROCESSING_COMPLETE");
        let agent = MemoryAgent::new(&config(dir.path()), Arc::new(llm), None, "agent1", "Alice");

        let result = agent
            .run(
                &conversation(),
                "Alice",
                Some("2024-01-15"),
                DEFAULT_MAX_ITERATIONS,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.function_calls.len(), 1);
        let record = &result.function_calls[0];
        assert_eq!(record.function_name, "no_such_function");
        assert_eq!(record.result["success"], false);
        assert!(record.result["available_functions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "add_activity_memory"));
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new().with_fallback("still thinking");
        let agent = MemoryAgent::new(&config(dir.path()), Arc::new(llm), None, "agent1", "Alice");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = agent
            .run(&conversation(), "Alice", None, 5, cancel)
            .await;

        assert_eq!(result.iterations, 1);
        assert!(result.processing_log.iter().any(|l| l.contains("Cancelled")));
    }

    #[tokio::test]
    async fn test_empty_conversation_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MemoryAgent::new(
            &config(dir.path()),
            Arc::new(ScriptedLlm::new()),
            None,
            "agent1",
            "Alice",
        );
        let result = agent
            .run(&[], "Alice", None, 5, CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_resolve_session_date_fallback() {
        assert_eq!(resolve_session_date(Some("2024-01-15")), "2024-01-15");
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(resolve_session_date(Some("not a date")), today);
        assert_eq!(resolve_session_date(None), today);
    }
}
