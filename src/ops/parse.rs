//! LLM 回复解析
//!
//! 六种操作各自约定了纯文本回复格式，这里集中提供全函数解析器：任何输入都有
//! 定义良好的输出，不认识的行一律跳过，绝不 panic。格式约定见各操作的提示词。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

/// 记忆操作码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Add,
    Update,
    Delete,
    Touch,
}

impl OpCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::Add => "ADD",
            OpCode::Update => "UPDATE",
            OpCode::Delete => "DELETE",
            OpCode::Touch => "TOUCH",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(OpCode::Add),
            "UPDATE" => Some(OpCode::Update),
            "DELETE" => Some(OpCode::Delete),
            "TOUCH" => Some(OpCode::Touch),
            _ => None,
        }
    }
}

/// 一条计划中的记忆操作（解析产物，尚未校验完整性）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedOp {
    pub op: OpCode,
    pub target_id: Option<String>,
    pub content: Option<String>,
}

/// 解析 `**OPERATION:** ADD|UPDATE|DELETE|TOUCH` 块序列。
/// 首个操作头之前的明细行丢弃；未知操作名的块整体丢弃。
pub fn parse_operations(text: &str) -> Vec<PlannedOp> {
    let mut ops = Vec::new();
    let mut current: Option<PlannedOp> = None;

    for line in text.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("**OPERATION:**") {
            if let Some(done) = current.take() {
                ops.push(done);
            }
            // 未知操作名的块整体丢弃，明细行不归入前一块
            current = OpCode::from_str(rest.trim()).map(|op| PlannedOp {
                op,
                target_id: None,
                content: None,
            });
            continue;
        }

        let Some(op) = current.as_mut() else {
            continue;
        };
        if let Some(rest) = line.strip_prefix("- Target Memory ID:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                op.target_id = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("- Memory Item Content:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                op.content = Some(rest.to_string());
            }
        }
    }

    if let Some(done) = current.take() {
        ops.push(done);
    }
    ops
}

/// 解析 `**Category: X**` + `- Suggestion:` 块。不在 allowed 内的分类丢弃；
/// 每条建议以换行拼接；最终过滤掉空白分类。
pub fn parse_suggestions(text: &str, allowed: &[String]) -> BTreeMap<String, String> {
    let mut suggestions: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();

        if line.starts_with("**Category:") && line.ends_with("**") {
            let name = line
                .trim_start_matches("**Category:")
                .trim_end_matches("**")
                .trim();
            if allowed.iter().any(|c| c == name) {
                suggestions.entry(name.to_string()).or_default();
                current = Some(name.to_string());
            } else {
                current = None;
            }
        } else if let Some(category) = &current {
            if let Some(rest) = line.strip_prefix("- Suggestion:") {
                let entry = suggestions.entry(category.clone()).or_default();
                entry.push_str(rest.trim());
                entry.push('\n');
            }
        }
    }

    suggestions.retain(|_, v| !v.trim().is_empty());
    suggestions
}

/// 解析 `**REASONING PROCESS:**` / `**INFERENCE ITEMS:**` 两段式回复，
/// 返回 (推理过程, 推断条目行)。推断段为空是合法输出。
pub fn parse_sectioned_inference(text: &str) -> (String, Vec<String>) {
    let mut reasoning = String::new();
    let mut items = Vec::new();
    let mut in_reasoning = false;
    let mut in_inference = false;

    for line in text.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();

        if upper.starts_with("**") && upper.contains("REASONING PROCESS") {
            in_reasoning = true;
            in_inference = false;
            continue;
        }
        if upper.starts_with("**") && upper.contains("INFERENCE ITEMS") {
            in_reasoning = false;
            in_inference = true;
            continue;
        }

        if in_reasoning && !line.is_empty() && !line.starts_with("**") {
            if !reasoning.is_empty() {
                reasoning.push('\n');
            }
            reasoning.push_str(line);
        } else if in_inference && !line.is_empty() {
            items.push(line.to_string());
        }
    }

    (reasoning, items)
}

/// 解析 `- key: v1, v2` 形式的列表行，值按逗号拆分并 trim。
/// 非列表行与缺冒号的行跳过；保持出现顺序。
pub fn parse_bullet_map(text: &str) -> Vec<(String, Vec<String>)> {
    let mut entries = Vec::new();

    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("- ") else {
            continue;
        };
        let Some((key, values)) = rest.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        if key.is_empty() {
            continue;
        }
        let values: Vec<String> = values
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        entries.push((key, values));
    }

    entries
}

/// 解析相关性筛选回复：`NONE` 或空 → 空表；否则抽取所有整数（1 起编号）
pub fn parse_relevance_numbers(text: &str) -> Vec<usize> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("none") {
        return Vec::new();
    }

    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b(\d+)\b").expect("invalid number pattern"));
    re.captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}
