//! 记忆条目行编解码
//!
//! 行格式：`[memory_id][mentioned at YYYY-MM-DD] content [link1,link2]`，链接括号可缺省；
//! 兼容旧版两段格式 `[memory_id] content`。旧版条目时间戳为空，重编码仍保持可解码
//! （无链接时原样输出旧版格式），全量重写不丢旧条目。畸形行解码为 None，调用方按
//! 无内容跳过。纯函数，无 I/O。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 原子记忆条目：序列化行即唯一事实来源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub memory_id: String,
    pub mentioned_at: String,
    pub content: String,
    /// 逗号连接的关联 memory_id 集合，可为空
    #[serde(default)]
    pub links: String,
}

impl MemoryItem {
    /// 新条目：分配新 id，空链接
    pub fn new(content: impl Into<String>, mentioned_at: impl Into<String>) -> Self {
        Self {
            memory_id: generate_memory_id(),
            mentioned_at: mentioned_at.into(),
            content: content.into(),
            links: String::new(),
        }
    }
}

/// 6 位随机 id；唯一性仅概率保证（分类内条目数量级下足够）
pub fn generate_memory_id() -> String {
    let mut s = uuid::Uuid::new_v4().simple().to_string();
    s.truncate(6);
    s
}

fn timestamped_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // 时间戳组允许为空：旧版条目补链接后仍走此格式
        Regex::new(r"^\[([^\]]+)\]\[mentioned at ([^\]]*)\]\s*(.*?)(?:\s*\[([^\]]*)\])?$")
            .expect("invalid memory line pattern")
    })
}

fn legacy_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([\w]+)\]\s+(.*)$").expect("invalid legacy line pattern"))
}

/// 编码为单行：字段顺序固定 id、时间、内容、链接。
/// 时间戳与链接都为空的旧版条目保持旧版两段格式。
pub fn encode(item: &MemoryItem) -> String {
    if item.mentioned_at.is_empty() && item.links.is_empty() {
        return format!("[{}] {}", item.memory_id, item.content);
    }
    format!(
        "[{}][mentioned at {}] {} [{}]",
        item.memory_id, item.mentioned_at, item.content, item.links
    )
}

/// 解码一行；畸形行返回 None（不报错）
pub fn decode(line: &str) -> Option<MemoryItem> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = timestamped_pattern().captures(line) {
        let content = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
        if content.is_empty() {
            return None;
        }
        return Some(MemoryItem {
            memory_id: caps[1].to_string(),
            mentioned_at: caps[2].to_string(),
            content: content.to_string(),
            links: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
        });
    }

    // 旧版格式：[id] content，无时间戳无链接
    if let Some(caps) = legacy_pattern().captures(line) {
        let content = caps[2].trim();
        if content.is_empty() {
            return None;
        }
        return Some(MemoryItem {
            memory_id: caps[1].to_string(),
            mentioned_at: String::new(),
            content: content.to_string(),
            links: String::new(),
        });
    }

    None
}

/// 解码整个分类文件内容；空行与畸形行跳过
pub fn decode_all(text: &str) -> Vec<MemoryItem> {
    text.lines().filter_map(decode).collect()
}

/// 编码条目列表为文件内容（每行一条）
pub fn encode_all(items: &[MemoryItem]) -> String {
    items.iter().map(encode).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let item = MemoryItem {
            memory_id: "a1b2c3".to_string(),
            mentioned_at: "2024-01-15".to_string(),
            content: "Alice went hiking in Blue Ridge Mountains.".to_string(),
            links: "d4e5f6,g7h8i9".to_string(),
        };
        let line = encode(&item);
        assert_eq!(
            line,
            "[a1b2c3][mentioned at 2024-01-15] Alice went hiking in Blue Ridge Mountains. [d4e5f6,g7h8i9]"
        );
        assert_eq!(decode(&line), Some(item));
    }

    #[test]
    fn test_roundtrip_empty_links() {
        let item = MemoryItem::new("Alice lives in Seattle.", "2024-01-15");
        let decoded = decode(&encode(&item)).unwrap();
        assert_eq!(decoded, item);
        assert_eq!(decoded.links, "");
    }

    #[test]
    fn test_decode_missing_link_bracket() {
        let decoded = decode("[a1b2c3][mentioned at 2024-01-15] Alice lives in Seattle.").unwrap();
        assert_eq!(decoded.memory_id, "a1b2c3");
        assert_eq!(decoded.links, "");
        assert_eq!(decoded.content, "Alice lives in Seattle.");
    }

    #[test]
    fn test_decode_legacy_format() {
        let decoded = decode("[a1b2c3] Alice lives in Seattle.").unwrap();
        assert_eq!(decoded.memory_id, "a1b2c3");
        assert_eq!(decoded.mentioned_at, "");
        assert_eq!(decoded.content, "Alice lives in Seattle.");
    }

    #[test]
    fn test_legacy_roundtrip_preserved() {
        let item = decode("[a1b2c3] Alice lives in Seattle.").unwrap();
        let line = encode(&item);
        assert_eq!(line, "[a1b2c3] Alice lives in Seattle.");
        assert_eq!(decode(&line), Some(item));
    }

    #[test]
    fn test_legacy_item_with_links_roundtrip() {
        // 旧版条目补上链接后时间戳仍为空，需保持可解码
        let mut item = decode("[a1b2c3] Alice lives in Seattle.").unwrap();
        item.links = "d4e5f6".to_string();
        let line = encode(&item);
        assert_eq!(
            line,
            "[a1b2c3][mentioned at ] Alice lives in Seattle. [d4e5f6]"
        );
        assert_eq!(decode(&line), Some(item));
    }

    #[test]
    fn test_decode_malformed_returns_none() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("   "), None);
        assert_eq!(decode("no brackets at all"), None);
        assert_eq!(decode("[only-id-no-content]"), None);
        assert_eq!(decode("[id][mentioned at 2024-01-15]"), None);
    }

    #[test]
    fn test_decode_all_skips_blank_and_malformed() {
        let text = "[a1][mentioned at 2024-01-15] First. []\n\ngarbage line\n[b2][mentioned at 2024-01-16] Second. [a1]";
        let items = decode_all(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].memory_id, "a1");
        assert_eq!(items[1].links, "a1");
    }

    #[test]
    fn test_generate_memory_id_shape() {
        let id = generate_memory_id();
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_memory_id(), generate_memory_id());
    }

    #[test]
    fn test_encode_all_one_item_per_line() {
        let items = vec![
            MemoryItem::new("First.", "2024-01-15"),
            MemoryItem::new("Second.", "2024-01-15"),
        ];
        let text = encode_all(&items);
        assert_eq!(text.lines().count(), 2);
        assert_eq!(decode_all(&text), items);
    }
}
