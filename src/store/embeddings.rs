//! 嵌入索引
//!
//! 每分类一个 JSON 侧文件：`<root>/embeddings/<agent_id>/<user_id>/<category>_embeddings.json`，
//! 形如 {category, timestamp, embeddings: [...], total_embeddings}。append 逐条嵌入，单条失败
//! 记日志跳过不中断批次；scan 线性加载全部侧文件算余弦，原始分数全量返回，排序过滤留给调用方。
//! 侧文件只追加不压缩：被 UPDATE/DELETE 取代的记录保留为历史嵌入轨迹。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MemoryError;
use crate::llm::EmbeddingProvider;
use crate::store::codec::{encode, MemoryItem};

/// 嵌入记录元数据
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub character: String,
    pub category: String,
    pub length: usize,
    pub mentioned_at: String,
    pub timestamp: String,
}

/// 一条嵌入记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub item_id: String,
    pub memory_id: String,
    pub text: String,
    pub full_line: String,
    pub embedding: Vec<f32>,
    pub line_number: usize,
    pub metadata: RecordMetadata,
}

/// 侧文件整体结构
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EmbeddingSidecar {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub embeddings: Vec<EmbeddingRecord>,
    #[serde(default)]
    pub total_embeddings: usize,
}

/// scan 的候选：记录 + 所属分类 + 原始相似度
#[derive(Clone, Debug, Serialize)]
pub struct ScoredRecord {
    pub memory_id: String,
    pub item_id: String,
    pub text: String,
    pub full_line: String,
    pub category: String,
    pub line_number: usize,
    pub similarity: f32,
    pub metadata: RecordMetadata,
}

/// 余弦相似度；维度不一致或零模长向量返回 0.0（降级而非失败）
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// 某 (agent_id, user_id) 的嵌入索引
#[derive(Clone)]
pub struct EmbeddingIndex {
    dir: PathBuf,
}

impl EmbeddingIndex {
    pub fn new(root: impl AsRef<Path>, agent_id: &str, user_id: &str) -> Self {
        Self {
            dir: root.as_ref().join("embeddings").join(agent_id).join(user_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sidecar_path(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{category}_embeddings.json"))
    }

    /// 加载某分类侧文件；缺失或损坏返回空结构
    pub fn load(&self, category: &str) -> EmbeddingSidecar {
        let path = self.sidecar_path(category);
        if !path.exists() {
            return EmbeddingSidecar::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(category, "sidecar parse failed: {e}");
                EmbeddingSidecar::default()
            }),
            Err(e) => {
                warn!(category, "sidecar read failed: {e}");
                EmbeddingSidecar::default()
            }
        }
    }

    fn save(&self, category: &str, records: Vec<EmbeddingRecord>) -> Result<(), MemoryError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| MemoryError::store(category.to_string(), e))?;
        let sidecar = EmbeddingSidecar {
            category: category.to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            total_embeddings: records.len(),
            embeddings: records,
        };
        let text = serde_json::to_string_pretty(&sidecar)?;
        std::fs::write(self.sidecar_path(category), text)
            .map_err(|e| MemoryError::store(category.to_string(), e))
    }

    /// 为新条目批量生成嵌入并追加入侧文件；item_id 由当前记录数顺延。
    /// 单条嵌入失败记日志跳过；返回实际追加条数。
    pub async fn append_records(
        &self,
        category: &str,
        character: &str,
        items: &[MemoryItem],
        embedder: &dyn EmbeddingProvider,
    ) -> Result<usize, MemoryError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut records = self.load(category).embeddings;
        let mut appended = 0;

        for item in items {
            if item.content.trim().is_empty() {
                continue;
            }
            let embedding = match embedder.embed(&item.content).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(memory_id = %item.memory_id, "embedding failed, item skipped: {e}");
                    continue;
                }
            };

            let item_id = format!("{character}_{category}_item_{}", records.len());
            records.push(EmbeddingRecord {
                item_id,
                memory_id: item.memory_id.clone(),
                text: item.content.clone(),
                full_line: encode(item),
                embedding,
                line_number: records.len() + 1,
                metadata: RecordMetadata {
                    character: character.to_string(),
                    category: category.to_string(),
                    length: item.content.len(),
                    mentioned_at: item.mentioned_at.clone(),
                    timestamp: chrono::Local::now().to_rfc3339(),
                },
            });
            appended += 1;
        }

        self.save(category, records)?;
        debug!(category, appended, "embeddings appended");
        Ok(appended)
    }

    /// 线性扫描给定分类的全部记录，返回对 query 向量的原始相似度（不过滤、不排序）
    pub fn scan(&self, categories: &[String], query: &[f32]) -> Vec<ScoredRecord> {
        let mut candidates = Vec::new();
        for category in categories {
            for record in self.load(category).embeddings {
                let similarity = cosine_similarity(query, &record.embedding);
                candidates.push(ScoredRecord {
                    memory_id: record.memory_id,
                    item_id: record.item_id,
                    text: record.text,
                    full_line: record.full_line,
                    category: category.clone(),
                    line_number: record.line_number,
                    similarity,
                    metadata: record.metadata,
                });
            }
        }
        candidates
    }

    /// 目录下所有侧文件对应的分类名
    pub fn categories_with_sidecars(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(stem) = name.strip_suffix("_embeddings.json") {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }
}
