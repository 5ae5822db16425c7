//! 存储层：行编解码、分类注册表、分类文件存储、嵌入索引

pub mod codec;
pub mod embeddings;
pub mod files;
pub mod registry;

pub use codec::{decode, decode_all, encode, encode_all, generate_memory_id, MemoryItem};
pub use embeddings::{
    cosine_similarity, EmbeddingIndex, EmbeddingRecord, EmbeddingSidecar, RecordMetadata,
    ScoredRecord,
};
pub use files::{CategoryStore, FileInfo, IdentityLocks};
pub use registry::{normalize_cluster_name, CategoryRegistry, CategoryScope, CATEGORY_EXTENSION};
