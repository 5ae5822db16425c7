//! 分类文件存储
//!
//! 布局：`<root>/<agent_id>/<user_id>/<category>.md`，每行一个记忆条目。
//! read 对缺失文件返回空串；write 全量覆盖并按需建目录；append 为读-拼-写
//! （非原子，单进程假设，见 IdentityLocks）；delete 幂等。I/O 错误记日志并以
//! false / 空值上浮，不静默当成功。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error};

use crate::store::registry::{CategoryRegistry, CategoryScope};

/// 分类文件信息
#[derive(Clone, Debug, Serialize)]
pub struct FileInfo {
    pub exists: bool,
    pub file_size: u64,
    pub content_length: usize,
    pub lines: usize,
    pub file_path: String,
}

/// 某 (agent_id, user_id) 的分类文件存储；注册表共享
#[derive(Clone)]
pub struct CategoryStore {
    root: PathBuf,
    agent_id: String,
    user_id: String,
    registry: Arc<CategoryRegistry>,
}

impl CategoryStore {
    pub fn new(
        root: impl Into<PathBuf>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        registry: Arc<CategoryRegistry>,
    ) -> Self {
        let store = Self {
            root: root.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            registry,
        };
        store.registry.refresh_clusters(&store.user_dir());
        store
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<CategoryRegistry> {
        &self.registry
    }

    pub fn user_dir(&self) -> PathBuf {
        self.root.join(&self.agent_id).join(&self.user_id)
    }

    fn path_for(&self, category: &str) -> PathBuf {
        self.user_dir().join(self.registry.filename_for(category))
    }

    /// 读取分类内容；文件缺失返回空串
    pub fn read(&self, category: &str) -> String {
        let path = self.path_for(category);
        if !path.exists() {
            return String::new();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                error!(category, agent = %self.agent_id, user = %self.user_id, "read failed: {e}");
                String::new()
            }
        }
    }

    /// 全量覆盖写入；按需创建父目录
    pub fn write(&self, category: &str, content: &str) -> bool {
        let path = self.path_for(category);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(category, "create dir failed: {e}");
                return false;
            }
        }
        match std::fs::write(&path, content) {
            Ok(()) => {
                debug!(category, agent = %self.agent_id, user = %self.user_id, "written");
                true
            }
            Err(e) => {
                error!(category, agent = %self.agent_id, user = %self.user_id, "write failed: {e}");
                false
            }
        }
    }

    /// 追加一段内容（带换行拼接）。读-拼-写实现，对并发写同一分类不原子。
    pub fn append(&self, category: &str, content: &str) -> bool {
        let existing = self.read(category);
        let new_content = if existing.is_empty() {
            content.to_string()
        } else {
            format!("{existing}\n{content}")
        };
        self.write(category, &new_content)
    }

    /// 删除分类文件；缺失视为成功（幂等）
    pub fn delete(&self, category: &str) -> bool {
        let path = self.path_for(category);
        if !path.exists() {
            return true;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(category, agent = %self.agent_id, user = %self.user_id, "deleted");
                true
            }
            Err(e) => {
                error!(category, agent = %self.agent_id, user = %self.user_id, "delete failed: {e}");
                false
            }
        }
    }

    /// 列出分类名；cluster 先按当前目录重新派生（派生视图不长期缓存）
    pub fn list(&self, scope: CategoryScope) -> Vec<String> {
        if scope != CategoryScope::Basic {
            self.registry.refresh_clusters(&self.user_dir());
        }
        self.registry.names(scope)
    }

    /// 创建 cluster 分类：建空文件（若无）并注册；失败返回 false
    pub fn create_cluster(&self, name: &str) -> bool {
        let filename = self.registry.register_cluster(name);
        let path = self.user_dir().join(filename);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(cluster = name, "create dir failed: {e}");
                return false;
            }
        }
        if !path.exists() {
            if let Err(e) = std::fs::write(&path, "") {
                error!(cluster = name, "create cluster file failed: {e}");
                return false;
            }
        }
        true
    }

    /// 分类文件元信息（存在性、尺寸、行数）
    pub fn file_info(&self, category: &str) -> FileInfo {
        let path = self.path_for(category);
        if !path.exists() {
            return FileInfo {
                exists: false,
                file_size: 0,
                content_length: 0,
                lines: 0,
                file_path: path.display().to_string(),
            };
        }
        let content = self.read(category);
        let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        FileInfo {
            exists: true,
            file_size,
            content_length: content.len(),
            lines: content.lines().count(),
            file_path: path.display().to_string(),
        }
    }
}

/// 进程内按 (agent_id, user_id) 的建议锁：调用方可在一段操作序列期间持有，
/// 规避 append / 更新 / 链接回写这类读-改-写竞态。跨进程部署不在此覆盖范围。
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, agent_id: &str, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((agent_id.to_string(), user_id.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn store(root: &Path) -> CategoryStore {
        let registry = Arc::new(CategoryRegistry::new(&AppConfig::default().memory.categories));
        CategoryStore::new(root, "agent1", "user1", registry)
    }

    #[test]
    fn test_read_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert_eq!(s.read("profile"), "");
    }

    #[test]
    fn test_append_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.append("profile", "[a1][mentioned at 2024-01-15] First. []"));
        assert!(s.append("profile", "[b2][mentioned at 2024-01-15] Second. []"));
        let content = s.read("profile");
        assert!(content.starts_with("[a1]"));
        assert!(content.ends_with("Second. []"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_delete_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.delete("profile"));
        s.write("profile", "x");
        assert!(s.delete("profile"));
        assert!(s.delete("profile"));
    }

    #[test]
    fn test_list_cluster_is_derived_view() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.list(CategoryScope::Cluster).is_empty());

        assert!(s.create_cluster("hiking"));
        s.write("hiking", "[a1][mentioned at 2024-01-15] Alice hiked. []");
        assert_eq!(s.list(CategoryScope::Cluster), vec!["hiking"]);

        // 直接落盘的文件也能被派生出来
        std::fs::write(s.user_dir().join("summer_events.md"), "").unwrap();
        assert_eq!(s.list(CategoryScope::Cluster), vec!["hiking", "summer events"]);
    }

    #[test]
    fn test_file_info() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(!s.file_info("profile").exists);
        s.write("profile", "line one\nline two");
        let info = s.file_info("profile");
        assert!(info.exists);
        assert_eq!(info.lines, 2);
        assert_eq!(info.content_length, 17);
    }
}
