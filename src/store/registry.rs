//! 分类注册表
//!
//! basic：来自配置的固定分类表（name -> 声明）；cluster：扫描用户目录派生的主题分类
//! （*.md 且文件名主干不在 basic 集合内）。cluster 名一律小写、下划线转空格展示、
//! 写盘时空格转下划线。注册表是显式服务，调用方不直接做目录列举。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use crate::config::CategorySpec;

/// 分类文件扩展名
pub const CATEGORY_EXTENSION: &str = ".md";

/// 分类查询范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CategoryScope {
    Basic,
    Cluster,
    All,
}

/// 将 cluster 名规范化：小写（展示名，可含空格）
pub fn normalize_cluster_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// cluster 展示名 -> 文件名（空格转下划线）
fn cluster_filename(name: &str) -> String {
    format!("{}{}", name.replace(' ', "_"), CATEGORY_EXTENSION)
}

/// 分类注册表：basic 固定表 + cluster 动态表
pub struct CategoryRegistry {
    basic: BTreeMap<String, CategorySpec>,
    cluster: RwLock<BTreeMap<String, String>>,
}

impl CategoryRegistry {
    pub fn new(specs: &[CategorySpec]) -> Self {
        let basic = specs
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();
        Self {
            basic,
            cluster: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_basic(&self, category: &str) -> bool {
        self.basic.contains_key(category)
    }

    pub fn basic_spec(&self, category: &str) -> Option<&CategorySpec> {
        self.basic.get(category)
    }

    /// 按名称排序的 basic 分类名（不按文件存在性过滤）
    pub fn basic_names(&self) -> Vec<String> {
        self.basic.keys().cloned().collect()
    }

    /// 当前已知的 cluster 分类名（按名称排序）
    pub fn cluster_names(&self) -> Vec<String> {
        self.cluster.read().unwrap().keys().cloned().collect()
    }

    pub fn names(&self, scope: CategoryScope) -> Vec<String> {
        match scope {
            CategoryScope::Basic => self.basic_names(),
            CategoryScope::Cluster => self.cluster_names(),
            CategoryScope::All => {
                let mut all = self.basic_names();
                all.extend(self.cluster_names());
                all.sort();
                all.dedup();
                all
            }
        }
    }

    /// 分类 -> 文件名；未注册的名字按 cluster 规则落盘
    pub fn filename_for(&self, category: &str) -> String {
        if let Some(spec) = self.basic.get(category) {
            return spec.filename();
        }
        if let Some(filename) = self.cluster.read().unwrap().get(category) {
            return filename.clone();
        }
        cluster_filename(category)
    }

    /// 注册一个 cluster 分类（展示名），返回其文件名
    pub fn register_cluster(&self, name: &str) -> String {
        let name = normalize_cluster_name(name);
        let filename = cluster_filename(&name);
        self.cluster
            .write()
            .unwrap()
            .insert(name, filename.clone());
        filename
    }

    /// 重新扫描用户目录派生 cluster 表（文件名主干不在 basic 集合内的 *.md）
    pub fn refresh_clusters(&self, user_dir: &Path) {
        let mut derived = BTreeMap::new();
        let basic_stems: Vec<String> = self
            .basic
            .values()
            .map(|s| s.filename().trim_end_matches(CATEGORY_EXTENSION).to_string())
            .collect();

        if let Ok(entries) = std::fs::read_dir(user_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(stem) = name.strip_suffix(CATEGORY_EXTENSION) else {
                    continue;
                };
                if basic_stems.iter().any(|b| b == stem) {
                    continue;
                }
                derived.insert(stem.replace('_', " "), name.to_string());
            }
        }

        *self.cluster.write().unwrap() = derived;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::new(&AppConfig::default().memory.categories)
    }

    #[test]
    fn test_basic_names_sorted_from_config() {
        let reg = registry();
        assert_eq!(reg.basic_names(), vec!["activity", "event", "profile"]);
        assert!(reg.is_basic("profile"));
        assert!(!reg.is_basic("hiking"));
    }

    #[test]
    fn test_filename_for_unknown_category_uses_cluster_rules() {
        let reg = registry();
        assert_eq!(reg.filename_for("profile"), "profile.md");
        assert_eq!(reg.filename_for("summer events"), "summer_events.md");
    }

    #[test]
    fn test_register_cluster_normalizes() {
        let reg = registry();
        let filename = reg.register_cluster("Summer Events");
        assert_eq!(filename, "summer_events.md");
        assert_eq!(reg.cluster_names(), vec!["summer events"]);
    }

    #[test]
    fn test_refresh_clusters_derives_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("profile.md"), "").unwrap();
        std::fs::write(dir.path().join("hiking.md"), "").unwrap();
        std::fs::write(dir.path().join("summer_events.md"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let reg = registry();
        reg.refresh_clusters(dir.path());
        assert_eq!(reg.cluster_names(), vec!["hiking", "summer events"]);
        assert_eq!(
            reg.names(CategoryScope::All),
            vec!["activity", "event", "hiking", "profile", "summer events"]
        );
    }

    #[test]
    fn test_refresh_clusters_missing_dir_yields_empty() {
        let reg = registry();
        reg.register_cluster("stale");
        reg.refresh_clusters(Path::new("/nonexistent/dir"));
        assert!(reg.cluster_names().is_empty());
    }
}
