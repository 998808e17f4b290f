use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::scanner::CodeElement;

/// Scan results for one job, keyed by project path. Never persisted.
#[derive(Debug, Default)]
pub struct ResultCache {
    records: HashMap<PathBuf, Arc<Vec<CodeElement>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a scan result, replacing any earlier one for the same path.
    pub fn insert(&mut self, project: PathBuf, elements: Vec<CodeElement>) -> Option<Arc<Vec<CodeElement>>> {
        self.records.insert(project, Arc::new(elements))
    }

    pub fn get(&self, project: &Path) -> Option<Arc<Vec<CodeElement>>> {
        self.records.get(project).cloned()
    }

    pub fn contains(&self, project: &Path) -> bool {
        self.records.contains_key(project)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn projects(&self) -> Vec<PathBuf> {
        let mut projects: Vec<PathBuf> = self.records.keys().cloned().collect();
        projects.sort();
        projects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::testing::element;

    #[test]
    fn test_distinct_projects_get_distinct_entries() {
        let mut cache = ResultCache::new();
        cache.insert(PathBuf::from("/a"), vec![element("a.ts", "a")]);
        cache.insert(PathBuf::from("/b"), vec![element("b.ts", "b"), element("c.ts", "c")]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(Path::new("/a")).unwrap().len(), 1);
        assert_eq!(cache.get(Path::new("/b")).unwrap().len(), 2);
        assert_eq!(cache.projects(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_rescan_overwrites() {
        let mut cache = ResultCache::new();
        assert!(cache.insert(PathBuf::from("/a"), vec![]).is_none());
        let previous = cache.insert(PathBuf::from("/a"), vec![element("a.ts", "a")]);

        assert_eq!(previous.unwrap().len(), 0);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(Path::new("/a")));
    }

    #[test]
    fn test_missing_entry() {
        let cache = ResultCache::new();
        assert!(cache.is_empty());
        assert!(cache.get(Path::new("/nowhere")).is_none());
    }
}
