use crate::{
    core::source::{Entry, EntryStore},
    err,
    error::IngestError,
};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory hierarchy of containers and leaves, addressed by `/` separated paths.
///
/// Containers are implied by the paths of the leaves they hold. Failures can be
/// injected per container or leaf to simulate an unreliable backing store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntryStore {
    containers: BTreeSet<String>,
    leaves: BTreeMap<String, Vec<u8>>,
    broken: BTreeSet<String>,
}

impl MemoryEntryStore {
    pub fn new(root: &str) -> Self {
        Self {
            containers: BTreeSet::from([root.to_string()]),
            ..Default::default()
        }
    }

    pub fn with_leaf(self, path: &str, content: &str) -> Self {
        self.with_leaf_bytes(path, content.as_bytes().to_vec())
    }

    pub fn with_leaf_bytes(mut self, path: &str, content: Vec<u8>) -> Self {
        let mut parent = path;
        while let Some((container, _)) = parent.rsplit_once('/') {
            self.containers.insert(container.to_string());
            parent = container;
        }
        self.leaves.insert(path.to_string(), content);
        self
    }

    /// Listing `path` will fail.
    pub fn with_broken_container(mut self, path: &str) -> Self {
        self.broken.insert(path.to_string());
        self
    }

    /// Reading `path` will fail.
    pub fn with_broken_leaf(mut self, path: &str) -> Self {
        self.broken.insert(path.to_string());
        self
    }
}

fn split(id: &str) -> Option<(&str, &str)> {
    id.rsplit_once('/')
}

#[async_trait::async_trait]
impl EntryStore for MemoryEntryStore {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, container: &str) -> Result<Vec<Entry>, IngestError> {
        if self.broken.contains(container) {
            return err!(Backend, "permission denied: {container}");
        }

        if !self.containers.contains(container) {
            return err!(Backend, "no such container: {container}");
        }

        let containers = self
            .containers
            .iter()
            .filter_map(|id| match split(id) {
                Some((parent, name)) if parent == container => Some(Entry::container(name, id)),
                _ => None,
            });

        let leaves = self.leaves.keys().filter_map(|id| match split(id) {
            Some((parent, name)) if parent == container => Some(Entry::leaf(name, id)),
            _ => None,
        });

        Ok(containers.chain(leaves).collect())
    }

    async fn read(&self, leaf: &str) -> Result<Vec<u8>, IngestError> {
        if self.broken.contains(leaf) {
            return err!(Backend, "permission denied: {leaf}");
        }

        match self.leaves.get(leaf) {
            Some(content) => Ok(content.clone()),
            None => err!(Backend, "no such leaf: {leaf}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::EntryKind;

    #[tokio::test]
    async fn containers_are_implied_by_leaves() {
        let store = MemoryEntryStore::new("root")
            .with_leaf("root/a.txt", "a")
            .with_leaf("root/sub/deeper/b.txt", "b");

        let root = store.list("root").await.unwrap();
        assert_eq!(2, root.len());
        assert!(root.contains(&Entry::container("sub", "root/sub")));
        assert!(root.contains(&Entry::leaf("a.txt", "root/a.txt")));

        let sub = store.list("root/sub").await.unwrap();
        assert_eq!(vec![Entry::container("deeper", "root/sub/deeper")], sub);
        assert_eq!(EntryKind::Container, sub[0].kind);

        assert_eq!(b"b".to_vec(), store.read("root/sub/deeper/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryEntryStore::new("root")
            .with_leaf("root/a.txt", "a")
            .with_broken_leaf("root/a.txt")
            .with_broken_container("root");

        assert!(store.list("root").await.is_err());
        assert!(store.read("root/a.txt").await.is_err());
        assert!(store.list("missing").await.is_err());
    }
}
