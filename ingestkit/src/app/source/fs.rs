use crate::{
    core::source::{Entry, EntryKind, EntryStore},
    error::IngestError,
    map_err,
};
use std::path::Path;
use tracing::trace;

/// Filesystem implementation of an [EntryStore]. Identifiers are paths.
///
/// Symbolic links are resolved when classifying entries. A link that cannot be
/// resolved is treated as a leaf, reading it will then fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEntryStore;

impl FsEntryStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EntryStore for FsEntryStore {
    fn id(&self) -> &'static str {
        "fs"
    }

    async fn list(&self, container: &str) -> Result<Vec<Entry>, IngestError> {
        trace!("Listing {container}");

        let mut dir = map_err!(tokio::fs::read_dir(container).await);
        let mut entries = vec![];

        while let Some(entry) = map_err!(dir.next_entry().await) {
            let file_type = map_err!(entry.file_type().await);

            let kind = if file_type.is_dir() {
                EntryKind::Container
            } else if file_type.is_symlink() {
                match tokio::fs::metadata(entry.path()).await {
                    Ok(meta) if meta.is_dir() => EntryKind::Container,
                    _ => EntryKind::Leaf,
                }
            } else {
                EntryKind::Leaf
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let id = Path::new(container).join(&name).display().to_string();

            entries.push(Entry { name, id, kind });
        }

        Ok(entries)
    }

    async fn read(&self, leaf: &str) -> Result<Vec<u8>, IngestError> {
        trace!("Reading {leaf}");
        Ok(map_err!(tokio::fs::read(leaf).await))
    }
}
