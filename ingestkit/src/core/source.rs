use super::{
    cancel::CancelToken,
    chunk::{split_records, Chunker},
    record::Record,
};
use crate::{
    err,
    error::{ErrorKind, IngestError},
};
use futures_util::{future::BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Encoding assumed when none is given. Advisory only, payloads are always
/// decoded as UTF-8 (lossily).
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Entries whose name starts with this prefix are skipped by default.
pub const DEFAULT_EXCLUDED_PREFIX: &str = "Modelfile";

/// Anything that produces records.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Produce all records of this source. The cancellation signal is checked
    /// before every unit of work.
    async fn load(&self, cancel: &CancelToken) -> Result<Vec<Record>, IngestError>;

    /// Load and split the resulting records with `chunker`.
    /// A chunker failure aborts the whole batch.
    async fn load_and_split(
        &self,
        cancel: &CancelToken,
        chunker: &dyn Chunker,
    ) -> Result<Vec<Record>, IngestError> {
        let records = self.load(cancel).await?;
        split_records(chunker, records)
    }
}

/// Whether an entry holds further entries or terminal content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Container,
    Leaf,
}

/// A child of a container, as listed by an [EntryStore].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The entry name relative to its container.
    pub name: String,

    /// The fully resolved identifier of the entry, e.g. its path or URI.
    pub id: String,

    pub kind: EntryKind,
}

impl Entry {
    pub fn container(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: EntryKind::Container,
        }
    }

    pub fn leaf(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: EntryKind::Leaf,
        }
    }
}

/// A hierarchical byte store, e.g. a filesystem, a bucket or an API.
#[async_trait::async_trait]
pub trait EntryStore: Send + Sync {
    fn id(&self) -> &'static str;

    /// List the direct children of `container`.
    ///
    /// * `container`: Resolved identifier of the container.
    async fn list(&self, container: &str) -> Result<Vec<Entry>, IngestError>;

    /// Read the contents of `leaf`.
    ///
    /// * `leaf`: Resolved identifier of the leaf.
    async fn read(&self, leaf: &str) -> Result<Vec<u8>, IngestError>;
}

/// Receives traversal events from a [DirectoryLoader].
pub trait LoadObserver: Send + Sync {
    fn leaf(&self, _id: &str) {}

    fn skipped(&self, _entry: &Entry) {}

    /// A nested container failed and contributes no records.
    fn container_failed(&self, _id: &str, _error: &IngestError) {}
}

/// Reports traversal events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn leaf(&self, id: &str) {
        debug!("Processing file {id}");
    }

    fn skipped(&self, entry: &Entry) {
        debug!("Skipping reserved entry {}", entry.id);
    }

    fn container_failed(&self, id: &str, error: &IngestError) {
        warn!("Cannot load sub directory {id}: {error}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {}

/// Recursively loads every leaf below `root` into one record each.
///
/// Nested containers are walked depth first. A nested container that cannot
/// be listed contributes no records and does not fail the load, while a leaf
/// that cannot be read aborts the whole load. Failing to list the root itself
/// is an error.
pub struct DirectoryLoader<S> {
    store: S,
    root: String,
    encoding: String,
    excluded_prefixes: Vec<String>,
    observer: Arc<dyn LoadObserver>,
}

impl<S> DirectoryLoader<S>
where
    S: EntryStore,
{
    pub fn new(store: S, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
            encoding: DEFAULT_ENCODING.to_string(),
            excluded_prefixes: vec![DEFAULT_EXCLUDED_PREFIX.to_string()],
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_encoding(mut self, encoding: &str) -> Self {
        self.encoding = encoding.to_string();
        self
    }

    /// Skip entries starting with `prefix` in addition to the defaults.
    pub fn with_excluded_prefix(mut self, prefix: &str) -> Self {
        self.excluded_prefixes.push(prefix.to_string());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    fn load_container<'a>(
        &'a self,
        id: &'a str,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<Vec<Record>, IngestError>> {
        async move {
            let entries = match self.store.list(id).await {
                Ok(entries) => entries,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => return err!(ContainerTraversal, "{id}: {e}"),
            };

            let mut records = Vec::with_capacity(entries.len());

            for entry in entries {
                cancel.check()?;

                if self.is_excluded(&entry.name) {
                    self.observer.skipped(&entry);
                    continue;
                }

                match entry.kind {
                    EntryKind::Container => match self.load_container(&entry.id, cancel).await {
                        Ok(nested) => records.extend(nested),
                        Err(e) if e.kind() == ErrorKind::ContainerTraversal => {
                            self.observer.container_failed(&entry.id, &e);
                        }
                        Err(e) => return Err(e),
                    },
                    EntryKind::Leaf => {
                        self.observer.leaf(&entry.id);

                        let content = match self.store.read(&entry.id).await {
                            Ok(content) => content,
                            Err(e) if e.is_cancelled() => return Err(e),
                            Err(e) => return err!(LeafRead, "{}: {e}", entry.id),
                        };

                        let payload = String::from_utf8_lossy(&content).into_owned();
                        records.push(Record::new(payload, entry.id));
                    }
                }
            }

            Ok(records)
        }
        .boxed()
    }
}

#[async_trait::async_trait]
impl<S> Source for DirectoryLoader<S>
where
    S: EntryStore,
{
    async fn load(&self, cancel: &CancelToken) -> Result<Vec<Record>, IngestError> {
        cancel.check()?;
        self.load_container(&self.root, cancel).await
    }
}

/// A source holding a single in-memory text.
#[derive(Debug, Clone)]
pub struct TextSource {
    name: String,
    content: String,
}

impl TextSource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[async_trait::async_trait]
impl Source for TextSource {
    async fn load(&self, cancel: &CancelToken) -> Result<Vec<Record>, IngestError> {
        cancel.check()?;
        Ok(vec![Record::new(self.content.clone(), self.name.clone())])
    }
}
