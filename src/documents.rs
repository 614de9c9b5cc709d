//! Documents and document batches.
//!
//! A [`Document`] is an immutable value: optional source and destination
//! paths, an ordered metadata map, and an optional lazy content provider.
//! Documents are shared by reference; `with_*` methods produce a new
//! document rather than mutating in place. A [`Batch`] is the immutable
//! ordered sequence of documents passed between modules.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

/// Lazy content source attached to a document.
///
/// Concrete providers (files, HTTP bodies, generated strings) live outside
/// the engine; [`StringContent`] is the in-memory baseline.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Read the full content into memory.
    async fn read(&self) -> anyhow::Result<Vec<u8>>;
}

/// Memory-backed string content.
pub struct StringContent(pub String);

#[async_trait]
impl ContentProvider for StringContent {
    async fn read(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.clone().into_bytes())
    }
}

struct DocumentInner {
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    metadata: IndexMap<String, Value>,
    content: Option<Arc<dyn ContentProvider>>,
}

/// An immutable document.
///
/// Cloning shares the underlying value; identity (for caching) is by
/// reference, checked with [`Document::same_as`]. Content equality is not
/// defined.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                source: None,
                destination: None,
                metadata: IndexMap::new(),
                content: None,
            }),
        }
    }

    /// Returns a new document with the given source path.
    pub fn with_source(self, source: impl Into<PathBuf>) -> Self {
        let mut inner = self.clone_inner();
        inner.source = Some(source.into());
        Self { inner: Arc::new(inner) }
    }

    /// Returns a new document with the given destination path.
    pub fn with_destination(self, destination: impl Into<PathBuf>) -> Self {
        let mut inner = self.clone_inner();
        inner.destination = Some(destination.into());
        Self { inner: Arc::new(inner) }
    }

    /// Returns a new document with `key` set in its metadata.
    ///
    /// Keys keep their insertion order; setting an existing key replaces the
    /// value in place.
    pub fn with_metadata(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut inner = self.clone_inner();
        inner.metadata.insert(key.into(), value.into());
        Self { inner: Arc::new(inner) }
    }

    /// Returns a new document with the given content provider.
    pub fn with_content(self, content: Arc<dyn ContentProvider>) -> Self {
        let mut inner = self.clone_inner();
        inner.content = Some(content);
        Self { inner: Arc::new(inner) }
    }

    /// Returns a new document with string content.
    pub fn with_string_content(self, content: impl Into<String>) -> Self {
        self.with_content(Arc::new(StringContent(content.into())))
    }

    fn clone_inner(&self) -> DocumentInner {
        DocumentInner {
            source: self.inner.source.clone(),
            destination: self.inner.destination.clone(),
            metadata: self.inner.metadata.clone(),
            content: self.inner.content.clone(),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.inner.source.as_deref()
    }

    pub fn destination(&self) -> Option<&Path> {
        self.inner.destination.as_deref()
    }

    pub fn metadata(&self) -> &IndexMap<String, Value> {
        &self.inner.metadata
    }

    /// Look up a single metadata value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.metadata.get(key)
    }

    pub fn content(&self) -> Option<&Arc<dyn ContentProvider>> {
        self.inner.content.as_ref()
    }

    /// Read the document content, or an empty buffer when no provider is
    /// attached.
    pub async fn read_content(&self) -> anyhow::Result<Vec<u8>> {
        match &self.inner.content {
            Some(provider) => provider.read().await,
            None => Ok(Vec::new()),
        }
    }

    /// Reference identity check.
    pub fn same_as(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("source", &self.inner.source)
            .field("destination", &self.inner.destination)
            .field("metadata", &self.inner.metadata)
            .field("has_content", &self.inner.content.is_some())
            .finish()
    }
}

/// An immutable ordered sequence of documents.
///
/// Batches are passed between modules by cheap handle clone; concatenation
/// preserves order.
#[derive(Clone)]
pub struct Batch {
    docs: Arc<[Document]>,
}

impl Default for Batch {
    fn default() -> Self {
        Self { docs: Arc::from(Vec::new()) }
    }
}

impl Batch {
    /// The distinguished empty batch.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(doc: Document) -> Self {
        Self { docs: Arc::from(vec![doc]) }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Document> {
        self.docs.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.docs.iter()
    }

    /// Order-preserving concatenation: all of `self`, then all of `other`.
    pub fn concat(&self, other: &Batch) -> Batch {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        self.iter().chain(other.iter()).cloned().collect()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch").field("len", &self.len()).finish()
    }
}

impl From<Vec<Document>> for Batch {
    fn from(docs: Vec<Document>) -> Self {
        Self { docs: Arc::from(docs) }
    }
}

impl FromIterator<Document> for Batch {
    fn from_iter<T: IntoIterator<Item = Document>>(iter: T) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_metadata_preserves_insertion_order() {
        let doc = Document::new()
            .with_metadata("title", "hello")
            .with_metadata("draft", true)
            .with_metadata("order", 3);

        let keys: Vec<&str> = doc.metadata().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "draft", "order"]);
        assert_eq!(doc.get("draft"), Some(&Value::Bool(true)));
    }

    #[test]
    fn documents_have_reference_identity() {
        let a = Document::new().with_destination("a.txt");
        let b = a.clone();
        let c = Document::new().with_destination("a.txt");

        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn with_methods_do_not_mutate_the_original() {
        let a = Document::new().with_metadata("k", 1);
        let b = a.clone().with_metadata("k", 2);

        assert_eq!(a.get("k"), Some(&Value::from(1)));
        assert_eq!(b.get("k"), Some(&Value::from(2)));
    }

    #[test]
    fn batch_concat_preserves_order() {
        let first: Batch = vec![
            Document::new().with_destination("1"),
            Document::new().with_destination("2"),
        ]
        .into();
        let second = Batch::single(Document::new().with_destination("3"));

        let combined = first.concat(&second);
        let dests: Vec<_> = combined
            .iter()
            .map(|d| d.destination().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(dests, vec!["1", "2", "3"]);
    }

    #[test]
    fn concat_with_empty_is_cheap_share() {
        let batch = Batch::single(Document::new());
        let combined = batch.concat(&Batch::empty());
        assert_eq!(combined.len(), 1);
        assert!(combined.get(0).unwrap().same_as(batch.get(0).unwrap()));
    }

    #[tokio::test]
    async fn read_content_defaults_to_empty() {
        let doc = Document::new();
        assert!(doc.read_content().await.unwrap().is_empty());

        let doc = doc.with_string_content("body");
        assert_eq!(doc.read_content().await.unwrap(), b"body");
    }
}
