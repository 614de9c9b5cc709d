//! File-system collaborator.
//!
//! The engine consumes [`FileSystem`] for output/temp cleaning, written
//! file tracking, and temp-file-backed string content. [`LocalFileSystem`]
//! is the disk-backed implementation; [`MemoryFileSystem`] backs tests and
//! engines that never touch disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::documents::ContentProvider;

/// Minimal file-system surface the engine needs.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Root every output-relative path resolves against.
    fn output_path(&self) -> &Path;

    /// Scratch directory, wiped on every execution.
    fn temp_path(&self) -> &Path;

    async fn write_file(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()>;

    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()>;

    /// Remove a directory's contents, leaving (or recreating) the empty
    /// directory itself.
    async fn clean_directory(&self, path: &Path) -> anyhow::Result<()>;

    /// Enumerate files under a directory, recursively.
    async fn list_files(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>>;
}

/// Disk-backed [`FileSystem`] on tokio's fs.
pub struct LocalFileSystem {
    output: PathBuf,
    temp: PathBuf,
}

impl LocalFileSystem {
    pub fn new(output: impl Into<PathBuf>, temp: impl Into<PathBuf>) -> Self {
        Self { output: output.into(), temp: temp.into() }
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn output_path(&self) -> &Path {
        &self.output
    }

    fn temp_path(&self) -> &Path {
        &self.temp
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting {}", path.display())),
        }
    }

    async fn clean_directory(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("cleaning {}", path.display())),
        }
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("recreating {}", path.display()))
    }

    async fn list_files(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
            };
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                } else {
                    files.push(entry_path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

/// In-memory [`FileSystem`]; the default when an engine is built without
/// one.
pub struct MemoryFileSystem {
    output: PathBuf,
    temp: PathBuf,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            output: PathBuf::from("/output"),
            temp: PathBuf::from("/temp"),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    fn output_path(&self) -> &Path {
        &self.output
    }

    fn temp_path(&self) -> &Path {
        &self.temp
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        self.files.lock().insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .with_context(|| format!("no such file {}", path.display()))
    }

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        self.files.lock().remove(path);
        Ok(())
    }

    async fn clean_directory(&self, path: &Path) -> anyhow::Result<()> {
        self.files.lock().retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn list_files(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .files
            .lock()
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Wrapper handed to module contexts: forwards to the engine's file
/// system and records every output write so `CleanMode::SelfClean` and
/// disposal can delete exactly those files later.
#[derive(Clone)]
pub(crate) struct TrackedFileSystem {
    fs: Arc<dyn FileSystem>,
    written: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TrackedFileSystem {
    pub(crate) fn new(fs: Arc<dyn FileSystem>, written: Arc<Mutex<HashSet<PathBuf>>>) -> Self {
        Self { fs, written }
    }

    pub(crate) fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Write a file under the output directory and track it.
    pub(crate) async fn write_output(&self, relative: &Path, contents: &[u8]) -> anyhow::Result<()> {
        let path = self.fs.output_path().join(relative);
        self.fs.write_file(&path, contents).await?;
        self.written.lock().insert(path);
        Ok(())
    }

    /// Write a scratch file under the temp directory; temp files are not
    /// tracked, the whole directory is wiped per execution.
    pub(crate) async fn write_temp(&self, relative: &Path, contents: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.fs.temp_path().join(relative);
        self.fs.write_file(&path, contents).await?;
        Ok(path)
    }
}

/// Content provider backed by the engine's file system; used when
/// `use_string_content_files` routes string content through temp files.
pub(crate) struct FileSystemContent {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileSystemContent {
    pub(crate) fn new(fs: Arc<dyn FileSystem>, path: PathBuf) -> Self {
        Self { fs, path }
    }
}

#[async_trait]
impl ContentProvider for FileSystemContent {
    async fn read(&self) -> anyhow::Result<Vec<u8>> {
        self.fs.read_file(&self.path).await
    }
}
