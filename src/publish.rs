//! Publish sinks: where rendered bytes end up.
//!
//! A sink stores bytes under slash-separated relative paths and can read
//! them back. The derivation layer publishes through [`publish_once`],
//! which skips the write when identical bytes are already present, so
//! publishing is idempotent and the order in which a source and its
//! derivations are published does not matter.
//!
//! [`FsSink`] writes under a root directory through a temporary file and a
//! rename, so a reader never sees a half-written image. [`MemorySink`]
//! keeps everything in a map and counts writes; tests use it to check that
//! nothing is published twice.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub trait PublishSink: Send + Sync {
    /// Store `bytes` at `path`, replacing anything there.
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()>;

    /// Read back a stored file; `None` when nothing is stored at `path`.
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// Byte length of a stored file, if present.
    fn size(&self, path: &str) -> Option<u64>;
}

/// Write `bytes` unless the sink already holds exactly these bytes.
///
/// Returns whether a write happened.
pub fn publish_once(sink: &dyn PublishSink, path: &str, bytes: &[u8]) -> io::Result<bool> {
    if sink.size(path) == Some(bytes.len() as u64)
        && sink.read(path)?.as_deref() == Some(bytes)
    {
        return Ok(false);
    }
    sink.write(path, bytes)?;
    Ok(true)
}

/// Reject absolute paths and `..` so every write stays under the root.
fn checked(path: &str) -> io::Result<&Path> {
    let p = Path::new(path);
    let ok = !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(p)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("publish path must be relative: {path}"),
        ))
    }
}

/// Sink writing under a directory on disk.
#[derive(Debug)]
pub struct FsSink {
    root: PathBuf,
    counter: AtomicU64,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a published path.
    pub fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(checked(path)?))
    }
}

impl PublishSink for FsSink {
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let dest = self.resolve(path)?;
        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{file_name}.{}.{n}.tmp", std::process::id()));

        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &dest).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(path)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn size(&self, path: &str) -> Option<u64> {
        let meta = fs::metadata(self.resolve(path).ok()?).ok()?;
        meta.is_file().then(|| meta.len())
    }
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<BTreeMap<String, Arc<[u8]>>>,
    writes: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<[u8]>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files().keys().cloned().collect()
    }

    pub fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        self.files().get(path).cloned()
    }

    /// Number of writes performed, including overwrites.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl PublishSink for MemorySink {
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        checked(path)?;
        self.files().insert(path.to_string(), bytes.into());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files().get(path).map(|b| b.to_vec()))
    }

    fn size(&self, path: &str) -> Option<u64> {
        self.files().get(path).map(|b| b.len() as u64)
    }
}
