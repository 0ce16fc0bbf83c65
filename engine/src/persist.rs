//! Persistence backends.
//!
//! A backend stores one opaque blob: the serialized [`StoreSnapshot`]. The
//! Store is its only caller.
//!
//! [`StoreSnapshot`]: crate::StoreSnapshot

use crate::error::Result;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable storage for the whole store snapshot.
pub trait Persistence: Send + Sync {
    /// Read the last written blob, or `None` if nothing was ever written.
    fn read_all(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored blob.
    fn write_all(&self, bytes: &[u8]) -> Result<()>;
}

/// File-backed persistence.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Create a backend that stores its snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The snapshot location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling of the target with `.tmp` appended to the full file name.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persistence for FileBackend {
    fn read_all(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory persistence.
///
/// Clones share the same buffer, so a test can keep a handle and inspect
/// what the store flushed.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    blob: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-loaded with a blob.
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            blob: Arc::new(Mutex::new(Some(bytes.into()))),
        }
    }

    /// The current blob, if any.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.blob.lock().ok().and_then(|b| b.clone())
    }
}

impl Persistence for MemoryBackend {
    fn read_all(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut blob = self
            .blob
            .lock()
            .map_err(|_| crate::Error::Persistence("memory backend poisoned".into()))?;
        *blob = Some(bytes.to_vec());
        Ok(())
    }
}

impl<P: Persistence + ?Sized> Persistence for Arc<P> {
    fn read_all(&self) -> Result<Option<Vec<u8>>> {
        (**self).read_all()
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        (**self).write_all(bytes)
    }
}
