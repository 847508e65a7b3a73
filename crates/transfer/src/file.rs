//! Handles to already-selected files.

use std::fmt;
use std::future::Future;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Boxed future returned by [`FileSource::read_range`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Bytes>> + Send + 'a>>;

/// Byte provider behind a [`PickedFile`].
///
/// Implemented by the host for whatever storage backs the selection.
pub trait FileSource: Send + Sync {
    /// Reads `range` (end-exclusive). Ranges past the end are an error.
    fn read_range(&self, range: Range<u64>) -> ReadFuture<'_>;
}

/// In-memory file contents.
#[derive(Debug, Clone)]
pub struct MemorySource(Bytes);

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }
}

impl FileSource for MemorySource {
    fn read_range(&self, range: Range<u64>) -> ReadFuture<'_> {
        let len = self.0.len() as u64;
        let result = if range.start > range.end || range.end > len {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {range:?} outside of {len} bytes"),
            ))
        } else {
            Ok(self.0.slice(range.start as usize..range.end as usize))
        };
        Box::pin(async move { result })
    }
}

/// File on the local filesystem, read lazily one range at a time.
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
}

impl PathSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for PathSource {
    fn read_range(&self, range: Range<u64>) -> ReadFuture<'_> {
        Box::pin(async move {
            let len = range
                .end
                .checked_sub(range.start)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "inverted range"))?;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(io::SeekFrom::Start(range.start)).await?;
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }
}

/// An already-resolved file: identity, metadata and a byte source.
///
/// Cheap to clone; clones share the same source.
#[derive(Clone)]
pub struct PickedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    source: Arc<dyn FileSource>,
}

impl PickedFile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        source: Arc<dyn FileSource>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            source,
        }
    }

    /// Wraps an in-memory buffer. The MIME type is guessed from `name`.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime_type = guess_mime(&name);
        Self::new(
            new_file_id(),
            name,
            data.len() as u64,
            mime_type,
            Arc::new(MemorySource::new(data)),
        )
    }

    /// Stats `path` and wraps it. Bytes are read only when requested.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = guess_mime(&name);
        Ok(Self::new(
            new_file_id(),
            name,
            metadata.len(),
            mime_type,
            Arc::new(PathSource::new(path)),
        ))
    }

    /// Reads `range` of the file.
    pub async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        self.source.read_range(range).await
    }

    /// Reads the whole file.
    pub async fn read_all(&self) -> io::Result<Bytes> {
        self.source.read_range(0..self.size).await
    }

    /// Whether both handles share the same byte source.
    pub fn same_source(&self, other: &PickedFile) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }
}

impl fmt::Debug for PickedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickedFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn new_file_id() -> String {
    format!("picked_{}", uuid::Uuid::new_v4().simple())
}
