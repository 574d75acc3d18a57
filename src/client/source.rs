//! Where upload bytes come from.

use crate::models::upload::UploadKind;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[async_trait]
pub trait UploadSource: Send + Sync {
    fn file_name(&self) -> &str;
    fn content_type(&self) -> &str;
    fn size(&self) -> u64;

    /// Bytes `[start, end)`.
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes>;
}

/// Content type implied by a file extension, for the kinds we accept.
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(content_type)
}

/// A file on disk, read one part at a time.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    file_name: String,
    content_type: String,
    size: u64,
}

impl FileSource {
    /// Content type precedence: `content_type`, then the extension, then the
    /// kind's default.
    pub async fn open(
        path: impl AsRef<Path>,
        content_type: Option<String>,
        kind: UploadKind,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let content_type = content_type
            .or_else(|| guess_content_type(&path).map(str::to_string))
            .unwrap_or_else(|| kind.default_content_type().to_string());

        Ok(Self {
            path,
            file_name,
            content_type,
            size: metadata.len(),
        })
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; end.saturating_sub(start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// In-memory bytes, for tests and embedding.
#[derive(Debug, Clone)]
pub struct BytesSource {
    file_name: String,
    content_type: String,
    bytes: Bytes,
}

impl BytesSource {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        let len = self.bytes.len() as u64;
        if start > end || end > len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {}..{} outside {} bytes", start, end, len),
            ));
        }
        Ok(self.bytes.slice(start as usize..end as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn guesses_from_extension() {
        assert_eq!(guess_content_type(Path::new("a/Clip.MOV")), Some("video/quicktime"));
        assert_eq!(guess_content_type(Path::new("thumb.jpeg")), Some("image/jpeg"));
        assert_eq!(guess_content_type(Path::new("notes.txt")), None);
        assert_eq!(guess_content_type(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn file_source_reads_ranges() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();

        let source = FileSource::open(file.path(), None, UploadKind::Video)
            .await
            .unwrap();
        assert_eq!(source.size(), 10);
        assert_eq!(source.content_type(), "video/mp4");
        assert_eq!(&source.read_range(3, 7).await.unwrap()[..], b"3456");
        assert!(source.read_range(8, 12).await.is_err());
    }

    #[tokio::test]
    async fn bytes_source_bounds_checks() {
        let source = BytesSource::new("a.png", "image/png", &b"abcdef"[..]);
        assert_eq!(&source.read_range(2, 4).await.unwrap()[..], b"cd");
        assert!(source.read_range(4, 9).await.is_err());
    }
}
