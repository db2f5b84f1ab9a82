//! Response body destinations.

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Where the response body goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Buffer,
    File,
}

/// Sink selection plus the file path for [`SinkKind::File`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: Option<PathBuf>,
}

impl SinkConfig {
    /// Validate a kind/path combination.
    pub fn new(kind: SinkKind, path: Option<PathBuf>) -> Result<Self> {
        let config = Self { kind, path };
        config.validate()?;
        Ok(config)
    }

    pub fn buffer() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SinkKind::File,
            path: Some(path.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.kind, &self.path) {
            (SinkKind::File, None) => Err(Error::MissingFilePath),
            (SinkKind::File, Some(path)) if path.as_os_str().is_empty() => Err(Error::MissingFilePath),
            (SinkKind::Buffer, Some(path)) => Err(Error::UnexpectedFilePath(path.clone())),
            _ => Ok(()),
        }
    }

    /// Create the destination. A file sink truncates any existing file.
    pub fn open(&self) -> Result<SinkWriter> {
        self.validate()?;
        match (self.kind, &self.path) {
            (SinkKind::File, Some(path)) => {
                let file = File::create(path)?;
                debug!(path = %path.display(), "response sink file created");
                Ok(SinkWriter::File {
                    file: BufWriter::new(file),
                    path: path.clone(),
                })
            }
            _ => Ok(SinkWriter::Buffer(Vec::new())),
        }
    }
}

/// An open sink receiving the response body.
#[derive(Debug)]
pub enum SinkWriter {
    Buffer(Vec<u8>),
    File { file: BufWriter<File>, path: PathBuf },
}

/// What a closed sink holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutput {
    /// In-memory body; empty for file sinks.
    pub body: Bytes,
    /// File the body was written to.
    pub path: Option<PathBuf>,
    /// Bytes stored, taken from the file's metadata for file sinks.
    pub size: u64,
}

impl SinkWriter {
    /// Close the sink and report what it holds.
    pub fn finish(self) -> Result<SinkOutput> {
        match self {
            SinkWriter::Buffer(buf) => Ok(SinkOutput {
                size: buf.len() as u64,
                body: Bytes::from(buf),
                path: None,
            }),
            SinkWriter::File { file, path } => {
                let file = file.into_inner().map_err(|err| err.into_error())?;
                file.sync_all()?;
                drop(file);
                let size = path.metadata()?.len();
                debug!(path = %path.display(), size, "response sink file closed");
                Ok(SinkOutput {
                    body: Bytes::new(),
                    path: Some(path),
                    size,
                })
            }
        }
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Buffer(b) => b.write(buf),
            SinkWriter::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Buffer(_) => Ok(()),
            SinkWriter::File { file, .. } => file.flush(),
        }
    }
}

/// Copy `reader` into `writer` using a buffer of `chunk_size` bytes.
pub(crate) fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind as Kind;
    use std::io::Cursor;

    #[test]
    fn file_sink_requires_path() {
        let err = SinkConfig::new(SinkKind::File, None).unwrap_err();
        assert!(matches!(err, Error::MissingFilePath));
        assert_eq!(err.kind(), Kind::Configuration);
    }

    #[test]
    fn buffer_sink_rejects_path() {
        let err = SinkConfig::new(SinkKind::Buffer, Some("x.bin".into())).unwrap_err();
        assert!(matches!(err, Error::UnexpectedFilePath(_)));
    }

    #[test]
    fn buffer_sink_keeps_body_in_memory() {
        let mut sink = SinkConfig::buffer().open().unwrap();
        sink.write_all(b"payload").unwrap();
        let out = sink.finish().unwrap();
        assert_eq!(&out.body[..], b"payload");
        assert_eq!(out.size, 7);
        assert!(out.path.is_none());
    }

    #[test]
    fn file_sink_truncates_and_reports_size_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![b'x'; 1000]).unwrap();

        let mut sink = SinkConfig::file(&path).open().unwrap();
        sink.write_all(b"short").unwrap();
        let out = sink.finish().unwrap();

        assert!(out.body.is_empty());
        assert_eq!(out.size, 5);
        assert_eq!(out.path.as_deref(), Some(path.as_path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn copy_chunked_moves_everything() {
        let data = vec![3u8; 10_001];
        let mut out = Vec::new();
        let copied = copy_chunked(&mut Cursor::new(&data), &mut out, 64).unwrap();
        assert_eq!(copied, 10_001);
        assert_eq!(out, data);
    }
}
