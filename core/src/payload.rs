//! Request payload sources.
//!
//! # Design
//! A `Payload` is a closed set of shapes, each with its own size probe. The
//! pipeline never passes a live stream across a redirect hop; it asks the
//! `PayloadSource` to open the payload again. Bytes and text re-derive a
//! cursor, files are reopened by path, seekable streams seek back to the
//! position they started from. A plain reader can only be opened once.

use std::fmt;
use std::fs::{File, Metadata};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};

/// A readable and seekable stream that can move to the upload thread.
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

/// Request body as supplied by the caller.
#[derive(Default)]
pub enum Payload {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    /// A file on disk, opened when the request is sent.
    File(PathBuf),
    /// A one-shot stream of unknown size.
    Reader(Box<dyn Read + Send>),
    /// A stream whose size is probed by seeking.
    Seekable(Box<dyn SeekRead>),
}

impl Payload {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Payload::File(path.into())
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Payload::Reader(Box::new(reader))
    }

    pub fn seekable(stream: impl Read + Seek + Send + 'static) -> Self {
        Payload::Seekable(Box::new(stream))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// Reject payloads that can never be sent, without reading them.
    pub fn check(&self) -> Result<()> {
        if let Payload::File(path) = self {
            file_metadata(path)?;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "text",
            Payload::File(_) => "file",
            Payload::Reader(_) => "reader",
            Payload::Seekable(_) => "seekable",
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(b) => write!(f, "Payload::Bytes({} bytes)", b.len()),
            Payload::Text(t) => write!(f, "Payload::Text({} bytes)", t.len()),
            Payload::File(p) => write!(f, "Payload::File({})", p.display()),
            other => write!(f, "Payload::{}", other.kind()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

/// An opened payload: the stream plus its size when known.
pub struct PayloadStream<'a> {
    pub reader: Box<dyn Read + Send + 'a>,
    pub size: Option<u64>,
}

impl fmt::Debug for PayloadStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadStream").field("size", &self.size).finish()
    }
}

/// Re-creatable descriptor for the payload of one logical call.
#[derive(Debug)]
pub struct PayloadSource {
    payload: Payload,
    start: Option<u64>,
    opened: bool,
}

impl PayloadSource {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            start: None,
            opened: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Open the payload for sending. Every call after the first re-derives
    /// the stream from the original source.
    pub fn open(&mut self) -> Result<Option<PayloadStream<'_>>> {
        let first = !self.opened;
        self.opened = true;
        debug!(reader = self.payload.kind(), replay = !first, "opening payload");

        match &mut self.payload {
            Payload::Empty => Ok(None),
            Payload::Bytes(bytes) => Ok(Some(PayloadStream {
                size: Some(bytes.len() as u64),
                reader: Box::new(Cursor::new(bytes.clone())),
            })),
            Payload::Text(text) => Ok(Some(PayloadStream {
                size: Some(text.len() as u64),
                reader: Box::new(Cursor::new(text.clone().into_bytes())),
            })),
            Payload::File(path) => open_file(path).map(Some),
            Payload::Reader(reader) => {
                if !first {
                    return Err(Error::PayloadNotReplayable("a plain reader".to_string()));
                }
                Ok(Some(PayloadStream {
                    reader: Box::new(reader),
                    size: None,
                }))
            }
            Payload::Seekable(stream) => {
                let start = match self.start {
                    Some(start) => {
                        stream.seek(SeekFrom::Start(start))?;
                        start
                    }
                    None => {
                        let start = stream.stream_position()?;
                        self.start = Some(start);
                        start
                    }
                };
                let size = remaining_len(stream, start)?;
                Ok(Some(PayloadStream {
                    reader: Box::new(stream),
                    size: Some(size),
                }))
            }
        }
    }
}

/// Bytes left between `start` and the end of `stream`. The position is
/// restored to `start` before returning.
pub fn remaining_len<S: Seek + ?Sized>(stream: &mut S, start: u64) -> io::Result<u64> {
    let end = stream.seek(SeekFrom::End(0))?;
    let restored = stream.seek(SeekFrom::Start(start))?;
    if restored != start {
        return Err(io::Error::other(format!(
            "stream position not restored: expected {start}, got {restored}"
        )));
    }
    Ok(end.saturating_sub(start))
}

fn file_metadata(path: &Path) -> Result<Metadata> {
    let metadata = match path.metadata() {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_file() {
        let what = if metadata.is_dir() { "directory" } else { "special file" };
        return Err(Error::UnsupportedPayload(format!("{what} {}", path.display())));
    }
    Ok(metadata)
}

fn open_file(path: &Path) -> Result<PayloadStream<'static>> {
    let metadata = file_metadata(path)?;
    let file = File::open(path)?;
    debug!(path = %path.display(), size = metadata.len(), "opened payload file");
    Ok(PayloadStream {
        reader: Box::new(file),
        size: Some(metadata.len()),
    })
}
