//! Streaming request compression and response decompression.
//!
//! # Design
//! Compression is push-based: encoders write into the sending half of an
//! in-memory pipe while the transport reads the other half as the request
//! body. A producer thread, scoped to the call, drains the payload through the
//! encoder. The pipe is a bounded channel, so at most a few chunks are ever
//! held in memory. A producer failure travels down the pipe as a read error.
//!
//! Decompression is pull-based: the response body reader is wrapped in the
//! decoder matching its `Content-Encoding`.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{Scope, ScopedJoinHandle};

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const PIPE_DEPTH: usize = 4;
const DEFAULT_CHUNK: usize = 32 * 1024;
const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

/// Content-Encoding label used for custom compression without a label.
pub const FALLBACK_ENCODING: &str = "application/octet-stream";

/// Request body compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Deflate,
    #[serde(alias = "br")]
    Brotli,
    /// Caller-supplied hooks, see [`CustomCodec`].
    Custom,
}

impl Compression {
    /// Content-Encoding value for the standard algorithms.
    pub fn encoding(&self) -> Option<&'static str> {
        match self {
            Compression::None | Compression::Custom => None,
            Compression::Gzip => Some("gzip"),
            Compression::Deflate => Some("deflate"),
            Compression::Brotli => Some("br"),
        }
    }
}

/// Wraps the pipe writer in a caller-defined encoder.
pub type CompressHook = Arc<dyn Fn(PipeWriter) -> io::Result<Box<dyn Write + Send>> + Send + Sync>;

/// Wraps a response body in a caller-defined decoder.
pub type DecompressHook = Arc<dyn Fn(Box<dyn Read>) -> io::Result<Box<dyn Read>> + Send + Sync>;

/// Hooks for an algorithm the crate does not implement.
#[derive(Clone, Default)]
pub struct CustomCodec {
    /// Content-Encoding label sent with custom-compressed bodies.
    pub encoding: Option<String>,
    pub compress: Option<CompressHook>,
    pub decompress: Option<DecompressHook>,
}

impl CustomCodec {
    pub fn new(encoding: impl Into<String>) -> Self {
        Self {
            encoding: Some(encoding.into()),
            ..Self::default()
        }
    }

    pub fn compressor<F>(mut self, hook: F) -> Self
    where
        F: Fn(PipeWriter) -> io::Result<Box<dyn Write + Send>> + Send + Sync + 'static,
    {
        self.compress = Some(Arc::new(hook));
        self
    }

    pub fn decompressor<F>(mut self, hook: F) -> Self
    where
        F: Fn(Box<dyn Read>) -> io::Result<Box<dyn Read>> + Send + Sync + 'static,
    {
        self.decompress = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CustomCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCodec")
            .field("encoding", &self.encoding)
            .field("compress", &self.compress.is_some())
            .field("decompress", &self.decompress.is_some())
            .finish()
    }
}

/// Create a bounded in-memory pipe.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(PIPE_DEPTH);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

/// Sending half of [`pipe`]. Dropping every writer ends the stream.
#[derive(Clone)]
pub struct PipeWriter {
    tx: SyncSender<io::Result<Vec<u8>>>,
}

impl PipeWriter {
    /// Fail the stream: the reader's next read returns `err`.
    pub fn close_with_error(self, err: io::Error) {
        // The reader may already be gone; nothing is waiting for the error then.
        let _ = self.tx.send(Err(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving half of [`pipe`].
pub struct PipeReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Ok(Err(err)) => return Err(err),
                // every writer dropped: clean end of stream
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// The write side of a compression algorithm, bound to a pipe.
pub enum Encoder {
    Gzip(GzEncoder<PipeWriter>),
    Deflate(ZlibEncoder<PipeWriter>),
    Brotli(Box<brotli::CompressorWriter<PipeWriter>>),
    Custom(Box<dyn Write + Send>),
}

impl Encoder {
    /// Build the encoder for `compression`. Returns `None` for
    /// [`Compression::None`]. A missing custom hook fails here, before any
    /// byte is sent.
    pub fn new(
        compression: Compression,
        codec: &CustomCodec,
        writer: PipeWriter,
    ) -> Result<Option<Self>> {
        let level = flate2::Compression::default();
        let encoder = match compression {
            Compression::None => return Ok(None),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(writer, level)),
            Compression::Deflate => Encoder::Deflate(ZlibEncoder::new(writer, level)),
            Compression::Brotli => Encoder::Brotli(Box::new(brotli::CompressorWriter::new(
                writer,
                BROTLI_BUFFER,
                BROTLI_QUALITY,
                BROTLI_WINDOW,
            ))),
            Compression::Custom => {
                let hook = codec
                    .compress
                    .as_ref()
                    .ok_or(Error::MissingCompressionHook("compressor"))?;
                Encoder::Custom(hook(writer)?)
            }
        };
        Ok(Some(encoder))
    }

    /// Write any trailer and release the pipe.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Encoder::Gzip(encoder) => encoder.finish().map(drop),
            Encoder::Deflate(encoder) => encoder.finish().map(drop),
            Encoder::Brotli(mut encoder) => {
                encoder.flush()?;
                drop(encoder.into_inner());
                Ok(())
            }
            Encoder::Custom(mut encoder) => {
                encoder.flush()?;
                drop(encoder);
                Ok(())
            }
        }
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Deflate(e) => e.write(buf),
            Encoder::Brotli(e) => e.write(buf),
            Encoder::Custom(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(e) => e.flush(),
            Encoder::Deflate(e) => e.flush(),
            Encoder::Brotli(e) => e.flush(),
            Encoder::Custom(e) => e.flush(),
        }
    }
}

/// Content-Encoding header value for a compressed request body.
pub fn content_encoding(compression: Compression, codec: &CustomCodec) -> Option<String> {
    match compression {
        Compression::None => None,
        Compression::Custom => Some(
            codec
                .encoding
                .clone()
                .filter(|label| !label.is_empty())
                .unwrap_or_else(|| FALLBACK_ENCODING.to_string()),
        ),
        standard => standard.encoding().map(str::to_string),
    }
}

/// An encoder bound to a fresh pipe, ready to be driven by a producer thread.
pub struct Compressor {
    encoder: Encoder,
    errors: PipeWriter,
    reader: PipeReader,
}

impl Compressor {
    /// Returns `None` for [`Compression::None`]. Construction errors surface
    /// here, before the payload is touched.
    pub fn new(compression: Compression, codec: &CustomCodec) -> Result<Option<Self>> {
        let (writer, reader) = pipe();
        let errors = writer.clone();
        Ok(Encoder::new(compression, codec, writer)?.map(|encoder| Self {
            encoder,
            errors,
            reader,
        }))
    }

    /// Drain `source` through the encoder on a thread owned by `scope`. The
    /// returned reader yields the compressed bytes.
    pub fn spawn<'scope, 'env, R>(
        self,
        scope: &'scope Scope<'scope, 'env>,
        mut source: R,
        chunk_size: Option<usize>,
    ) -> (PipeReader, ScopedJoinHandle<'scope, ()>)
    where
        R: Read + Send + 'scope,
    {
        let Compressor {
            mut encoder,
            errors,
            reader,
        } = self;
        let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK);
        debug!(chunk_size, "starting compressor");

        let handle = scope.spawn(move || {
            let result = crate::sink::copy_chunked(&mut source, &mut encoder, chunk_size)
                .and_then(|copied| encoder.finish().map(|()| copied));
            match result {
                Ok(copied) => debug!(copied, "compressor drained payload"),
                Err(err) => {
                    warn!(error = %err, "compressor failed; closing pipe with error");
                    errors.close_with_error(err);
                }
            }
        });
        (reader, handle)
    }
}

/// Wrap a response body in the decoder for `encoding`.
///
/// An empty (or `identity`) encoding returns the body unchanged. Unknown
/// encodings go to the custom decompressor when one is configured.
pub fn decoder(body: Box<dyn Read>, encoding: &str, codec: &CustomCodec) -> Result<Box<dyn Read>> {
    let normalized = encoding.trim().to_ascii_lowercase();
    let reader: Box<dyn Read> = match normalized.as_str() {
        "" | "identity" => body,
        "gzip" | "x-gzip" => Box::new(MultiGzDecoder::new(body)),
        "deflate" => Box::new(ZlibDecoder::new(body)),
        "br" => Box::new(brotli::Decompressor::new(body, BROTLI_BUFFER)),
        _ => match &codec.decompress {
            Some(hook) => hook(body)?,
            None => return Err(Error::UnsupportedEncoding(encoding.trim().to_string())),
        },
    };
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::thread;

    fn compress_all(data: &[u8], compression: Compression, codec: &CustomCodec) -> Vec<u8> {
        let compressor = Compressor::new(compression, codec).unwrap().unwrap();
        thread::scope(|scope| {
            let (mut reader, handle) = compressor.spawn(scope, Cursor::new(data.to_vec()), Some(1024));
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            handle.join().unwrap();
            out
        })
    }

    fn sample() -> Vec<u8> {
        b"hello world ".repeat(1000)
    }

    #[test]
    fn gzip_roundtrip() {
        let data = sample();
        let compressed = compress_all(&data, Compression::Gzip, &CustomCodec::default());
        assert!(compressed.len() < data.len());
        let mut out = Vec::new();
        decoder(Box::new(Cursor::new(compressed)), "gzip", &CustomCodec::default())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn deflate_and_brotli_roundtrip() {
        let data = sample();
        for (compression, label) in [(Compression::Deflate, "deflate"), (Compression::Brotli, "br")] {
            let compressed = compress_all(&data, compression, &CustomCodec::default());
            let mut out = Vec::new();
            decoder(Box::new(Cursor::new(compressed)), label, &CustomCodec::default())
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            assert_eq!(out, data, "{label}");
        }
    }

    #[test]
    fn custom_without_hook_fails_at_construction() {
        let result = Compressor::new(Compression::Custom, &CustomCodec::default());
        assert!(matches!(result, Err(Error::MissingCompressionHook("compressor"))));
        assert!(Compressor::new(Compression::None, &CustomCodec::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn custom_hook_receives_the_pipe() {
        let codec = CustomCodec::new("x-upper").compressor(|writer| {
            struct Upper(PipeWriter);
            impl Write for Upper {
                fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                    self.0.write_all(&buf.to_ascii_uppercase())?;
                    Ok(buf.len())
                }
                fn flush(&mut self) -> io::Result<()> {
                    Ok(())
                }
            }
            Ok(Box::new(Upper(writer)))
        });
        assert_eq!(compress_all(b"abc", Compression::Custom, &codec), b"ABC");
        assert_eq!(content_encoding(Compression::Custom, &codec).as_deref(), Some("x-upper"));
    }

    #[test]
    fn custom_label_falls_back_to_binary() {
        assert_eq!(
            content_encoding(Compression::Custom, &CustomCodec::default()).as_deref(),
            Some(FALLBACK_ENCODING)
        );
        assert_eq!(content_encoding(Compression::None, &CustomCodec::default()), None);
        assert_eq!(
            content_encoding(Compression::Brotli, &CustomCodec::default()).as_deref(),
            Some("br")
        );
    }

    #[test]
    fn producer_error_reaches_the_reader() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "source broke"))
            }
        }
        let compressor = Compressor::new(Compression::Gzip, &CustomCodec::default())
            .unwrap()
            .unwrap();
        let err = thread::scope(|scope| {
            let (mut reader, _handle) = compressor.spawn(scope, Failing, None);
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap_err()
        });
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn dropped_reader_releases_the_producer() {
        let compressor = Compressor::new(Compression::Gzip, &CustomCodec::default())
            .unwrap()
            .unwrap();
        thread::scope(|scope| {
            let (reader, handle) =
                compressor.spawn(scope, Cursor::new(vec![0u8; 4 * 1024 * 1024]), Some(512));
            drop(reader);
            handle.join().unwrap();
        });
    }

    #[test]
    fn empty_encoding_passes_body_through() {
        let mut out = Vec::new();
        decoder(Box::new(Cursor::new(b"raw".to_vec())), "", &CustomCodec::default())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"raw");
    }

    #[test]
    fn unknown_encoding_without_hook_is_rejected() {
        let err = decoder(Box::new(Cursor::new(Vec::new())), "zstd", &CustomCodec::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedEncoding(ref e) if e == "zstd"));
    }

    #[test]
    fn unknown_encoding_uses_custom_decompressor() {
        let codec = CustomCodec::new("x-rev").decompressor(|mut body| {
            let mut raw = Vec::new();
            body.read_to_end(&mut raw)?;
            raw.reverse();
            Ok(Box::new(Cursor::new(raw)))
        });
        let mut out = Vec::new();
        decoder(Box::new(Cursor::new(b"cba".to_vec())), "x-rev", &codec)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn compression_deserializes_from_labels() {
        let c: Compression = serde_json::from_str(r#""br""#).unwrap();
        assert_eq!(c, Compression::Brotli);
        let c: Compression = serde_json::from_str(r#""gzip""#).unwrap();
        assert_eq!(c, Compression::Gzip);
    }
}
