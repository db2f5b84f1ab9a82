//! Byte-counting stream decorators.
//!
//! # Design
//! `ProgressReader` and `ProgressWriter` wrap a stream and report the running
//! byte count to a callback after every non-empty transfer. The count lives
//! in a `ProgressCounter` (an atomic) so a decorated stream can be shared
//! across threads, and so several decorators can feed one running count, as
//! the pipeline does when a redirect replays the payload. Each
//! decorator reports completion exactly once: with the known total, or with
//! the final count when the total was unknown up front (for example behind a
//! compressor or decompressor).

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Progress callback: `(bytes_so_far, total_if_known)`.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Shared running byte count.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::SeqCst) + n
    }
}

struct Tracker {
    counter: ProgressCounter,
    total: Option<u64>,
    callback: ProgressFn,
    completed: bool,
}

impl Tracker {
    fn new(counter: ProgressCounter, total: Option<u64>, callback: ProgressFn) -> Self {
        Self {
            counter,
            total,
            callback,
            completed: false,
        }
    }

    fn record(&mut self, n: usize) {
        let current = self.counter.add(n as u64);
        if self.total == Some(current) {
            self.completed = true;
        }
        (self.callback)(current, self.total);
    }

    fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let current = self.counter.get();
        (self.callback)(current, Some(self.total.unwrap_or(current)));
    }
}

/// Reports bytes read through the inner reader.
pub struct ProgressReader<R> {
    inner: R,
    tracker: Tracker,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, total: Option<u64>, callback: ProgressFn) -> Self {
        Self::with_counter(inner, total, callback, ProgressCounter::new())
    }

    /// Accumulate into an existing counter instead of a fresh one.
    pub fn with_counter(
        inner: R,
        total: Option<u64>,
        callback: ProgressFn,
        counter: ProgressCounter,
    ) -> Self {
        Self {
            inner,
            tracker: Tracker::new(counter, total, callback),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.tracker.counter.get()
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.tracker.record(n);
        } else if !buf.is_empty() {
            self.tracker.complete();
        }
        Ok(n)
    }
}

/// Reports bytes written through the inner writer.
pub struct ProgressWriter<W> {
    inner: W,
    tracker: Tracker,
}

impl<W: Write> ProgressWriter<W> {
    pub fn new(inner: W, total: Option<u64>, callback: ProgressFn) -> Self {
        Self {
            inner,
            tracker: Tracker::new(ProgressCounter::new(), total, callback),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.tracker.counter.get()
    }

    /// Emit the completion report and hand back the inner writer.
    pub fn finish(mut self) -> W {
        self.tracker.complete();
        self.inner
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.tracker.record(n);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Rate-limit `callback` to at most one call per `interval`.
///
/// Reports where the count reaches a known total are always forwarded.
pub fn throttled(callback: ProgressFn, interval: Duration) -> ProgressFn {
    let last: Mutex<Option<Instant>> = Mutex::new(None);
    Arc::new(move |current, total| {
        let now = Instant::now();
        let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
        let done = total == Some(current);
        let due = last.map_or(true, |at| now.duration_since(at) >= interval);
        if done || due {
            *last = Some(now);
            drop(last);
            callback(current, total);
        }
    })
}
