//! Buffered file copy tolerant of flaky write paths.
//!
//! - The read buffer is the largest of [`BUFFER_SIZES`] that can be allocated.
//! - Each buffer is written in chunks of at most `chunk` bytes; a failed write
//!   halves `chunk` (down to [`MIN_CHUNK`]) and is retried.
//! - Retries stop after [`MAX_CONSECUTIVE_FAILURES`] failed writes in a row or
//!   once the wall-clock retry budget is spent. The partial destination is
//!   removed and the last OS error returned.
//! - The source modification time is copied onto the destination.

use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::helpers::io_error_with_help_io;

/// Read buffer sizes tried in order.
pub const BUFFER_SIZES: &[usize] = &[8 << 20, 4 << 20, 1 << 20, 256 << 10, 64 << 10];
/// Smallest write chunk after shrinking.
pub const MIN_CHUNK: usize = 16 << 10;
pub const MAX_CONSECUTIVE_FAILURES: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct CopyPolicy {
    pub retry_budget: Duration,
    pub max_consecutive_failures: u32,
    pub min_chunk: usize,
}

impl CopyPolicy {
    pub fn with_budget(retry_budget: Duration) -> Self {
        Self {
            retry_budget,
            ..Self::default()
        }
    }
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            retry_budget: Duration::from_secs(10),
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            min_chunk: MIN_CHUNK,
        }
    }
}

/// Result of a streaming copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyResult {
    pub bytes: u64,
    /// Read buffer actually allocated
    pub buf_size: usize,
    /// Write chunk in effect when the copy finished
    pub final_chunk: usize,
    /// Failed writes that were retried
    pub retries: u32,
}

fn alloc_buffer() -> io::Result<Vec<u8>> {
    for &size in BUFFER_SIZES {
        let mut v: Vec<u8> = Vec::new();
        if v.try_reserve_exact(size).is_ok() {
            v.resize(size, 0);
            return Ok(v);
        }
        debug!(size, "buffer allocation failed; trying smaller");
    }
    Err(io::Error::new(io::ErrorKind::OutOfMemory, "no copy buffer could be allocated"))
}

/// Stream `reader` into `writer` using `buf`, shrinking the write chunk on failure.
pub(crate) fn stream_copy<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    total: u64,
    policy: &CopyPolicy,
    progress: &mut dyn FnMut(u64, u64),
) -> io::Result<CopyResult> {
    let mut chunk = buf.len();
    let mut done: u64 = 0;
    let mut failures: u32 = 0;
    let mut retries: u32 = 0;
    let mut retry_started: Option<Instant> = None;

    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let mut off = 0;
        while off < n {
            let end = (off + chunk).min(n);
            let err = match writer.write(&buf[off..end]) {
                Ok(0) => io::Error::new(io::ErrorKind::WriteZero, "write returned 0 bytes"),
                Ok(w) => {
                    off += w;
                    done += w as u64;
                    failures = 0;
                    progress(done, total);
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => e,
            };

            failures += 1;
            retries += 1;
            let started = *retry_started.get_or_insert_with(Instant::now);
            if failures >= policy.max_consecutive_failures || started.elapsed() >= policy.retry_budget {
                warn!(failures, chunk, error = %err, "giving up on write");
                return Err(err);
            }
            let next = (chunk / 2).max(policy.min_chunk);
            debug!(from = chunk, to = next, error = %err, "write failed; shrinking chunk");
            chunk = next;
        }
    }
    writer.flush()?;
    Ok(CopyResult {
        bytes: done,
        buf_size: buf.len(),
        final_chunk: chunk,
        retries,
    })
}

/// Copy `src` to `dst` (created or truncated). On failure the partial
/// destination is removed.
pub fn copy_file(
    src: &Path,
    dst: &Path,
    policy: &CopyPolicy,
    progress: &mut dyn FnMut(u64, u64),
) -> io::Result<CopyResult> {
    let mut reader = File::open(src).map_err(io_error_with_help_io("open source", src))?;
    let meta = reader.metadata()?;
    let total = meta.len();
    let mut buf = alloc_buffer()?;

    let mut writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .map_err(io_error_with_help_io("create destination", dst))?;

    let res = stream_copy(&mut reader, &mut writer, &mut buf, total, policy, progress)
        .and_then(|r| writer.sync_all().map(|_| r));
    drop(writer);

    match res {
        Ok(r) => {
            let mtime = FileTime::from_last_modification_time(&meta);
            if let Err(e) = filetime::set_file_mtime(dst, mtime) {
                debug!(dst = %dst.display(), error = %e, "could not preserve mtime");
            }
            Ok(r)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(dst) {
                debug!(dst = %dst.display(), error = %rm, "partial destination not removed");
            }
            Err(io_error_with_help_io("copy", src)(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Rejects writes larger than `limit`; optionally fails every write.
    struct Flaky {
        limit: usize,
        always_fail: bool,
        out: Vec<u8>,
    }

    impl Write for Flaky {
        fn write(&mut self, b: &[u8]) -> io::Result<usize> {
            if self.always_fail || b.len() > self.limit {
                return Err(io::Error::other("device hiccup"));
            }
            self.out.extend_from_slice(b);
            Ok(b.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn shrinks_chunk_until_writes_fit() {
        let src = data(300_000);
        let mut r = Cursor::new(src.clone());
        let mut w = Flaky {
            limit: 40_000,
            always_fail: false,
            out: Vec::new(),
        };
        let mut buf = vec![0u8; 256 << 10];
        let mut last = (0, 0);
        let res = stream_copy(&mut r, &mut w, &mut buf, src.len() as u64, &CopyPolicy::default(), &mut |c, t| {
            last = (c, t)
        })
        .unwrap();
        assert_eq!(w.out, src);
        assert_eq!(res.final_chunk, 32 << 10);
        assert!(res.retries >= 3);
        assert_eq!(last, (300_000, 300_000));
    }

    #[test]
    fn gives_up_after_consecutive_failures() {
        let mut r = Cursor::new(data(1000));
        let mut w = Flaky {
            limit: 0,
            always_fail: true,
            out: Vec::new(),
        };
        let mut buf = vec![0u8; 64 << 10];
        let err = stream_copy(&mut r, &mut w, &mut buf, 1000, &CopyPolicy::default(), &mut |_, _| {}).unwrap_err();
        assert_eq!(err.to_string(), "device hiccup");
    }

    #[test]
    fn copy_file_preserves_content_and_mtime() {
        let td = tempdir().unwrap();
        let src = td.path().join("a.iso");
        let dst = td.path().join("b.iso");
        fs::write(&src, data(70_000)).unwrap();
        let past = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&src, past).unwrap();

        let mut calls = 0;
        let r = copy_file(&src, &dst, &CopyPolicy::default(), &mut |_, _| calls += 1).unwrap();
        assert_eq!(r.bytes, 70_000);
        assert!(calls >= 1);
        assert_eq!(fs::read(&dst).unwrap(), data(70_000));
        let m = fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&m), past);
    }

    #[test]
    fn copy_file_missing_source_leaves_nothing() {
        let td = tempdir().unwrap();
        let dst = td.path().join("out.iso");
        assert!(copy_file(&td.path().join("nope.iso"), &dst, &CopyPolicy::default(), &mut |_, _| {}).is_err());
        assert!(!dst.exists());
    }
}
