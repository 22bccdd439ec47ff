//! Progress reporting for long operations.

/// Receives `(label, current, total)` after every successful write.
pub trait ProgressSink {
    fn on_progress(&mut self, label: &str, current: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, u64, u64),
{
    fn on_progress(&mut self, label: &str, current: u64, total: u64) {
        self(label, current, total)
    }
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _label: &str, _current: u64, _total: u64) {}
}

/// Accumulates bytes across the files of one tree operation.
pub(crate) struct TreeProgress<'a> {
    sink: &'a mut dyn ProgressSink,
    label: String,
    base: u64,
    total: u64,
}

impl<'a> TreeProgress<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink, label: impl Into<String>, total: u64) -> Self {
        Self {
            sink,
            label: label.into(),
            base: 0,
            total,
        }
    }

    /// Report `done` bytes of the current file.
    pub(crate) fn file(&mut self, done: u64) {
        self.sink.on_progress(&self.label, self.base + done, self.total);
    }

    /// Close out a file of `len` bytes.
    pub(crate) fn advance(&mut self, len: u64) {
        self.base += len;
    }
}
