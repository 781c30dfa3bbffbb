//! Asynchronous guest input
//!
//! Reads are served from a pending buffer first; only an empty buffer goes
//! to the external [`InputSource`]. Bytes beyond what a read asked for are
//! kept for the next read.

use parking_lot::Mutex;
use std::sync::Arc;

/// Callback receiving bytes from an input source
pub type Deliver = Box<dyn FnOnce(Vec<u8>) + Send>;

/// External provider of input bytes
pub trait InputSource: Send + Sync {
    /// Request the next chunk of input; `deliver` may be called later and
    /// from another OS thread. An empty chunk means end of input.
    fn read(&self, deliver: Deliver);
}

/// Source that is always at end of input
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputSource for NoInput {
    fn read(&self, deliver: Deliver) {
        deliver(Vec::new());
    }
}

/// Bytes received but not yet consumed
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    pending: Arc<Mutex<Vec<u8>>>,
}

impl InputBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Append bytes for later reads
    pub fn extend(&self, bytes: &[u8]) {
        self.pending.lock().extend_from_slice(bytes);
    }

    /// Remove up to `n` bytes from the front; `None` when empty
    fn take(&self, n: usize) -> Option<Vec<u8>> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        let n = n.min(pending.len());
        Some(pending.drain(..n).collect())
    }

    /// Serve a read of up to `n` bytes
    pub(crate) fn read<F>(&self, source: &dyn InputSource, n: usize, resume: F)
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        if let Some(data) = self.take(n) {
            resume(data);
            return;
        }
        let buffer = self.clone();
        source.read(Box::new(move |mut data: Vec<u8>| {
            if data.len() > n {
                buffer.extend(&data[n..]);
                data.truncate(n);
            }
            resume(data);
        }));
    }
}
