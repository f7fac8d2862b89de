//! Read-ahead over a row iterator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError};

use super::panic_message;
use crate::error::{Error, Result};
use crate::iter::RowIterator;
use crate::row::DataRow;

/// Reads rows ahead of the consumer on a background thread.
///
/// Up to `capacity` rows are decoded in advance. The producer thread is
/// joined once the rows run out, and dropping the iterator early stops it
/// within one poll interval and joins it as well.
pub struct PrefetchIterator {
    rows: Receiver<Result<DataRow>>,
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    poll: Duration,
    done: bool,
}

impl PrefetchIterator {
    /// Starts reading `source` on a new thread.
    pub fn spawn(source: RowIterator, capacity: usize, poll: Duration) -> Result<Self> {
        let (sender, rows) = channel::bounded(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let producer_stop = Arc::clone(&stop);
        let handle = thread::Builder::new().name("tablebuf-prefetch".to_string()).spawn(move || {
            for item in source {
                let mut pending = item;
                loop {
                    if producer_stop.load(Ordering::Relaxed) {
                        return;
                    }
                    match sender.send_timeout(pending, poll) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(back)) => pending = back,
                        Err(SendTimeoutError::Disconnected(_)) => return,
                    }
                }
            }
        })?;
        Ok(Self { rows, handle: Some(handle), stop, poll, done: false })
    }

    fn producer_failure(&mut self) -> Option<Error> {
        match self.handle.take()?.join() {
            Ok(()) => None,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Prefetch thread panicked: {}", message);
                Some(Error::WorkerFailed(message))
            }
        }
    }
}

impl Iterator for PrefetchIterator {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.rows.recv_timeout(self.poll) {
                Ok(item) => {
                    self.done = item.is_err();
                    return Some(item);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let finished = self.handle.as_ref().map_or(true, JoinHandle::is_finished);
                    if !finished || !self.rows.is_empty() {
                        continue;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {}
            }
            // the producer has finished or died
            self.done = true;
            return self.producer_failure().map(Err);
        }
    }
}

impl Drop for PrefetchIterator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                log::warn!("Prefetch thread panicked after its consumer left: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

impl std::fmt::Debug for PrefetchIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchIterator")
            .field("buffered", &self.rows.len())
            .field("done", &self.done)
            .finish()
    }
}
