//! Background writing into a buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use super::panic_message;
use crate::buffer::{Buffer, BufferWriter};
use crate::error::{Error, Result};
use crate::row::DataRow;
use crate::schema::TableSchema;

enum WriterMessage {
    Row(DataRow),
    Close(TableSchema),
}

/// Writes rows into a [`BufferWriter`] on a dedicated thread.
///
/// Rows pass through a bounded queue, so a slow writer blocks the
/// producer instead of buffering without limit. A failure on the writer
/// thread is reported by the next [`add_row`](Self::add_row) or by
/// [`close`](Self::close), whichever comes first.
pub struct AsyncWriter {
    id: u64,
    sender: Option<Sender<WriterMessage>>,
    result: Receiver<Result<Arc<Buffer>>>,
    handle: Option<JoinHandle<()>>,
    abort: Arc<AtomicBool>,
}

impl AsyncWriter {
    /// Moves `writer` to a new thread with a queue of `capacity` rows.
    pub fn spawn(writer: BufferWriter, capacity: usize) -> Result<Self> {
        let id = writer.id();
        let (sender, receiver) = channel::bounded(capacity.max(1));
        let (result_tx, result) = channel::bounded(1);
        let abort = Arc::new(AtomicBool::new(false));
        let worker_abort = Arc::clone(&abort);
        let handle = thread::Builder::new()
            .name(format!("tablebuf-writer-{}", id))
            .spawn(move || run(writer, receiver, result_tx, worker_abort))?;
        log::debug!("Started writer thread for buffer {}", id);
        Ok(Self { id, sender: Some(sender), result, handle: Some(handle), abort })
    }

    /// Id of the buffer being written.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a row, blocking while the queue is full.
    pub fn add_row(&mut self, row: DataRow) -> Result<()> {
        if let Some(err) = self.poll_failure() {
            return Err(err);
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::invalid_state("writer already closed"))?;
        if sender.send(WriterMessage::Row(row)).is_err() {
            return Err(self.await_failure());
        }
        Ok(())
    }

    /// Waits for all queued rows to be written and closes the buffer.
    pub fn close(mut self, schema: TableSchema) -> Result<Arc<Buffer>> {
        let sender = self
            .sender
            .take()
            .ok_or_else(|| Error::invalid_state("writer already closed"))?;
        if sender.send(WriterMessage::Close(schema)).is_err() {
            return Err(self.await_failure());
        }
        drop(sender);
        let outcome = match self.result.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(self.join_failure()),
        };
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        outcome
    }

    fn poll_failure(&mut self) -> Option<Error> {
        match self.result.try_recv() {
            Ok(Err(e)) => Some(e),
            Ok(Ok(_)) => Some(Error::internal("writer thread closed the buffer unasked")),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.join_failure()),
        }
    }

    fn await_failure(&mut self) -> Error {
        match self.result.recv() {
            Ok(Err(e)) => e,
            Ok(Ok(_)) => Error::internal("writer thread closed the buffer unasked"),
            Err(_) => self.join_failure(),
        }
    }

    fn join_failure(&mut self) -> Error {
        match self.handle.take().map(JoinHandle::join) {
            Some(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                log::error!("Writer thread of buffer {} panicked: {}", self.id, message);
                Error::WorkerFailed(message)
            }
            _ => Error::WorkerFailed(format!("writer thread of buffer {} has stopped", self.id)),
        }
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for AsyncWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWriter")
            .field("id", &self.id)
            .field("queued", &self.sender.as_ref().map_or(0, Sender::len))
            .finish()
    }
}

fn run(
    mut writer: BufferWriter,
    rows: Receiver<WriterMessage>,
    result: Sender<Result<Arc<Buffer>>>,
    abort: Arc<AtomicBool>,
) {
    while let Ok(message) = rows.recv() {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        match message {
            WriterMessage::Row(row) => {
                if let Err(e) = writer.add_row(row) {
                    log::warn!("Writing to buffer {} failed: {}", writer.id(), e);
                    let _ = result.send(Err(e));
                    return;
                }
            }
            WriterMessage::Close(schema) => {
                let _ = result.send(writer.close(schema));
                return;
            }
        }
    }
    log::debug!("Writer for buffer {} abandoned after {} rows", writer.id(), writer.row_count());
}
