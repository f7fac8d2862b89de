//! Background threads for writing and reading rows.
//!
//! [`AsyncWriter`] decouples row producers from encoding and spilling;
//! [`PrefetchIterator`] decodes rows ahead of a consumer. Both use bounded
//! crossbeam channels and surface a panicking thread as
//! [`Error::WorkerFailed`](crate::Error::WorkerFailed).

mod reader;
mod writer;

pub use reader::PrefetchIterator;
pub use writer::AsyncWriter;

use std::any::Any;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
