//! Row key uniqueness.
//!
//! Keys are kept in a hash set while they fit in memory. Past that limit
//! they go to sorted chunk files that are merged when the container closes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::row::RowKey;

/// Detects repeated row keys.
///
/// Keys are held in a hash set, so a repeat is reported on the row that
/// repeats it. Once the set reaches `max_keys`, it is written out as a
/// sorted chunk file and cleared; repeats across chunks are only found by
/// the merge in [`finish`](Self::finish).
#[derive(Debug)]
pub(crate) struct DuplicateChecker {
    keys: HashSet<RowKey>,
    max_keys: usize,
    temp_dir: PathBuf,
    chunks: Vec<NamedTempFile>,
}

fn duplicate(key: impl Into<String>) -> Error {
    Error::DuplicateKey { key: key.into(), table_index: None }
}

impl DuplicateChecker {
    pub(crate) fn new(max_keys: usize, temp_dir: PathBuf) -> Self {
        Self { keys: HashSet::new(), max_keys: max_keys.max(1), temp_dir, chunks: Vec::new() }
    }

    pub(crate) fn add(&mut self, key: &RowKey) -> Result<()> {
        if !self.keys.insert(key.clone()) {
            return Err(duplicate(key.as_str()));
        }
        if self.keys.len() >= self.max_keys {
            self.spill()?;
        }
        Ok(())
    }

    pub(crate) fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    fn spill(&mut self) -> Result<()> {
        let mut keys: Vec<RowKey> = self.keys.drain().collect();
        keys.sort_unstable();
        let mut chunk = tempfile::Builder::new().prefix("tablebuf-keys-").tempfile_in(&self.temp_dir)?;
        {
            let mut out = BufWriter::new(chunk.as_file_mut());
            for key in &keys {
                let bytes = key.as_str().as_bytes();
                out.write_all(&(bytes.len() as u32).to_le_bytes())?;
                out.write_all(bytes)?;
            }
            out.flush()?;
        }
        log::debug!("Wrote {} keys to duplicate check chunk {}", keys.len(), self.chunks.len());
        self.chunks.push(chunk);
        Ok(())
    }

    /// Merges all chunks and reports the smallest repeated key, if any.
    pub(crate) fn finish(mut self) -> Result<()> {
        if self.chunks.is_empty() {
            return Ok(());
        }
        if !self.keys.is_empty() {
            self.spill()?;
        }

        let mut readers = Vec::with_capacity(self.chunks.len());
        let mut heap = BinaryHeap::new();
        for (index, chunk) in self.chunks.iter_mut().enumerate() {
            let mut file = chunk.reopen()?;
            file.seek(SeekFrom::Start(0))?;
            let mut reader = BufReader::new(file);
            if let Some(key) = read_key(&mut reader)? {
                heap.push(Reverse((key, index)));
            }
            readers.push(reader);
        }

        let mut previous: Option<String> = None;
        while let Some(Reverse((key, index))) = heap.pop() {
            if previous.as_deref() == Some(key.as_str()) {
                return Err(duplicate(key));
            }
            if let Some(next) = read_key(&mut readers[index])? {
                heap.push(Reverse((next, index)));
            }
            previous = Some(key);
        }
        Ok(())
    }
}

fn read_key(reader: &mut BufReader<File>) -> Result<Option<String>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| Error::corruption("key chunk holds invalid UTF-8"))
}
