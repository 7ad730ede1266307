//! Streaming writer.
//!
//! Entries arrive in strictly increasing key order and are buffered into
//! the current data block; when the uncompressed block (magic included)
//! reaches the target size, it is compressed through a pooled context and
//! flushed at the current file position, and an index record is taken.
//! Entries are never split across blocks, so a block may overshoot the
//! target by one entry.
//!
//! `close` finalizes the file in a fixed order: last data block, buffered
//! meta blocks, fileinfo, data index, meta index, trailer.  A writer is
//! single-use; `close` consumes it and hands the sink back.  A file whose
//! writer failed or was dropped mid-stream is undefined and must be
//! discarded.

use std::cmp::Ordering;
use std::io::{Seek, Write};
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;

use crate::block::{DATA_BLOCK_MAGIC, MAGIC_LEN, META_BLOCK_MAGIC};
use crate::bytes::display_key;
use crate::codec::{CodecError, CodecId, Compression};
use crate::comparator::{self, Comparator};
use crate::fileinfo::{self, FileInfo};
use crate::index::IndexBuilder;
use crate::trailer::{Trailer, FORMAT_VERSION};

/// Uncompressed block-size target.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Longest accepted key.
pub const MAX_KEY_LENGTH: usize = 65536;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("key {key} appended out of order (last key was {last})")]
    OutOfOrder { key: String, last: String },
    #[error("fileinfo key {0} uses the reserved \"hfile.\" prefix")]
    ReservedKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Configuration for [`Writer::with_options`].
pub struct WriteOptions {
    /// Uncompressed bytes per data block before the writer rolls over.
    pub block_size: usize,
    /// Codec applied to every data and meta block.
    pub compression: CodecId,
    /// Key order; its identity is persisted in fileinfo.
    pub comparator: Arc<dyn Comparator>,
    /// Reserved for a bloom-filter section in a later revision; no effect.
    pub bloom_filter: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            compression: CodecId::None,
            comparator: comparator::lexicographic(),
            bloom_filter: false,
        }
    }
}

struct CurrentBlock {
    /// File offset where this block's compressed bytes will land.
    begin: u64,
    /// First key physically stored in the block.
    first_key: Option<Vec<u8>>,
    /// Uncompressed contents: magic, then encoded entries.
    buf: Vec<u8>,
}

pub struct Writer<W: Write + Seek> {
    sink: W,
    block_size: usize,
    compression: Compression,
    comparator: Arc<dyn Comparator>,
    block: Option<CurrentBlock>,
    data_index: IndexBuilder,
    /// Buffered `(name, payload)` meta blocks, emitted at close.
    meta: Vec<(Vec<u8>, Vec<u8>)>,
    fileinfo: FileInfo,
    last_key: Option<Vec<u8>>,
    entry_count: u32,
    total_key_len: u64,
    total_value_len: u64,
    total_uncompressed: u64,
}

impl<W: Write + Seek> Writer<W> {
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, WriteOptions::default())
    }

    pub fn with_options(sink: W, options: WriteOptions) -> Self {
        Self {
            sink,
            block_size: options.block_size.max(1),
            compression: Compression::new(options.compression),
            comparator: options.comparator,
            block: None,
            data_index: IndexBuilder::new(),
            meta: Vec::new(),
            fileinfo: FileInfo::new(),
            last_key: None,
            entry_count: 0,
            total_key_len: 0,
            total_value_len: 0,
            total_uncompressed: 0,
        }
    }

    /// Append one entry.  Keys must be strictly increasing under the
    /// writer's comparator.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), WriteError> {
        self.check_key(key)?;
        if value.len() > i32::MAX as usize {
            return Err(WriteError::InvalidValue(format!(
                "value is {} bytes, maximum is {}",
                value.len(),
                i32::MAX
            )));
        }

        // Roll the block filled by the previous append; never mid-entry.
        if self.block.as_ref().map_or(false, |b| b.buf.len() >= self.block_size) {
            self.finish_block()?;
        }
        if self.block.is_none() {
            let begin = self.sink.stream_position()?;
            let mut buf = Vec::with_capacity(self.block_size + MAGIC_LEN);
            buf.extend_from_slice(DATA_BLOCK_MAGIC);
            self.block = Some(CurrentBlock { begin, first_key: None, buf });
        }

        if let Some(block) = self.block.as_mut() {
            block.buf.write_u32::<BigEndian>(key.len() as u32)?;
            block.buf.write_u32::<BigEndian>(value.len() as u32)?;
            block.buf.extend_from_slice(key);
            block.buf.extend_from_slice(value);
            if block.first_key.is_none() {
                block.first_key = Some(key.to_vec());
            }
        }

        self.last_key = Some(key.to_vec());
        self.entry_count += 1;
        self.total_key_len += key.len() as u64;
        self.total_value_len += value.len() as u64;
        Ok(())
    }

    /// Buffer a named meta block for emission during close.  Each meta
    /// block costs one codec pass, so callers batch rather than stream.
    pub fn append_meta_block(&mut self, name: &str, payload: &[u8]) {
        self.meta.push((name.as_bytes().to_vec(), payload.to_vec()));
    }

    /// Add a user fileinfo entry.  The `hfile.` namespace is refused.
    pub fn append_file_info(&mut self, key: &[u8], value: &[u8]) -> Result<(), WriteError> {
        if fileinfo::is_reserved_key(key) {
            return Err(WriteError::ReservedKey(display_key(key)));
        }
        self.fileinfo.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Entries appended so far.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    fn check_key(&self, key: &[u8]) -> Result<(), WriteError> {
        if key.is_empty() {
            return Err(WriteError::InvalidKey("key is empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(WriteError::InvalidKey(format!(
                "key is {} bytes, maximum is {MAX_KEY_LENGTH}",
                key.len()
            )));
        }
        if let Some(last) = &self.last_key {
            if self.comparator.compare(key, last) != Ordering::Greater {
                return Err(WriteError::OutOfOrder {
                    key: display_key(key),
                    last: display_key(last),
                });
            }
        }
        Ok(())
    }

    /// Compress and flush the current block, recording its index entry.
    fn finish_block(&mut self) -> Result<(), WriteError> {
        let block = match self.block.take() {
            Some(block) => block,
            None => return Ok(()),
        };
        let first_key = match block.first_key {
            Some(key) => key,
            // A block only exists once an entry landed in it.
            None => return Ok(()),
        };
        let uncompressed = block.buf.len();
        let compressed = self.compression.compress_block(&block.buf)?;
        self.sink.write_all(&compressed)?;
        self.data_index.add(first_key, block.begin, uncompressed as u32);
        self.total_uncompressed += uncompressed as u64;
        Ok(())
    }

    /// Finalize the file and return the sink.
    ///
    /// Section order: remaining data block, meta blocks, fileinfo, data
    /// index, meta index (when meta blocks exist), trailer.
    pub fn close(mut self) -> Result<W, WriteError> {
        self.finish_block()?;

        // Meta blocks, sorted by name so the meta index binary search holds
        // whatever order callers appended them in.
        let mut metas = std::mem::take(&mut self.meta);
        metas.sort_by(|a, b| a.0.cmp(&b.0));
        let mut meta_index = IndexBuilder::new();
        for (name, payload) in metas {
            let offset = self.sink.stream_position()?;
            let mut buf = Vec::with_capacity(MAGIC_LEN + payload.len());
            buf.extend_from_slice(META_BLOCK_MAGIC);
            buf.extend_from_slice(&payload);
            let compressed = self.compression.compress_block(&buf)?;
            self.sink.write_all(&compressed)?;
            meta_index.add(name, offset, buf.len() as u32);
            self.total_uncompressed += buf.len() as u64;
        }

        // Reserved fileinfo entries.
        if let Some(last) = &self.last_key {
            self.fileinfo.insert(fileinfo::KEY_LASTKEY.to_vec(), last.clone());
        }
        let avg_key_len = match self.entry_count {
            0 => 0,
            n => (self.total_key_len / n as u64) as u32,
        };
        let avg_value_len = match self.entry_count {
            0 => 0,
            n => (self.total_value_len / n as u64) as u32,
        };
        self.fileinfo.insert(
            fileinfo::KEY_AVG_KEY_LEN.to_vec(),
            avg_key_len.to_be_bytes().to_vec(),
        );
        self.fileinfo.insert(
            fileinfo::KEY_AVG_VALUE_LEN.to_vec(),
            avg_value_len.to_be_bytes().to_vec(),
        );
        self.fileinfo.insert(
            fileinfo::KEY_COMPARATOR.to_vec(),
            self.comparator.id().as_bytes().to_vec(),
        );

        let fileinfo_offset = self.sink.stream_position()?;
        self.fileinfo.write_to(&mut self.sink)?;

        let data_index_offset = self.sink.stream_position()?;
        self.data_index.write_to(&mut self.sink)?;

        let (meta_index_offset, meta_index_count) = if meta_index.is_empty() {
            (0, 0)
        } else {
            let offset = self.sink.stream_position()?;
            meta_index.write_to(&mut self.sink)?;
            (offset, meta_index.len() as u32)
        };

        let trailer = Trailer {
            fileinfo_offset,
            data_index_offset,
            data_index_count: self.data_index.len() as u32,
            meta_index_offset,
            meta_index_count,
            total_uncompressed_bytes: self.total_uncompressed,
            entry_count: self.entry_count,
            compression_codec: self.compression.id().ordinal(),
            version: FORMAT_VERSION,
        };
        trailer.write_to(&mut self.sink)?;

        self.sink.flush()?;
        Ok(self.sink)
    }
}
