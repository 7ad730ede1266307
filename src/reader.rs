//! Random-access reader.
//!
//! Construction records the source, its length, and a name (the cache
//! identity); it performs no I/O.  `load_metadata` then reads the trailer,
//! fileinfo, and both indices in one pass, after which the reader is
//! immutable and may be shared by any number of scanner threads — the
//! underlying source is serialized behind a mutex, decompression runs on
//! pooled contexts outside the lock.
//!
//! Data blocks load lazily through [`Reader::read_block`], consulting the
//! optional block cache first.  The reader is defensive: every
//! inconsistency between trailer, indices, and block magics surfaces as an
//! error, nothing is papered over.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::block::{self, check_magic, Block, DATA_BLOCK_MAGIC, META_BLOCK_MAGIC};
use crate::cache::{BlockCache, CacheKey};
use crate::codec::{CodecError, CodecId, Compression};
use crate::comparator::{self, Comparator};
use crate::fileinfo::{self, FileInfo};
use crate::index::BlockIndex;
use crate::scanner::Scanner;
use crate::trailer::{Trailer, TRAILER_SIZE};

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("metadata not loaded — call load_metadata first")]
    NotLoaded,
    #[error("bad magic: expected {expected}, found {found}")]
    BadMagic { expected: String, found: String },
    #[error("unsupported format version {0} (this build reads v1)")]
    UnsupportedVersion(u32),
    #[error("short read at offset {offset}: wanted {wanted} bytes")]
    ShortRead { offset: u64, wanted: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("comparator {0:?} is not registered — cannot order keys")]
    UnknownComparator(String),
    #[error("file has no data blocks")]
    Empty,
    #[error("scanner is not positioned — seek first")]
    NotSeeked,
    #[error("block {index} requested but the file has {count}")]
    BlockOutOfRange { index: usize, count: usize },
    #[error("corrupt file: {0}")]
    Corrupt(String),
}

impl From<block::MagicMismatch> for ReadError {
    fn from(m: block::MagicMismatch) -> Self {
        ReadError::BadMagic {
            expected: String::from_utf8_lossy(m.expected).into_owned(),
            found: format!("0x{}", hex::encode(&m.found)),
        }
    }
}

/// Everything `load_metadata` materializes.  Read-only afterwards.
struct Loaded {
    trailer: Trailer,
    compression: Compression,
    data_index: BlockIndex,
    meta_index: Option<BlockIndex>,
    fileinfo: FileInfo,
    comparator: Arc<dyn Comparator>,
    last_key: Option<Vec<u8>>,
    avg_key_len: u32,
    avg_value_len: u32,
}

pub struct Reader<R: Read + Seek> {
    source: Mutex<R>,
    length: u64,
    name: Arc<str>,
    cache: Option<Arc<dyn BlockCache>>,
    loaded: Option<Loaded>,
}

impl<R: Read + Seek> Reader<R> {
    /// Record the source; no I/O happens until [`Reader::load_metadata`].
    pub fn new(source: R, length: u64, name: &str) -> Self {
        Self {
            source: Mutex::new(source),
            length,
            name: Arc::from(name),
            cache: None,
            loaded: None,
        }
    }

    /// Like [`Reader::new`], with a block cache consulted on every data
    /// block load.
    pub fn with_cache(source: R, length: u64, name: &str, cache: Arc<dyn BlockCache>) -> Self {
        Self {
            source: Mutex::new(source),
            length,
            name: Arc::from(name),
            cache: Some(cache),
            loaded: None,
        }
    }

    /// Parse the trailer and eagerly load fileinfo and both indices.
    /// Idempotent; must succeed before any query or scanner.
    pub fn load_metadata(&mut self) -> Result<(), ReadError> {
        if self.loaded.is_some() {
            return Ok(());
        }
        if self.length < TRAILER_SIZE as u64 {
            return Err(ReadError::Corrupt(format!(
                "file is {} bytes, shorter than the {TRAILER_SIZE}-byte trailer",
                self.length
            )));
        }
        let trailer_offset = self.length - TRAILER_SIZE as u64;
        let trailer_buf = self.read_at(trailer_offset, TRAILER_SIZE)?;
        let trailer = Trailer::read_from(&mut Cursor::new(&trailer_buf))?;

        let codec = CodecId::from_ordinal(trailer.compression_codec)
            .ok_or(CodecError::UnknownCodec(trailer.compression_codec))?;
        let compression = Compression::new(codec);

        // Fileinfo spans from its offset to the data index offset.
        let fileinfo_len = trailer
            .data_index_offset
            .checked_sub(trailer.fileinfo_offset)
            .ok_or_else(|| {
                ReadError::Corrupt("fileinfo offset lies beyond the data index".to_string())
            })? as usize;
        let fileinfo_buf = self.read_at(trailer.fileinfo_offset, fileinfo_len)?;
        let info = FileInfo::read_from(&mut Cursor::new(&fileinfo_buf))?;

        let last_key = info.get(fileinfo::KEY_LASTKEY).map(|v| v.to_vec());
        let avg_key_len = be_u32_entry(&info, fileinfo::KEY_AVG_KEY_LEN);
        let avg_value_len = be_u32_entry(&info, fileinfo::KEY_AVG_VALUE_LEN);

        let comparator_id = info
            .get(fileinfo::KEY_COMPARATOR)
            .and_then(|v| std::str::from_utf8(v).ok())
            .ok_or_else(|| ReadError::UnknownComparator("<missing>".to_string()))?
            .to_string();
        let file_comparator = comparator::resolve(&comparator_id)
            .ok_or(ReadError::UnknownComparator(comparator_id))?;

        let data_index = if trailer.data_index_count == 0 {
            BlockIndex::empty(file_comparator.clone())
        } else {
            let end = if trailer.meta_index_count > 0 {
                trailer.meta_index_offset
            } else {
                trailer_offset
            };
            let len = end.checked_sub(trailer.data_index_offset).ok_or_else(|| {
                ReadError::Corrupt("data index offset lies beyond its end".to_string())
            })? as usize;
            let buf = self.read_at(trailer.data_index_offset, len)?;
            BlockIndex::read_from(
                &mut Cursor::new(&buf),
                trailer.data_index_count as usize,
                file_comparator.clone(),
            )?
        };

        // Meta-block names order lexicographically whatever the file's
        // comparator is.
        let meta_index = if trailer.meta_index_count > 0 {
            let len = trailer_offset
                .checked_sub(trailer.meta_index_offset)
                .ok_or_else(|| {
                    ReadError::Corrupt("meta index offset lies beyond the trailer".to_string())
                })? as usize;
            let buf = self.read_at(trailer.meta_index_offset, len)?;
            Some(BlockIndex::read_from(
                &mut Cursor::new(&buf),
                trailer.meta_index_count as usize,
                comparator::lexicographic(),
            )?)
        } else {
            None
        };

        self.loaded = Some(Loaded {
            trailer,
            compression,
            data_index,
            meta_index,
            fileinfo: info,
            comparator: file_comparator,
            last_key,
            avg_key_len,
            avg_value_len,
        });
        Ok(())
    }

    // ── Block loading ────────────────────────────────────────────────────────

    /// Load data block `i`, via the cache when one is attached.
    pub fn read_block(&self, i: usize) -> Result<Block, ReadError> {
        let loaded = self.loaded()?;
        let count = loaded.data_index.len();
        let (_, begin, uncompressed_size) = loaded
            .data_index
            .entry(i)
            .ok_or(ReadError::BlockOutOfRange { index: i, count })?;

        if let Some(cache) = &self.cache {
            let key = CacheKey { file: self.name.clone(), block: i };
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
        }

        // On-disk span: up to the next data block, else the first meta
        // block, else fileinfo.
        let end = if i + 1 < count {
            loaded.data_index.offsets()[i + 1]
        } else {
            match &loaded.meta_index {
                Some(meta) if !meta.is_empty() => meta.offsets()[0],
                _ => loaded.trailer.fileinfo_offset,
            }
        };
        let block = self.load_span(begin, end, uncompressed_size, DATA_BLOCK_MAGIC, &loaded.compression)?;

        if let Some(cache) = &self.cache {
            let key = CacheKey { file: self.name.clone(), block: i };
            cache.put(key, block.clone());
        }
        Ok(block)
    }

    /// Fetch a named meta block.  `Ok(None)` when the file has no meta
    /// blocks or the name is absent.
    pub fn get_meta_block(&self, name: &str) -> Result<Option<Block>, ReadError> {
        let loaded = self.loaded()?;
        let meta_index = match &loaded.meta_index {
            Some(index) => index,
            None => return Ok(None),
        };
        let i = match meta_index.block_containing_key(name.as_bytes()) {
            Some(i) => i,
            None => return Ok(None),
        };
        let (first_key, begin, uncompressed_size) = match meta_index.entry(i) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if first_key != name.as_bytes() {
            return Ok(None);
        }
        let end = if i + 1 < meta_index.len() {
            meta_index.offsets()[i + 1]
        } else {
            loaded.trailer.fileinfo_offset
        };
        let block =
            self.load_span(begin, end, uncompressed_size, META_BLOCK_MAGIC, &loaded.compression)?;
        Ok(Some(block))
    }

    fn load_span(
        &self,
        begin: u64,
        end: u64,
        uncompressed_size: u32,
        magic: &'static [u8; block::MAGIC_LEN],
        compression: &Compression,
    ) -> Result<Block, ReadError> {
        let compressed_len = end.checked_sub(begin).ok_or_else(|| {
            ReadError::Corrupt(format!("block span {begin}..{end} is inverted"))
        })? as usize;
        let raw = self.read_at(begin, compressed_len)?;
        let decompressed = compression.decompress_block(&raw, uncompressed_size as usize)?;
        check_magic(&decompressed, magic)?;
        Ok(Block::new(decompressed))
    }

    /// Positioned exact-length read.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut source = self.lock_source();
        source.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        source.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ReadError::ShortRead { offset, wanted: len }
            } else {
                ReadError::Io(e)
            }
        })?;
        Ok(buf)
    }

    fn lock_source(&self) -> MutexGuard<'_, R> {
        self.source.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn loaded(&self) -> Result<&Loaded, ReadError> {
        self.loaded.as_ref().ok_or(ReadError::NotLoaded)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// A fresh unpositioned scanner over this file.
    pub fn scanner(&self) -> Result<Scanner<'_, R>, ReadError> {
        self.loaded()?;
        Ok(Scanner::new(self))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trailer(&self) -> Result<&Trailer, ReadError> {
        Ok(&self.loaded()?.trailer)
    }

    pub fn fileinfo(&self) -> Result<&FileInfo, ReadError> {
        Ok(&self.loaded()?.fileinfo)
    }

    pub fn data_index(&self) -> Result<&BlockIndex, ReadError> {
        Ok(&self.loaded()?.data_index)
    }

    pub fn comparator(&self) -> Result<&Arc<dyn Comparator>, ReadError> {
        Ok(&self.loaded()?.comparator)
    }

    pub fn compression(&self) -> Result<CodecId, ReadError> {
        Ok(self.loaded()?.compression.id())
    }

    pub fn entry_count(&self) -> Result<u32, ReadError> {
        Ok(self.loaded()?.trailer.entry_count)
    }

    pub fn data_block_count(&self) -> Result<usize, ReadError> {
        Ok(self.loaded()?.data_index.len())
    }

    pub fn meta_block_count(&self) -> Result<usize, ReadError> {
        Ok(self.loaded()?.trailer.meta_index_count as usize)
    }

    /// First key in the file; `None` when empty.
    pub fn first_key(&self) -> Result<Option<&[u8]>, ReadError> {
        Ok(self.loaded()?.data_index.first_key(0))
    }

    /// Last key in the file; `None` when empty.
    pub fn last_key(&self) -> Result<Option<&[u8]>, ReadError> {
        Ok(self.loaded()?.last_key.as_deref())
    }

    /// Approximate median key, from block boundaries.
    pub fn midkey(&self) -> Result<&[u8], ReadError> {
        self.loaded()?.data_index.midkey()
    }

    pub fn avg_key_len(&self) -> Result<u32, ReadError> {
        Ok(self.loaded()?.avg_key_len)
    }

    pub fn avg_value_len(&self) -> Result<u32, ReadError> {
        Ok(self.loaded()?.avg_value_len)
    }

    /// In-memory footprint of the loaded indices.
    pub fn index_heap_size(&self) -> Result<usize, ReadError> {
        let loaded = self.loaded()?;
        let meta = loaded.meta_index.as_ref().map_or(0, |m| m.heap_size());
        Ok(loaded.data_index.heap_size() + meta)
    }
}

fn be_u32_entry(info: &FileInfo, key: &[u8]) -> u32 {
    info.get(key)
        .and_then(|v| <[u8; 4]>::try_from(v).ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0)
}
