//! Block indices — sorted first-key lookup tables for data and meta blocks.
//!
//! # On-disk layout
//!
//! ```text
//! magic    "IDXBLK)+" (8 bytes; omitted entirely when the index is empty)
//! entries  count × (offset i64 BE, uncompressed_size i32 BE,
//!                   length-prefixed first key)
//! ```
//!
//! The entry count lives in the trailer, not here.  Entries are written in
//! block order, which is first-key order because blocks are produced by a
//! strictly-increasing append stream.
//!
//! The data index is searched under the file's comparator; the meta index
//! under the plain lexicographic order, whatever the file comparator is.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::block::{check_magic, INDEX_BLOCK_MAGIC, MAGIC_LEN};
use crate::bytes::{read_byte_array, write_byte_array};
use crate::comparator::Comparator;
use crate::reader::ReadError;

// Per-entry overhead used for the heap estimate: offset + size fields plus
// the key vector header.
const INDEX_ENTRY_OVERHEAD: usize = 8 + 4 + std::mem::size_of::<Vec<u8>>();

// ── Writer side ──────────────────────────────────────────────────────────────

/// Accumulates `(first_key, offset, uncompressed_size)` records while a file
/// is being written, then serializes them in one pass at close.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    first_keys: Vec<Vec<u8>>,
    offsets: Vec<u64>,
    sizes: Vec<u32>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, first_key: Vec<u8>, offset: u64, uncompressed_size: u32) {
        self.first_keys.push(first_key);
        self.offsets.push(offset);
        self.sizes.push(uncompressed_size);
    }

    pub fn len(&self) -> usize {
        self.first_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_keys.is_empty()
    }

    /// Serialize the index.  Writes nothing when empty.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.first_keys.is_empty() {
            return Ok(());
        }
        w.write_all(INDEX_BLOCK_MAGIC)?;
        for i in 0..self.first_keys.len() {
            w.write_i64::<BigEndian>(self.offsets[i] as i64)?;
            w.write_i32::<BigEndian>(self.sizes[i] as i32)?;
            write_byte_array(w, &self.first_keys[i])?;
        }
        Ok(())
    }
}

// ── Reader side ──────────────────────────────────────────────────────────────

/// In-memory index: parallel arrays plus the comparator used to search them.
pub struct BlockIndex {
    first_keys: Vec<Vec<u8>>,
    offsets: Vec<u64>,
    sizes: Vec<u32>,
    comparator: Arc<dyn Comparator>,
    heap_size: usize,
}

impl std::fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockIndex")
            .field("first_keys", &self.first_keys)
            .field("offsets", &self.offsets)
            .field("sizes", &self.sizes)
            .field("heap_size", &self.heap_size)
            .finish()
    }
}

impl BlockIndex {
    /// An index with no blocks (empty file).
    pub fn empty(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            first_keys: Vec::new(),
            offsets: Vec::new(),
            sizes: Vec::new(),
            comparator,
            heap_size: 0,
        }
    }

    /// Deserialize `count` records.  The caller has positioned `r` at the
    /// index offset recorded in the trailer; `count` comes from the trailer.
    pub fn read_from<R: Read>(
        r: &mut R,
        count: usize,
        comparator: Arc<dyn Comparator>,
    ) -> Result<Self, ReadError> {
        let mut magic = [0u8; MAGIC_LEN];
        r.read_exact(&mut magic)?;
        check_magic(&magic, INDEX_BLOCK_MAGIC)?;

        let mut first_keys = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        let mut sizes = Vec::with_capacity(count);
        let mut heap_size = 0usize;
        for _ in 0..count {
            let offset = r.read_i64::<BigEndian>()? as u64;
            let size = r.read_i32::<BigEndian>()? as u32;
            let key = read_byte_array(r)?;
            heap_size += key.len() + INDEX_ENTRY_OVERHEAD;
            offsets.push(offset);
            sizes.push(size);
            first_keys.push(key);
        }
        Ok(Self { first_keys, offsets, sizes, comparator, heap_size })
    }

    pub fn len(&self) -> usize {
        self.first_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_keys.is_empty()
    }

    pub fn first_key(&self, i: usize) -> Option<&[u8]> {
        self.first_keys.get(i).map(|k| k.as_slice())
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// `(first_key, offset, uncompressed_size)` for block `i`.
    pub fn entry(&self, i: usize) -> Option<(&[u8], u64, u32)> {
        if i < self.first_keys.len() {
            Some((self.first_keys[i].as_slice(), self.offsets[i], self.sizes[i]))
        } else {
            None
        }
    }

    /// Rough in-memory footprint, for memory-pressure accounting upstream.
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// The block that may contain `key`: the exact first-key match, or the
    /// predecessor of the insertion point.  `None` when `key` sorts before
    /// the whole file.
    pub fn block_containing_key(&self, key: &[u8]) -> Option<usize> {
        let mut low = 0usize;
        let mut high = self.first_keys.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.comparator.compare(&self.first_keys[mid], key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        // `low` is now the insertion point.
        if low == 0 {
            None
        } else {
            Some(low - 1)
        }
    }

    /// Approximate median key, taken from block boundaries only.
    pub fn midkey(&self) -> Result<&[u8], ReadError> {
        if self.first_keys.is_empty() {
            return Err(ReadError::Empty);
        }
        Ok(&self.first_keys[(self.first_keys.len() - 1) / 2])
    }
}
