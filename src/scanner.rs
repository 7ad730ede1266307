//! Scanner — a positional cursor over the file's logical key sequence.
//!
//! A scanner starts unpositioned: only the seek operations are legal until
//! one succeeds.  Once positioned, the cursor names the start of the
//! current entry's key bytes within the current block, and `key`/`value`
//! hand out zero-copy slices of that block.  `next` walks entries in
//! comparator order, crossing block boundaries transparently; running off
//! the last entry clears the position again.
//!
//! Intra-block seeks are a linear walk: entries carry no skip structure, so
//! the scanner reads each 8-byte header, compares, and either stops,
//! advances, or backtracks to the previous entry.  Backtracking rewinds
//! past the previous entry's payload plus two header pairs when it
//! overshot mid-block, but only one header pair when the walk ran off the
//! block end, because that final header was already consumed.

use std::cmp::Ordering;
use std::io::{Read, Seek};

use crate::block::Block;
use crate::bytes::be_u32_at;
use crate::reader::{ReadError, Reader};

/// Where a [`Scanner::seek_to`] landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The target sorts before every key in the file; position unchanged.
    BeforeFirst,
    /// The cursor is on the target key.
    Exact,
    /// The cursor is on the greatest key smaller than the target.
    Predecessor,
}

pub struct Scanner<'r, R: Read + Seek> {
    reader: &'r Reader<R>,
    block: Option<Block>,
    block_index: usize,
    /// Offset of the current entry's key bytes within the block data.
    cursor: usize,
    key_len: usize,
    value_len: usize,
}

impl<'r, R: Read + Seek> Scanner<'r, R> {
    pub(crate) fn new(reader: &'r Reader<R>) -> Self {
        Self {
            reader,
            block: None,
            block_index: 0,
            cursor: 0,
            key_len: 0,
            value_len: 0,
        }
    }

    /// True once a seek has positioned the cursor.
    pub fn is_seeked(&self) -> bool {
        self.block.is_some()
    }

    /// Position on the first entry of the file.  False when the file is
    /// empty.
    pub fn seek_to_first(&mut self) -> Result<bool, ReadError> {
        if self.reader.data_index()?.is_empty() {
            return Ok(false);
        }
        self.load_block(0)?;
        self.position_at(0)?;
        Ok(true)
    }

    /// Position on `key` exactly, or on its greatest predecessor.
    pub fn seek_to(&mut self, key: &[u8]) -> Result<SeekOutcome, ReadError> {
        let target = match self.reader.data_index()?.block_containing_key(key) {
            Some(i) => i,
            None => return Ok(SeekOutcome::BeforeFirst),
        };
        self.load_block(target)?;
        self.block_seek(key, false)
    }

    /// Position on the entry strictly before `key`.  False when no entry
    /// precedes it.
    pub fn seek_before(&mut self, key: &[u8]) -> Result<bool, ReadError> {
        let index = self.reader.data_index()?;
        let mut target = match index.block_containing_key(key) {
            Some(i) => i,
            None => return Ok(false),
        };
        // A target equal to the block's first key has its predecessor in
        // the previous block.
        if let Some(first) = index.first_key(target) {
            if self.reader.comparator()?.compare(key, first) == Ordering::Equal {
                if target == 0 {
                    return Ok(false);
                }
                target -= 1;
            }
        }
        self.load_block(target)?;
        self.block_seek(key, true)?;
        Ok(true)
    }

    /// Advance to the next entry, crossing into the next block when the
    /// current one is exhausted.  False at end-of-file, which also clears
    /// the position.
    pub fn next(&mut self) -> Result<bool, ReadError> {
        let block = match self.block.clone() {
            Some(block) => block,
            None => return Err(ReadError::NotSeeked),
        };
        let next_header = self.cursor + self.key_len + self.value_len;
        if next_header >= block.data().len() {
            if self.block_index + 1 >= self.reader.data_index()?.len() {
                self.block = None;
                self.cursor = 0;
                self.key_len = 0;
                self.value_len = 0;
                return Ok(false);
            }
            let next_index = self.block_index + 1;
            self.block = Some(self.reader.read_block(next_index)?);
            self.block_index = next_index;
            self.position_at(0)?;
            return Ok(true);
        }
        self.position_at(next_header)?;
        Ok(true)
    }

    /// The current key, zero-copy.
    pub fn key(&self) -> Result<&[u8], ReadError> {
        let block = self.block.as_ref().ok_or(ReadError::NotSeeked)?;
        block
            .data()
            .get(self.cursor..self.cursor + self.key_len)
            .ok_or_else(|| ReadError::Corrupt("cursor overruns its block".to_string()))
    }

    /// The current value, zero-copy.
    pub fn value(&self) -> Result<&[u8], ReadError> {
        let block = self.block.as_ref().ok_or(ReadError::NotSeeked)?;
        let start = self.cursor + self.key_len;
        block
            .data()
            .get(start..start + self.value_len)
            .ok_or_else(|| ReadError::Corrupt("cursor overruns its block".to_string()))
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Make block `i` current, reusing the loaded one when possible, and
    /// rewind the cursor.
    fn load_block(&mut self, i: usize) -> Result<(), ReadError> {
        let reusable = self.block.is_some() && self.block_index == i;
        if !reusable {
            self.block = Some(self.reader.read_block(i)?);
            self.block_index = i;
        }
        self.cursor = 0;
        self.key_len = 0;
        self.value_len = 0;
        Ok(())
    }

    /// Adopt the entry whose header starts at `header_pos`.
    fn position_at(&mut self, header_pos: usize) -> Result<(), ReadError> {
        let block = match self.block.clone() {
            Some(block) => block,
            None => return Err(ReadError::NotSeeked),
        };
        self.position_in(&block, header_pos)
    }

    fn position_in(&mut self, block: &Block, header_pos: usize) -> Result<(), ReadError> {
        let data = block.data();
        let key_len = be_u32_at(data, header_pos).ok_or_else(|| truncated(header_pos))? as usize;
        let value_len =
            be_u32_at(data, header_pos + 4).ok_or_else(|| truncated(header_pos + 4))? as usize;
        let key_start = header_pos + 8;
        if key_start + key_len + value_len > data.len() {
            return Err(ReadError::Corrupt(format!(
                "entry at block offset {header_pos} overruns its block"
            )));
        }
        self.cursor = key_start;
        self.key_len = key_len;
        self.value_len = value_len;
        Ok(())
    }

    /// Linear walk through the current block.
    ///
    /// Returns `Exact` when the cursor landed on the target key, else
    /// `Predecessor` with the cursor on the greatest smaller key.  With
    /// `seek_before`, an exact hit positions on the entry preceding the
    /// target instead.
    fn block_seek(&mut self, key: &[u8], seek_before: bool) -> Result<SeekOutcome, ReadError> {
        let block = match self.block.clone() {
            Some(block) => block,
            None => return Err(ReadError::NotSeeked),
        };
        let data = block.data();
        let comparator = self.reader.comparator()?.clone();

        let mut pos = 0usize;
        // key_len + value_len of the previously walked entry.
        let mut last_len = 0usize;
        loop {
            let key_len = be_u32_at(data, pos).ok_or_else(|| truncated(pos))? as usize;
            let value_len = be_u32_at(data, pos + 4).ok_or_else(|| truncated(pos + 4))? as usize;
            let key_start = pos + 8;
            let entry_key = data
                .get(key_start..key_start + key_len)
                .ok_or_else(|| truncated(key_start))?;

            match comparator.compare(key, entry_key) {
                Ordering::Equal if !seek_before => {
                    self.cursor = key_start;
                    self.key_len = key_len;
                    self.value_len = value_len;
                    return Ok(SeekOutcome::Exact);
                }
                // Overshot the target (or hit it while seeking before it):
                // rewind past the previous entry's payload and both header
                // pairs to adopt that previous entry.
                Ordering::Equal | Ordering::Less => {
                    let previous = key_start.checked_sub(last_len + 16).ok_or_else(|| {
                        ReadError::Corrupt(
                            "no entry precedes the seek target in its block".to_string(),
                        )
                    })?;
                    self.position_in(&block, previous)?;
                    return Ok(SeekOutcome::Predecessor);
                }
                Ordering::Greater => {
                    pos = key_start + key_len + value_len;
                    last_len = key_len + value_len;
                    if pos >= data.len() {
                        break;
                    }
                }
            }
        }

        // The target follows every key here.  Rewind the final entry's
        // payload plus the one header pair already consumed — not two, the
        // walk stopped after the payload rather than after a fresh header.
        let last = pos
            .checked_sub(last_len + 8)
            .ok_or_else(|| ReadError::Corrupt("block holds no entries".to_string()))?;
        self.position_in(&block, last)?;
        Ok(SeekOutcome::Predecessor)
    }
}

fn truncated(pos: usize) -> ReadError {
    ReadError::Corrupt(format!("block truncated at offset {pos}"))
}
