//! Compression codecs: frozen ordinal identities + pooled contexts.
//!
//! # Identity rules
//! Every codec is identified by a small integer ordinal.  That ordinal is:
//!   - Written into the trailer of every file.
//!   - Assigned in registration order and never reused, even if a codec is
//!     retired.
//! A reader that cannot resolve a file's ordinal MUST fail immediately —
//! no negotiation, no fallback decode.
//!
//! # Pooling
//! Compression contexts can be expensive to set up (zstd in particular
//! keeps reusable dictionaries and workspaces).  Each [`Compression`]
//! facade owns one pool of compressors and one of decompressors; every
//! block operation borrows a context through an RAII guard that returns it
//! on drop, so contexts go back to the pool on error paths too.

use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use thiserror::Error;

/// Zstd level used for all blocks.  Balanced speed/ratio.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

// ── Codec identities ─────────────────────────────────────────────────────────

/// Registered codec, carrying the frozen on-disk ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    /// Blocks stored verbatim.
    None,
    /// DEFLATE in a gzip wrapper.
    Gz,
    /// LZ4 with a length prefix — maximum throughput, lower ratio.
    Lz4,
    /// Zstandard — balanced speed/ratio.
    Zstd,
}

impl CodecId {
    /// The frozen ordinal written into the trailer.
    #[inline]
    pub fn ordinal(self) -> i32 {
        match self {
            CodecId::None => 0,
            CodecId::Gz => 1,
            CodecId::Lz4 => 2,
            CodecId::Zstd => 3,
        }
    }

    /// Resolve a trailer ordinal.  `None` when this build does not know it.
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(CodecId::None),
            1 => Some(CodecId::Gz),
            2 => Some(CodecId::Lz4),
            3 => Some(CodecId::Zstd),
            _ => None,
        }
    }

    /// Human-readable name (diagnostics and CLI only — never parsed off disk).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Gz => "gz",
            CodecId::Lz4 => "lz4",
            CodecId::Zstd => "zstd",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "gz" => Some(CodecId::Gz),
            "lz4" => Some(CodecId::Lz4),
            "zstd" => Some(CodecId::Zstd),
            _ => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    /// Emitted when a trailer names an ordinal this build cannot resolve.
    /// Decoding MUST NOT continue.
    #[error("compression codec ordinal {0} is not registered — cannot decode")]
    UnknownCodec(i32),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

// ── Context traits ───────────────────────────────────────────────────────────

/// A reusable compression context.  One block per call.
pub trait Compressor: Send {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// A reusable decompression context.  `uncompressed_size` is the exact
/// decoded length recorded in the block index.
pub trait Decompressor: Send {
    fn decompress(&mut self, input: &[u8], uncompressed_size: usize)
        -> Result<Vec<u8>, CodecError>;
}

// ── Built-in contexts ────────────────────────────────────────────────────────

struct NoneCompressor;
impl Compressor for NoneCompressor {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(input.to_vec())
    }
}

struct NoneDecompressor;
impl Decompressor for NoneDecompressor {
    fn decompress(&mut self, input: &[u8], _: usize) -> Result<Vec<u8>, CodecError> {
        Ok(input.to_vec())
    }
}

struct GzCompressor {
    level: flate2::Compression,
}
impl Compressor for GzCompressor {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = flate2::write::GzEncoder::new(
            Vec::with_capacity(input.len() / 2 + 64),
            self.level,
        );
        enc.write_all(input)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish()
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
}

struct GzDecompressor;
impl Decompressor for GzDecompressor {
    fn decompress(&mut self, input: &[u8], uncompressed_size: usize)
        -> Result<Vec<u8>, CodecError>
    {
        let mut out = Vec::with_capacity(uncompressed_size);
        flate2::read::GzDecoder::new(input)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

struct Lz4Compressor;
impl Compressor for Lz4Compressor {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(input))
    }
}

struct Lz4Decompressor;
impl Decompressor for Lz4Decompressor {
    fn decompress(&mut self, input: &[u8], _: usize) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(input)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

struct ZstdCompressor {
    ctx: zstd::bulk::Compressor<'static>,
}
impl ZstdCompressor {
    fn new(level: i32) -> Result<Self, CodecError> {
        let ctx = zstd::bulk::Compressor::new(level)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(Self { ctx })
    }
}
impl Compressor for ZstdCompressor {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.ctx
            .compress(input)
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
}

struct ZstdDecompressor {
    ctx: zstd::bulk::Decompressor<'static>,
}
impl ZstdDecompressor {
    fn new() -> Result<Self, CodecError> {
        let ctx = zstd::bulk::Decompressor::new()
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(Self { ctx })
    }
}
impl Decompressor for ZstdDecompressor {
    fn decompress(&mut self, input: &[u8], uncompressed_size: usize)
        -> Result<Vec<u8>, CodecError>
    {
        self.ctx
            .decompress(input, uncompressed_size)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

fn new_compressor(id: CodecId) -> Result<Box<dyn Compressor>, CodecError> {
    Ok(match id {
        CodecId::None => Box::new(NoneCompressor),
        CodecId::Gz => Box::new(GzCompressor { level: flate2::Compression::default() }),
        CodecId::Lz4 => Box::new(Lz4Compressor),
        CodecId::Zstd => Box::new(ZstdCompressor::new(DEFAULT_ZSTD_LEVEL)?),
    })
}

fn new_decompressor(id: CodecId) -> Result<Box<dyn Decompressor>, CodecError> {
    Ok(match id {
        CodecId::None => Box::new(NoneDecompressor),
        CodecId::Gz => Box::new(GzDecompressor),
        CodecId::Lz4 => Box::new(Lz4Decompressor),
        CodecId::Zstd => Box::new(ZstdDecompressor::new()?),
    })
}

// ── Pool ─────────────────────────────────────────────────────────────────────

/// Thread-safe pool of reusable contexts.  Borrowing hands out an idle item
/// or builds a fresh one; the guard returns the item on drop.
pub struct Pool<T> {
    make: Box<dyn Fn() -> Result<T, CodecError> + Send + Sync>,
    idle: Mutex<Vec<T>>,
}

impl<T> Pool<T> {
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> Result<T, CodecError> + Send + Sync + 'static,
    {
        Self { make: Box::new(make), idle: Mutex::new(Vec::new()) }
    }

    pub fn borrow(&self) -> Result<Pooled<'_, T>, CodecError> {
        let recycled = self
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        let item = match recycled {
            Some(item) => item,
            None => (self.make)()?,
        };
        Ok(Pooled { pool: self, item: Some(item) })
    }

    /// Number of contexts currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// RAII borrow from a [`Pool`].
pub struct Pooled<'p, T> {
    pool: &'p Pool<T>,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            // The item is only vacated in drop.
            None => unreachable!("pooled item accessed after drop"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after drop"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(item);
        }
    }
}

// ── Facade ───────────────────────────────────────────────────────────────────

/// Per-file compression facade: the codec identity plus its context pools.
///
/// A writer owns one for the lifetime of the file; a reader builds one from
/// the trailer ordinal.  Shareable across scanner threads.
pub struct Compression {
    id: CodecId,
    compressors: Pool<Box<dyn Compressor>>,
    decompressors: Pool<Box<dyn Decompressor>>,
}

impl Compression {
    pub fn new(id: CodecId) -> Self {
        Self {
            id,
            compressors: Pool::new(move || new_compressor(id)),
            decompressors: Pool::new(move || new_decompressor(id)),
        }
    }

    #[inline]
    pub fn id(&self) -> CodecId {
        self.id
    }

    /// Compress one block with a pooled context.
    pub fn compress_block(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut ctx = self.compressors.borrow()?;
        ctx.compress(data)
    }

    /// Decompress one block with a pooled context and verify the decoded
    /// length against the size recorded in the index.
    pub fn decompress_block(
        &self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let out = {
            let mut ctx = self.decompressors.borrow()?;
            ctx.decompress(data, uncompressed_size)?
        };
        if out.len() != uncompressed_size {
            return Err(CodecError::Decompression(format!(
                "index records {uncompressed_size} uncompressed bytes, codec produced {}",
                out.len()
            )));
        }
        Ok(out)
    }
}
