//! Fixed trailer — the 60-byte record at end-of-file that locates every
//! other section.
//!
//! # On-disk layout (60 bytes, all integers big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   magic                    = "TRABLK\"$"
//!    8      8   fileinfo_offset          (i64)
//!   16      8   data_index_offset        (i64)
//!   24      4   data_index_count         (i32)
//!   28      8   meta_index_offset        (i64, 0 when no meta blocks)
//!   36      4   meta_index_count         (i32)
//!   40      8   total_uncompressed_bytes (i64)
//!   48      4   entry_count              (i32)
//!   52      4   compression_codec        (i32 ordinal)
//!   56      4   version                  = 1 (i32)
//! ```
//!
//! Readers seek to `file_length - 60`, parse, and reject any magic or
//! version mismatch before touching the rest of the file.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::block::{check_magic, MAGIC_LEN, TRAILER_MAGIC};
use crate::reader::ReadError;

/// Serialized trailer size in bytes.
pub const TRAILER_SIZE: usize = 60;

/// Format version this engine writes and the only one it reads.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub fileinfo_offset: u64,
    pub data_index_offset: u64,
    pub data_index_count: u32,
    pub meta_index_offset: u64,
    pub meta_index_count: u32,
    pub total_uncompressed_bytes: u64,
    pub entry_count: u32,
    /// Codec ordinal; resolved (and possibly rejected) by the reader.
    pub compression_codec: i32,
    pub version: u32,
}

impl Trailer {
    /// Write the fixed 60-byte record.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(TRAILER_MAGIC)?;
        w.write_i64::<BigEndian>(self.fileinfo_offset as i64)?;
        w.write_i64::<BigEndian>(self.data_index_offset as i64)?;
        w.write_i32::<BigEndian>(self.data_index_count as i32)?;
        w.write_i64::<BigEndian>(self.meta_index_offset as i64)?;
        w.write_i32::<BigEndian>(self.meta_index_count as i32)?;
        w.write_i64::<BigEndian>(self.total_uncompressed_bytes as i64)?;
        w.write_i32::<BigEndian>(self.entry_count as i32)?;
        w.write_i32::<BigEndian>(self.compression_codec)?;
        w.write_i32::<BigEndian>(self.version as i32)
    }

    /// Read and validate a trailer: magic first, then version.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ReadError> {
        let mut magic = [0u8; MAGIC_LEN];
        r.read_exact(&mut magic)?;
        check_magic(&magic, TRAILER_MAGIC)?;

        let trailer = Self {
            fileinfo_offset: r.read_i64::<BigEndian>()? as u64,
            data_index_offset: r.read_i64::<BigEndian>()? as u64,
            data_index_count: r.read_i32::<BigEndian>()? as u32,
            meta_index_offset: r.read_i64::<BigEndian>()? as u64,
            meta_index_count: r.read_i32::<BigEndian>()? as u32,
            total_uncompressed_bytes: r.read_i64::<BigEndian>()? as u64,
            entry_count: r.read_i32::<BigEndian>()? as u32,
            compression_codec: r.read_i32::<BigEndian>()?,
            version: r.read_i32::<BigEndian>()? as u32,
        };

        if trailer.version != FORMAT_VERSION {
            return Err(ReadError::UnsupportedVersion(trailer.version));
        }
        Ok(trailer)
    }
}
