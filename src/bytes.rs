//! Shared byte coding helpers: big-endian length-prefixed arrays and
//! in-buffer cursor reads.
//!
//! Every multi-byte integer in the format is big-endian.  Length-prefixed
//! byte arrays are a 4-byte big-endian length followed by the raw bytes;
//! they appear in the fileinfo map and in index entries.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Upper bound accepted for a length prefix.  Guards block and metadata
/// parsing against allocating on a corrupt length field.
pub const MAX_BYTE_ARRAY_LEN: usize = 1 << 30;

/// Write `bytes` as a 4-byte big-endian length followed by the bytes.
pub fn write_byte_array<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

/// Read a length-prefixed byte array written by [`write_byte_array`].
pub fn read_byte_array<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()? as usize;
    if len > MAX_BYTE_ARRAY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("byte array length {len} exceeds the {MAX_BYTE_ARRAY_LEN} B cap"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a big-endian u32 at `pos` without advancing anything.
/// Returns `None` when fewer than four bytes remain.
pub fn be_u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    let end = pos.checked_add(4)?;
    let bytes: [u8; 4] = buf.get(pos..end)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Render a key for diagnostics: quoted when printable ASCII, hex otherwise.
pub fn display_key(key: &[u8]) -> String {
    if !key.is_empty() && key.iter().all(|&b| (0x20..0x7f).contains(&b)) {
        format!("\"{}\"", String::from_utf8_lossy(key))
    } else {
        format!("0x{}", hex::encode(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn byte_array_roundtrip() {
        let mut buf = Vec::new();
        write_byte_array(&mut buf, b"payload").unwrap();
        write_byte_array(&mut buf, b"").unwrap();
        let mut r = Cursor::new(buf);
        assert_eq!(read_byte_array(&mut r).unwrap(), b"payload");
        assert_eq!(read_byte_array(&mut r).unwrap(), b"");
    }

    #[test]
    fn byte_array_rejects_corrupt_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let err = read_byte_array(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn cursor_read_is_bounds_checked() {
        let buf = [0u8, 0, 1, 2, 3];
        assert_eq!(be_u32_at(&buf, 1), Some(0x0001_0203));
        assert_eq!(be_u32_at(&buf, 2), None);
        assert_eq!(be_u32_at(&buf, usize::MAX), None);
    }

    #[test]
    fn key_display() {
        assert_eq!(display_key(b"row17"), "\"row17\"");
        assert_eq!(display_key(&[0x00, 0xff]), "0x00ff");
        assert_eq!(display_key(b""), "0x");
    }
}
