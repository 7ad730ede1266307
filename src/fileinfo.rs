//! FileInfo — the small ordered metadata map persisted with every file.
//!
//! Keys prefixed `hfile.` (case-insensitive) are reserved for the engine;
//! the writer injects them at close and rejects user appends that collide.
//!
//! # Serialized form
//!
//! ```text
//! entry_count  (4 bytes, big-endian)
//! entries      entry_count × (length-prefixed key, length-prefixed value)
//! ```
//!
//! Entries are serialized in key order; the map is small and read eagerly.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::bytes::{read_byte_array, write_byte_array};

/// Prefix reserved for engine-written entries, matched case-insensitively.
pub const RESERVED_PREFIX: &[u8] = b"hfile.";

/// Last key appended to the file.  Absent when the file has no entries.
pub const KEY_LASTKEY: &[u8] = b"hfile.LASTKEY";
/// Mean key length, 4-byte big-endian.
pub const KEY_AVG_KEY_LEN: &[u8] = b"hfile.AVG_KEY_LEN";
/// Mean value length, 4-byte big-endian.
pub const KEY_AVG_VALUE_LEN: &[u8] = b"hfile.AVG_VALUE_LEN";
/// Identity of the file's comparator, UTF-8.
pub const KEY_COMPARATOR: &[u8] = b"hfile.COMPARATOR";

/// True when `key` falls in the reserved namespace.
pub fn is_reserved_key(key: &[u8]) -> bool {
    key.len() >= RESERVED_PREFIX.len()
        && key[..RESERVED_PREFIX.len()].eq_ignore_ascii_case(RESERVED_PREFIX)
}

/// Ordered byte-array → byte-array map.
#[derive(Debug, Default, Clone)]
pub struct FileInfo {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl FileInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unconditionally.  Reserved-prefix policy is enforced by the
    /// writer's public append path, not here.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for (key, value) in &self.entries {
            write_byte_array(w, key)?;
            write_byte_array(w, value)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let count = r.read_u32::<BigEndian>()? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = read_byte_array(r)?;
            let value = read_byte_array(r)?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_preserves_order_and_payloads() {
        let mut info = FileInfo::new();
        info.insert(b"zeta".to_vec(), b"last".to_vec());
        info.insert(b"alpha".to_vec(), vec![0, 1, 2, 255]);
        info.insert(b"empty".to_vec(), Vec::new());

        let mut buf = Vec::new();
        info.write_to(&mut buf).unwrap();
        let decoded = FileInfo::read_from(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.get(b"alpha"), Some(&[0u8, 1, 2, 255][..]));
        assert_eq!(decoded.get(b"empty"), Some(&[][..]));
        let keys: Vec<&[u8]> = decoded.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"alpha"[..], b"empty", b"zeta"]);
    }

    #[test]
    fn reserved_prefix_is_case_insensitive() {
        assert!(is_reserved_key(b"hfile.LASTKEY"));
        assert!(is_reserved_key(b"HFILE.custom"));
        assert!(is_reserved_key(b"HFile.x"));
        assert!(!is_reserved_key(b"hfile_x"));
        assert!(!is_reserved_key(b"hfil"));
        assert!(!is_reserved_key(b"user.key"));
    }
}
