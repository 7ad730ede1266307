//! # hfile — immutable sorted block-indexed key/value files
//!
//! Format guarantees (frozen in v1):
//! - All numeric fields are big-endian; never negotiated
//! - Every section is prefixed by an 8-byte magic sentinel; any mismatch on
//!   read aborts with a hard error
//! - Keys are strictly increasing under the file's comparator; the
//!   comparator identity travels with the file and MUST resolve on read
//! - Data blocks are indexed by their first key; a binary-search miss lands
//!   on the predecessor block by construction
//! - The 60-byte trailer at end-of-file locates every other section; readers
//!   reject any trailer version other than 1
//! - The compression codec is a frozen integer ordinal in the trailer;
//!   readers fail immediately on an unregistered ordinal — no fallback
//! - Files are immutable once closed; there is no in-place mutation path

pub mod block;
pub mod bytes;
pub mod cache;
pub mod codec;
pub mod comparator;
pub mod fileinfo;
pub mod index;
pub mod reader;
pub mod scanner;
pub mod trailer;
pub mod writer;

// Flat re-exports for the most common types.
pub use block::{Block, DATA_BLOCK_MAGIC, INDEX_BLOCK_MAGIC, MAGIC_LEN,
                META_BLOCK_MAGIC, TRAILER_MAGIC};
pub use cache::{BlockCache, CacheKey, SimpleBlockCache};
pub use codec::{CodecError, CodecId, Compression};
pub use comparator::{Comparator, LexicographicComparator};
pub use fileinfo::FileInfo;
pub use index::{BlockIndex, IndexBuilder};
pub use reader::{ReadError, Reader};
pub use scanner::{Scanner, SeekOutcome};
pub use trailer::{Trailer, FORMAT_VERSION, TRAILER_SIZE};
pub use writer::{WriteError, WriteOptions, Writer, DEFAULT_BLOCK_SIZE, MAX_KEY_LENGTH};
