use std::cmp::Ordering;
use std::io::Cursor;
use std::sync::Arc;

use proptest::collection::btree_map;
use proptest::prelude::*;

use hfile::codec::{CodecError, CodecId};
use hfile::comparator::{self, Comparator};
use hfile::reader::{ReadError, Reader};
use hfile::scanner::SeekOutcome;
use hfile::writer::{WriteError, WriteOptions, Writer};
use hfile::{Block, SimpleBlockCache};

fn kv(i: usize) -> (Vec<u8>, Vec<u8>) {
    (format!("k{i:04}").into_bytes(), format!("v{i:04}").into_bytes())
}

fn write_entries(block_size: usize, compression: CodecId, n: usize) -> Vec<u8> {
    let options = WriteOptions { block_size, compression, ..Default::default() };
    let mut writer = Writer::with_options(Cursor::new(Vec::new()), options);
    for i in 0..n {
        let (key, value) = kv(i);
        writer.append(&key, &value).unwrap();
    }
    writer.close().unwrap().into_inner()
}

fn open_bytes(bytes: Vec<u8>) -> Reader<Cursor<Vec<u8>>> {
    let length = bytes.len() as u64;
    let mut reader = Reader::new(Cursor::new(bytes), length, "test.hfile");
    reader.load_metadata().unwrap();
    reader
}

fn first_key_of(block: &Block) -> Vec<u8> {
    let data = block.data();
    let key_len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    data[8..8 + key_len].to_vec()
}

// ── Empty and tiny files ─────────────────────────────────────────────────────

#[test]
fn empty_file_has_metadata_but_no_entries() {
    let writer = Writer::new(Cursor::new(Vec::new()));
    let bytes = writer.close().unwrap().into_inner();
    let reader = open_bytes(bytes);

    let trailer = reader.trailer().unwrap();
    assert_eq!(trailer.data_index_count, 0);
    assert_eq!(trailer.meta_index_count, 0);
    assert_eq!(trailer.entry_count, 0);

    assert_eq!(reader.avg_key_len().unwrap(), 0);
    assert_eq!(reader.avg_value_len().unwrap(), 0);
    assert_eq!(reader.first_key().unwrap(), None);
    assert_eq!(reader.last_key().unwrap(), None);

    let info = reader.fileinfo().unwrap();
    assert!(info.get(b"hfile.COMPARATOR").is_some());
    assert!(info.get(b"hfile.LASTKEY").is_none());

    assert!(matches!(reader.midkey().unwrap_err(), ReadError::Empty));

    let mut scanner = reader.scanner().unwrap();
    assert!(!scanner.seek_to_first().unwrap());
    assert_eq!(scanner.seek_to(b"anything").unwrap(), SeekOutcome::BeforeFirst);
    assert!(!scanner.is_seeked());
}

#[test]
fn single_entry_roundtrip() {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.append(b"a", b"1").unwrap();
    let reader = open_bytes(writer.close().unwrap().into_inner());

    assert_eq!(reader.entry_count().unwrap(), 1);
    assert_eq!(reader.first_key().unwrap(), Some(&b"a"[..]));
    assert_eq!(reader.last_key().unwrap(), Some(&b"a"[..]));
    assert_eq!(reader.midkey().unwrap(), b"a");

    let mut scanner = reader.scanner().unwrap();
    assert_eq!(scanner.seek_to(b"a").unwrap(), SeekOutcome::Exact);
    assert_eq!(scanner.key().unwrap(), b"a");
    assert_eq!(scanner.value().unwrap(), b"1");

    assert!(!scanner.next().unwrap());
    assert!(!scanner.is_seeked());
    assert!(matches!(scanner.key().unwrap_err(), ReadError::NotSeeked));
}

// ── Multi-block scans and lookups ────────────────────────────────────────────

#[test]
fn thousand_entries_scan_across_blocks() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));
    assert!(reader.data_block_count().unwrap() >= 50);
    assert_eq!(reader.entry_count().unwrap(), 1000);

    let mut scanner = reader.scanner().unwrap();
    assert!(scanner.seek_to_first().unwrap());
    for i in 0..1000 {
        let (key, value) = kv(i);
        assert_eq!(scanner.key().unwrap(), &key[..], "entry {i}");
        assert_eq!(scanner.value().unwrap(), &value[..], "entry {i}");
        let advanced = scanner.next().unwrap();
        assert_eq!(advanced, i != 999);
    }
    assert!(!scanner.is_seeked());
}

#[test]
fn exact_lookup_finds_every_written_key() {
    let reader = open_bytes(write_entries(64, CodecId::None, 300));
    let mut scanner = reader.scanner().unwrap();
    for i in 0..300 {
        let (key, value) = kv(i);
        assert_eq!(scanner.seek_to(&key).unwrap(), SeekOutcome::Exact);
        assert_eq!(scanner.key().unwrap(), &key[..]);
        assert_eq!(scanner.value().unwrap(), &value[..]);
    }
}

#[test]
fn predecessor_lookup_between_written_keys() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));
    let mut scanner = reader.scanner().unwrap();

    // "k0050a" sorts between k0050 and k0051; k0050 may well be the last
    // key of its block, exercising the end-of-block backtrack.
    assert_eq!(scanner.seek_to(b"k0050a").unwrap(), SeekOutcome::Predecessor);
    assert_eq!(scanner.key().unwrap(), b"k0050");
    assert_eq!(scanner.value().unwrap(), b"v0050");

    for probe in [47usize, 48, 511, 997] {
        let (key, value) = kv(probe);
        // key < key+"!" < next key, since '!' sorts below every digit.
        let mut q = key.clone();
        q.push(b'!');
        assert_eq!(scanner.seek_to(&q).unwrap(), SeekOutcome::Predecessor);
        assert_eq!(scanner.key().unwrap(), &key[..]);
        assert_eq!(scanner.value().unwrap(), &value[..]);
    }
}

#[test]
fn seeks_outside_the_key_range() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));
    let mut scanner = reader.scanner().unwrap();

    // Before the first key: not positioned, state untouched.
    assert_eq!(scanner.seek_to(b"a").unwrap(), SeekOutcome::BeforeFirst);
    assert!(!scanner.is_seeked());

    // After the last key: positioned on the final entry.
    assert_eq!(scanner.seek_to(b"z").unwrap(), SeekOutcome::Predecessor);
    assert_eq!(scanner.key().unwrap(), b"k0999");
    assert!(!scanner.next().unwrap());
}

#[test]
fn seek_is_idempotent() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));
    let mut scanner = reader.scanner().unwrap();
    for _ in 0..3 {
        assert_eq!(scanner.seek_to(b"k0500").unwrap(), SeekOutcome::Exact);
        assert_eq!(scanner.key().unwrap(), b"k0500");
        assert_eq!(scanner.value().unwrap(), b"v0500");
    }
    // Rewinding within the already-loaded block works too.
    assert_eq!(scanner.seek_to(b"k0501").unwrap(), SeekOutcome::Exact);
    assert_eq!(scanner.seek_to(b"k0500").unwrap(), SeekOutcome::Exact);
    assert_eq!(scanner.key().unwrap(), b"k0500");
}

#[test]
fn seek_before_lands_on_the_previous_entry() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));

    // Locate the first key of block 3 and the entry preceding it (the last
    // key of block 2).
    let boundary = reader.data_index().unwrap().first_key(3).unwrap().to_vec();
    let boundary_at = (0..1000)
        .position(|i| kv(i).0 == boundary)
        .expect("block 3 boundary must be a written key");
    let (previous, previous_value) = kv(boundary_at - 1);

    let mut scanner = reader.scanner().unwrap();
    assert!(scanner.seek_before(&boundary).unwrap());
    assert_eq!(scanner.key().unwrap(), &previous[..]);
    assert_eq!(scanner.value().unwrap(), &previous_value[..]);

    // Mid-block case.
    assert!(scanner.seek_before(b"k0013").unwrap());
    assert_eq!(scanner.key().unwrap(), b"k0012");

    // Nothing precedes the first key.
    assert!(!scanner.seek_before(b"k0000").unwrap());

    // Nothing precedes a key before the whole file either.
    assert!(!scanner.seek_before(b"a").unwrap());
}

#[test]
fn index_records_each_blocks_first_key() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));
    let index = reader.data_index().unwrap();
    for i in 0..index.len() {
        let block = reader.read_block(i).unwrap();
        assert_eq!(first_key_of(&block), index.first_key(i).unwrap(), "block {i}");
    }
}

#[test]
fn block_sizes_stay_near_the_target() {
    let reader = open_bytes(write_entries(64, CodecId::None, 1000));
    let index = reader.data_index().unwrap();
    // Each entry is 8 header bytes plus a 5-byte key and 5-byte value.
    let max_entry = 8 + 5 + 5;
    for i in 0..index.len() - 1 {
        let (_, _, size) = index.entry(i).unwrap();
        assert!(size as usize >= 64 - max_entry, "block {i} is {size} B");
        assert!((size as usize) < 64 + max_entry, "block {i} is {size} B");
    }
}

// ── Writer validation ────────────────────────────────────────────────────────

#[test]
fn writer_rejects_bad_keys_and_order() {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    assert!(matches!(writer.append(b"", b"v").unwrap_err(), WriteError::InvalidKey(_)));
    let oversized = vec![b'k'; 65537];
    assert!(matches!(writer.append(&oversized, b"v").unwrap_err(), WriteError::InvalidKey(_)));

    writer.append(b"m", b"v").unwrap();
    assert!(matches!(
        writer.append(b"a", b"v").unwrap_err(),
        WriteError::OutOfOrder { .. }
    ));
    // Strictly increasing: repeating the last key is out of order too.
    assert!(matches!(
        writer.append(b"m", b"v2").unwrap_err(),
        WriteError::OutOfOrder { .. }
    ));
    // The failed appends left the writer usable.
    writer.append(b"n", b"v").unwrap();
    assert_eq!(writer.entry_count(), 2);
}

#[test]
fn writer_rejects_reserved_fileinfo_keys() {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    assert!(matches!(
        writer.append_file_info(b"hfile.custom", b"x").unwrap_err(),
        WriteError::ReservedKey(_)
    ));
    assert!(matches!(
        writer.append_file_info(b"HFILE.custom", b"x").unwrap_err(),
        WriteError::ReservedKey(_)
    ));
    writer.append_file_info(b"user.tag", b"build-7").unwrap();
    writer.append(b"a", b"1").unwrap();

    let reader = open_bytes(writer.close().unwrap().into_inner());
    assert_eq!(reader.fileinfo().unwrap().get(b"user.tag"), Some(&b"build-7"[..]));
}

#[test]
fn averages_come_from_their_own_accumulators() {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    for i in 0..10 {
        // 5-byte keys, 9-byte values.
        writer
            .append(format!("k{i:04}").as_bytes(), format!("value{i:04}").as_bytes())
            .unwrap();
    }
    let reader = open_bytes(writer.close().unwrap().into_inner());
    assert_eq!(reader.avg_key_len().unwrap(), 5);
    assert_eq!(reader.avg_value_len().unwrap(), 9);
}

// ── Codecs ───────────────────────────────────────────────────────────────────

#[test]
fn every_codec_roundtrips_a_file() {
    for codec in [CodecId::None, CodecId::Gz, CodecId::Lz4, CodecId::Zstd] {
        let bytes = write_entries(256, codec, 200);
        let reader = open_bytes(bytes);
        assert_eq!(reader.compression().unwrap(), codec);
        assert_eq!(reader.trailer().unwrap().compression_codec, codec.ordinal());

        let mut scanner = reader.scanner().unwrap();
        assert!(scanner.seek_to_first().unwrap());
        for i in 0..200 {
            let (key, value) = kv(i);
            assert_eq!(scanner.key().unwrap(), &key[..], "codec {}", codec.name());
            assert_eq!(scanner.value().unwrap(), &value[..]);
            scanner.next().unwrap();
        }
    }
}

#[test]
fn unregistered_codec_ordinal_is_rejected() {
    let mut bytes = write_entries(64, CodecId::None, 10);
    // compression_codec lives 52 bytes into the trailer.
    let at = bytes.len() - 60 + 52;
    bytes[at..at + 4].copy_from_slice(&99i32.to_be_bytes());

    let length = bytes.len() as u64;
    let mut reader = Reader::new(Cursor::new(bytes), length, "patched.hfile");
    let err = reader.load_metadata().unwrap_err();
    assert!(matches!(err, ReadError::Codec(CodecError::UnknownCodec(99))));
}

// ── Corruption ───────────────────────────────────────────────────────────────

#[test]
fn corrupt_data_block_magic_fails_reads() {
    let mut bytes = write_entries(64, CodecId::None, 20);
    // Block 0 starts at offset 0; flip a magic byte.
    bytes[2] ^= 0xff;
    let reader = open_bytes(bytes);
    assert!(matches!(reader.read_block(0).unwrap_err(), ReadError::BadMagic { .. }));

    let mut scanner = reader.scanner().unwrap();
    assert!(matches!(scanner.seek_to_first().unwrap_err(), ReadError::BadMagic { .. }));
}

#[test]
fn corrupt_trailer_magic_fails_load() {
    let mut bytes = write_entries(64, CodecId::None, 20);
    let at = bytes.len() - 60;
    bytes[at] ^= 0x01;
    let length = bytes.len() as u64;
    let mut reader = Reader::new(Cursor::new(bytes), length, "corrupt.hfile");
    assert!(matches!(reader.load_metadata().unwrap_err(), ReadError::BadMagic { .. }));
}

#[test]
fn queries_before_load_are_refused() {
    let bytes = write_entries(64, CodecId::None, 5);
    let length = bytes.len() as u64;
    let reader = Reader::new(Cursor::new(bytes), length, "unloaded.hfile");
    assert!(matches!(reader.entry_count().unwrap_err(), ReadError::NotLoaded));
    assert!(reader.scanner().is_err());
}

// ── Meta blocks ──────────────────────────────────────────────────────────────

#[test]
fn meta_blocks_roundtrip_whatever_the_append_order() {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.append(b"a", b"1").unwrap();
    writer.append_meta_block("zeta.stats", b"z-payload");
    writer.append_meta_block("alpha.stats", b"a-payload");
    writer.append_meta_block("mid.stats", b"m-payload");

    let reader = open_bytes(writer.close().unwrap().into_inner());
    assert_eq!(reader.meta_block_count().unwrap(), 3);

    for (name, payload) in [
        ("alpha.stats", &b"a-payload"[..]),
        ("mid.stats", b"m-payload"),
        ("zeta.stats", b"z-payload"),
    ] {
        let block = reader.get_meta_block(name).unwrap().expect(name);
        assert_eq!(block.data(), payload);
    }
    assert!(reader.get_meta_block("absent").unwrap().is_none());
}

#[test]
fn meta_blocks_without_data_blocks_are_legal() {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.append_meta_block("only.meta", b"payload");
    let reader = open_bytes(writer.close().unwrap().into_inner());

    assert_eq!(reader.entry_count().unwrap(), 0);
    assert_eq!(reader.data_block_count().unwrap(), 0);
    assert_eq!(reader.meta_block_count().unwrap(), 1);
    assert_eq!(
        reader.get_meta_block("only.meta").unwrap().unwrap().data(),
        b"payload"
    );
    assert!(!reader.scanner().unwrap().seek_to_first().unwrap());
}

#[test]
fn files_without_meta_blocks_return_none() {
    let reader = open_bytes(write_entries(64, CodecId::None, 5));
    assert_eq!(reader.meta_block_count().unwrap(), 0);
    assert!(reader.get_meta_block("anything").unwrap().is_none());
}

// ── Comparators ──────────────────────────────────────────────────────────────

struct ReverseLex;
impl Comparator for ReverseLex {
    fn id(&self) -> &str {
        "test.reverse-lex"
    }
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

#[test]
fn custom_comparator_travels_with_the_file() {
    comparator::register(Arc::new(ReverseLex));

    let options = WriteOptions {
        comparator: Arc::new(ReverseLex),
        ..Default::default()
    };
    let mut writer = Writer::with_options(Cursor::new(Vec::new()), options);
    // Strictly increasing under reverse-lex means decreasing byte order.
    writer.append(b"z", b"3").unwrap();
    writer.append(b"y", b"2").unwrap();
    writer.append(b"x", b"1").unwrap();

    let reader = open_bytes(writer.close().unwrap().into_inner());
    assert_eq!(reader.comparator().unwrap().id(), "test.reverse-lex");
    assert_eq!(
        reader.fileinfo().unwrap().get(b"hfile.COMPARATOR"),
        Some(&b"test.reverse-lex"[..])
    );

    let mut scanner = reader.scanner().unwrap();
    assert_eq!(scanner.seek_to(b"y").unwrap(), SeekOutcome::Exact);
    assert_eq!(scanner.value().unwrap(), b"2");

    assert!(scanner.seek_to_first().unwrap());
    let mut seen = Vec::new();
    loop {
        seen.push(scanner.key().unwrap().to_vec());
        if !scanner.next().unwrap() {
            break;
        }
    }
    assert_eq!(seen, vec![b"z".to_vec(), b"y".to_vec(), b"x".to_vec()]);
}

// ── Block cache ──────────────────────────────────────────────────────────────

#[test]
fn block_cache_fills_on_scan_and_serves_hits() {
    let bytes = write_entries(64, CodecId::None, 200);
    let length = bytes.len() as u64;
    let cache = Arc::new(SimpleBlockCache::new());
    let mut reader = Reader::with_cache(Cursor::new(bytes), length, "cached.hfile", cache.clone());
    reader.load_metadata().unwrap();

    let mut scanner = reader.scanner().unwrap();
    assert!(scanner.seek_to_first().unwrap());
    while scanner.next().unwrap() {}
    assert_eq!(cache.len(), reader.data_block_count().unwrap());

    // A second full scan is served from the cache and sees the same data.
    let mut scanner = reader.scanner().unwrap();
    assert!(scanner.seek_to_first().unwrap());
    let mut count = 1usize;
    while scanner.next().unwrap() {
        count += 1;
    }
    assert_eq!(count, 200);
    assert_eq!(cache.len(), reader.data_block_count().unwrap());
}

#[test]
fn one_reader_serves_parallel_scanners() {
    let reader = open_bytes(write_entries(64, CodecId::Zstd, 1000));
    std::thread::scope(|scope| {
        for t in 0..4usize {
            let reader = &reader;
            scope.spawn(move || {
                let mut scanner = reader.scanner().unwrap();
                for i in (t..1000).step_by(7) {
                    let (key, value) = kv(i);
                    assert_eq!(scanner.seek_to(&key).unwrap(), SeekOutcome::Exact);
                    assert_eq!(scanner.value().unwrap(), &value[..]);
                }
            });
        }
    });
}

// ── On-disk roundtrip ────────────────────────────────────────────────────────

#[test]
fn roundtrips_through_a_real_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();

    {
        let file = std::fs::File::create(&path).unwrap();
        let options = WriteOptions {
            block_size: 128,
            compression: CodecId::Zstd,
            ..Default::default()
        };
        let mut writer = Writer::with_options(file, options);
        for i in 0..500 {
            let (key, value) = kv(i);
            writer.append(&key, &value).unwrap();
        }
        writer.append_meta_block("scan.stats", b"500 rows");
        writer.close().unwrap();
    }

    let file = std::fs::File::open(&path).unwrap();
    let length = file.metadata().unwrap().len();
    let mut reader = Reader::new(file, length, &path.display().to_string());
    reader.load_metadata().unwrap();

    assert_eq!(reader.entry_count().unwrap(), 500);
    assert_eq!(
        reader.get_meta_block("scan.stats").unwrap().unwrap().data(),
        b"500 rows"
    );

    let mut scanner = reader.scanner().unwrap();
    assert_eq!(scanner.seek_to(b"k0250").unwrap(), SeekOutcome::Exact);
    assert_eq!(scanner.value().unwrap(), b"v0250");
}

// ── Properties ───────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn any_sorted_entry_set_roundtrips(
        entries in btree_map(
            proptest::collection::vec(any::<u8>(), 1..12),
            proptest::collection::vec(any::<u8>(), 0..24),
            1..60,
        )
    ) {
        let mut writer = Writer::with_options(
            Cursor::new(Vec::new()),
            WriteOptions { block_size: 128, ..Default::default() },
        );
        for (key, value) in &entries {
            writer.append(key, value).unwrap();
        }
        let reader = open_bytes(writer.close().unwrap().into_inner());
        prop_assert_eq!(reader.entry_count().unwrap() as usize, entries.len());

        // Enumeration returns exactly the written sequence, in order.
        let mut scanner = reader.scanner().unwrap();
        prop_assert!(scanner.seek_to_first().unwrap());
        for (key, value) in &entries {
            prop_assert_eq!(scanner.key().unwrap(), &key[..]);
            prop_assert_eq!(scanner.value().unwrap(), &value[..]);
            scanner.next().unwrap();
        }
        prop_assert!(!scanner.is_seeked());

        // Every written key is found exactly.
        for (key, value) in &entries {
            prop_assert_eq!(scanner.seek_to(key).unwrap(), SeekOutcome::Exact);
            prop_assert_eq!(scanner.value().unwrap(), &value[..]);
        }
    }
}
