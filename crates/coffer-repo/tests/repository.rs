//! End-to-end tests of the object pipeline against in-memory blob storage:
//! write/read round-trips across splitter and format combinations, dedupe
//! accounting, integrity verification, seeking, sections, packing and
//! write-back behavior.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use coffer_repo::credentials::MasterKey;
use coffer_repo::{
    initialize, open_repository, BlobStore, Error, NewRepositoryOptions, ObjectId, ObjectManager,
    Options, RepositoryObjectFormat, WriterOptions,
};

fn fixed_format(max_block_size: u32) -> RepositoryObjectFormat {
    RepositoryObjectFormat {
        splitter: "fixed".to_string(),
        object_format: "encrypted-hmac-sha256-aes256-ctr".to_string(),
        hmac_secret: Some(vec![11u8; 32]),
        master_key: vec![22u8; 32],
        max_block_size,
        ..Default::default()
    }
}

fn dynamic_format(min: u32, avg: u32, max: u32) -> RepositoryObjectFormat {
    RepositoryObjectFormat {
        splitter: "dynamic".to_string(),
        min_block_size: min,
        avg_block_size: avg,
        max_block_size: max,
        ..fixed_format(max)
    }
}

fn new_manager(format: RepositoryObjectFormat) -> (Arc<InMemory>, ObjectManager) {
    let store = Arc::new(InMemory::new());
    let manager = ObjectManager::new(store.clone(), format, Options::default()).unwrap();
    (store, manager)
}

fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

async fn write_object(manager: &ObjectManager, data: &[u8]) -> ObjectId {
    let mut writer = manager.new_writer(WriterOptions::default());
    writer.write(data).await.unwrap();
    writer.result().await.unwrap()
}

async fn read_object(manager: &ObjectManager, id: &ObjectId) -> Vec<u8> {
    let mut reader = manager.open(id).await.unwrap();
    reader.read_to_end().await.unwrap()
}

async fn count_blobs(store: &Arc<InMemory>, prefix: &str) -> usize {
    let blob = BlobStore::new(store.clone());
    blob.list_blocks(prefix).await.unwrap().len()
}

// -------------------------------------------------------------------
// Scenario: the empty object
// -------------------------------------------------------------------

#[tokio::test]
async fn test_empty_object_has_stable_id() {
    let (_, manager_a) = new_manager(fixed_format(1024));
    let (_, manager_b) = new_manager(fixed_format(1024));

    let id_a = write_object(&manager_a, b"").await;
    let id_b = write_object(&manager_b, b"").await;

    // Same secrets, different stores: the id depends only on content.
    assert_eq!(id_a, id_b);
    assert_eq!(manager_a.stats().hashed_blocks, 1);

    assert_eq!(read_object(&manager_a, &id_a).await, Vec::<u8>::new());
}

// -------------------------------------------------------------------
// Scenario: repeated chunks dedupe down to one stored blob
// -------------------------------------------------------------------

#[tokio::test]
async fn test_repeated_chunks_dedupe() {
    // Chunk size chosen so the 100-entry indirect list itself fits in a
    // single chunk, keeping the uploaded blob count at exactly two.
    let (store, manager) = new_manager(fixed_format(16 * 1024));

    // 100 identical 16 KiB chunks under a fixed splitter.
    let data = vec![0xABu8; 100 * 16 * 1024];
    let id = write_object(&manager, &data).await;
    assert!(matches!(id, ObjectId::Indirect(_)), "got {:?}", id);

    // One data chunk + one indirect list blob.
    assert_eq!(count_blobs(&store, "").await, 2);

    let stats = manager.stats();
    assert_eq!(stats.hashed_blocks, 101); // 100 chunks + the list
    assert_eq!(stats.present_blocks, 99);
    assert_eq!(stats.written_blocks, 2);

    // The indirect list carries all 100 entries, contiguous and ascending.
    let list_id = match &id {
        ObjectId::Indirect(base) => base.as_ref().clone(),
        _ => unreachable!(),
    };
    let list_bytes = read_object(&manager, &list_id).await;
    let mut records = coffer_core::recordstream::RecordReader::new(
        Bytes::from(list_bytes),
        coffer_core::recordstream::INDIRECT_STREAM_TYPE,
    )
    .unwrap();
    let mut entries = Vec::new();
    while let Some(entry) = records.read::<coffer_core::IndirectEntry>().unwrap() {
        entries.push(entry);
    }
    assert_eq!(entries.len(), 100);
    for window in entries.windows(2) {
        assert_eq!(window[0].end_offset(), window[1].start);
        assert_eq!(window[0].object, window[1].object);
    }
    assert_eq!(entries.last().unwrap().end_offset(), data.len() as u64);

    assert_eq!(read_object(&manager, &id).await, data);
}

// -------------------------------------------------------------------
// Round-trips across splitter x format combinations
// -------------------------------------------------------------------

#[tokio::test]
async fn test_roundtrip_matrix() {
    let formats = ["unencrypted-hmac-sha256", "unencrypted-hmac-sha256-128", "encrypted-hmac-sha256-aes256-ctr"];
    let data = payload(42, 50 * 1024);

    for object_format in formats {
        for base in [fixed_format(4096), dynamic_format(256, 1024, 4096)] {
            let format = RepositoryObjectFormat {
                object_format: object_format.to_string(),
                ..base
            };
            let splitter = format.splitter.clone();
            let (_, manager) = new_manager(format);

            let id = write_object(&manager, &data).await;
            assert_eq!(
                read_object(&manager, &id).await,
                data,
                "mismatch for {} / {}",
                splitter,
                object_format
            );
        }
    }
}

// -------------------------------------------------------------------
// Integrity: tampering is detected on read
// -------------------------------------------------------------------

#[tokio::test]
async fn test_tampered_blob_detected() {
    let (store, manager) = new_manager(fixed_format(1 << 16));

    let data = payload(7, 4096);
    let id = write_object(&manager, &data).await;
    let name = id.block_name().unwrap().to_string();

    // Flip the stored ciphertext while keeping its length.
    let path = object_store::path::Path::from(name.as_str());
    let mut stored = store.get(&path).await.unwrap().bytes().await.unwrap().to_vec();
    stored[0] ^= 0x01;
    store.put(&path, Bytes::from(stored)).await.unwrap();

    match manager.open(&id).await {
        Err(Error::IntegrityMismatch { .. }) => {}
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert_eq!(manager.stats().invalid_blocks, 1);
}

// -------------------------------------------------------------------
// Seeking over indirect objects
// -------------------------------------------------------------------

#[tokio::test]
async fn test_seek_stability() {
    let (_, manager) = new_manager(fixed_format(512));
    let data = payload(99, 10 * 1024);
    let id = write_object(&manager, &data).await;

    let mut reader = manager.open(&id).await.unwrap();
    assert_eq!(reader.length(), data.len() as u64);

    for offset in [0usize, 1, 511, 512, 513, 5000, data.len() - 1, data.len()] {
        let position = reader.seek(SeekFrom::Start(offset as u64)).await.unwrap();
        assert_eq!(position, offset as u64);

        let mut buf = [0u8; 100];
        let n = reader.read(&mut buf).await.unwrap();
        let expected = &data[offset..(offset + 100).min(data.len())];
        assert_eq!(n, expected.len(), "offset {}", offset);
        assert_eq!(&buf[..n], expected, "offset {}", offset);
    }
}

#[tokio::test]
async fn test_read_near_end_returns_partial_then_eof() {
    let (_, manager) = new_manager(fixed_format(512));
    let data = payload(5, 8 * 1024);
    let id = write_object(&manager, &data).await;

    let mut reader = manager.open(&id).await.unwrap();
    reader.seek(SeekFrom::End(-1)).await.unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
    assert_eq!(buf[0], data[data.len() - 1]);
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_seek_whence_and_errors() {
    let (_, manager) = new_manager(fixed_format(512));
    let data = payload(6, 4 * 1024);
    let id = write_object(&manager, &data).await;

    let mut reader = manager.open(&id).await.unwrap();

    assert_eq!(reader.seek(SeekFrom::Start(1000)).await.unwrap(), 1000);
    assert_eq!(reader.seek(SeekFrom::Current(-500)).await.unwrap(), 500);
    assert_eq!(
        reader.seek(SeekFrom::End(0)).await.unwrap(),
        data.len() as u64
    );

    // Past-end clamps, negative fails.
    assert_eq!(
        reader.seek(SeekFrom::Start(1 << 30)).await.unwrap(),
        data.len() as u64
    );
    assert!(matches!(
        reader.seek(SeekFrom::Current(-(1 << 30))).await,
        Err(Error::InvalidSeek)
    ));
}

// -------------------------------------------------------------------
// Sections
// -------------------------------------------------------------------

#[tokio::test]
async fn test_section_composition() {
    let (_, manager) = new_manager(fixed_format(512));
    let data = payload(13, 8 * 1024);
    let base = write_object(&manager, &data).await;

    for (start, length) in [(0u64, 100u64), (500, 1024), (4095, 2), (8000, 192)] {
        let section = ObjectId::Section {
            start,
            length,
            base: Box::new(base.clone()),
        };
        let got = read_object(&manager, &section).await;
        let expected = &data[start as usize..(start + length) as usize];
        assert_eq!(got, expected, "section {},{}", start, length);
    }
}

#[tokio::test]
async fn test_nested_sections() {
    let (_, manager) = new_manager(fixed_format(512));
    let data = payload(14, 4 * 1024);
    let base = write_object(&manager, &data).await;

    let outer = ObjectId::Section {
        start: 1000,
        length: 2000,
        base: Box::new(base),
    };
    let inner = ObjectId::Section {
        start: 100,
        length: 300,
        base: Box::new(outer),
    };

    assert_eq!(read_object(&manager, &inner).await, &data[1100..1400]);

    // The id scheme round-trips through its textual form, too.
    let reparsed = ObjectId::parse(&inner.to_string()).unwrap();
    assert_eq!(read_object(&manager, &reparsed).await, &data[1100..1400]);
}

#[tokio::test]
async fn test_section_seek_forwards_into_base() {
    let (_, manager) = new_manager(fixed_format(512));
    let data = payload(15, 4 * 1024);
    let base = write_object(&manager, &data).await;

    let section = ObjectId::Section {
        start: 512,
        length: 1024,
        base: Box::new(base),
    };
    let mut reader = manager.open(&section).await.unwrap();
    assert_eq!(reader.length(), 1024);

    reader.seek(SeekFrom::End(-4)).await.unwrap();
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).await.unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf[..4], &data[512 + 1020..512 + 1024]);
}

// -------------------------------------------------------------------
// Packing
// -------------------------------------------------------------------

fn packing_format() -> RepositoryObjectFormat {
    RepositoryObjectFormat {
        max_packed_content_length: 4096,
        max_pack_file_length: 1 << 20,
        ..fixed_format(1 << 16)
    }
}

#[tokio::test]
async fn test_small_object_packs() {
    let (store, manager) = new_manager(packing_format());
    manager.begin_packing().await.unwrap();

    let data = payload(21, 1024);
    let id = write_object(&manager, &data).await;
    assert!(matches!(id, ObjectId::Packed(_)), "got {:?}", id);

    // Nothing uploaded until the pack is finalized.
    assert_eq!(count_blobs(&store, "").await, 0);
    assert_eq!(count_blobs(&store, "p/").await, 0);

    manager.finish_packing().await.unwrap();
    assert_eq!(count_blobs(&store, "p/").await, 1);
    assert_eq!(count_blobs(&store, "k/").await, 1);

    assert_eq!(read_object(&manager, &id).await, data);
}

#[tokio::test]
async fn test_packed_reads_equal_unpacked() {
    let data = payload(22, 2048);

    let (_, packed) = new_manager(packing_format());
    packed.begin_packing().await.unwrap();
    let packed_id = write_object(&packed, &data).await;
    packed.finish_packing().await.unwrap();

    let (_, unpacked) = new_manager(packing_format());
    let unpacked_id = write_object(&unpacked, &data).await;

    // Same logical block name either way; only the storage layout differs.
    assert_eq!(packed_id.block_name(), unpacked_id.block_name());
    assert_eq!(read_object(&packed, &packed_id).await, data);
    assert_eq!(read_object(&unpacked, &unpacked_id).await, data);
}

#[tokio::test]
async fn test_pack_index_survives_reopen() {
    let store = Arc::new(InMemory::new());
    let manager =
        ObjectManager::new(store.clone(), packing_format(), Options::default()).unwrap();
    manager.begin_packing().await.unwrap();

    let data = payload(23, 3000);
    let id = write_object(&manager, &data).await;
    manager.finish_packing().await.unwrap();

    // A fresh manager over the same store resolves the packed block by
    // loading the stored pack indexes on demand.
    let reopened = ObjectManager::new(store, packing_format(), Options::default()).unwrap();
    let reparsed = ObjectId::parse(&id.to_string()).unwrap();
    assert_eq!(read_object(&reopened, &reparsed).await, data);
}

#[tokio::test]
async fn test_pack_rollover_splits_packs() {
    let format = RepositoryObjectFormat {
        max_pack_file_length: 2500,
        ..packing_format()
    };
    let (store, manager) = new_manager(format);
    manager.begin_packing().await.unwrap();

    let mut ids = Vec::new();
    let mut payloads = Vec::new();
    for seed in 0..4u64 {
        let data = payload(100 + seed, 1024);
        ids.push(write_object(&manager, &data).await);
        payloads.push(data);
    }
    manager.finish_packing().await.unwrap();

    assert!(
        count_blobs(&store, "p/").await >= 2,
        "expected the pack to roll over"
    );
    for (id, data) in ids.iter().zip(&payloads) {
        assert_eq!(&read_object(&manager, id).await, data);
    }
}

#[tokio::test]
async fn test_duplicate_small_object_packed_once() {
    let (store, manager) = new_manager(packing_format());
    manager.begin_packing().await.unwrap();

    let data = payload(24, 512);
    let a = write_object(&manager, &data).await;
    let b = write_object(&manager, &data).await;
    assert_eq!(a, b);

    manager.finish_packing().await.unwrap();

    // 512 bytes once, not twice.
    let blob = BlobStore::new(store.clone());
    let pack_name = blob.list_blocks("p/").await.unwrap().remove(0);
    assert_eq!(blob.block_size(&pack_name).await.unwrap(), 512);
}

#[tokio::test]
async fn test_disable_packing_writer_bypasses_pack() {
    let (store, manager) = new_manager(packing_format());
    manager.begin_packing().await.unwrap();

    let mut writer = manager.new_writer(WriterOptions {
        disable_packing: true,
        ..Default::default()
    });
    writer.write(&payload(25, 256)).await.unwrap();
    let id = writer.result().await.unwrap();

    assert!(matches!(id, ObjectId::Raw(_)));
    assert_eq!(count_blobs(&store, "p/").await, 0);
}

// -------------------------------------------------------------------
// Dedupe across objects sharing a prefix (dynamic splitter)
// -------------------------------------------------------------------

#[tokio::test]
async fn test_shared_prefix_mostly_dedupes() {
    let (_, manager) = new_manager(dynamic_format(256, 1024, 4096));

    let shared = payload(31, 48 * 1024);
    let tail_a = payload(32, 8 * 1024);
    let tail_b = payload(33, 8 * 1024);

    let mut object_a = shared.clone();
    object_a.extend_from_slice(&tail_a);
    let mut object_b = shared;
    object_b.extend_from_slice(&tail_b);

    let id_a = write_object(&manager, &object_a).await;
    let written_after_a = manager.stats().written_bytes;

    let id_b = write_object(&manager, &object_b).await;
    let written_for_b = manager.stats().written_bytes - written_after_a;

    // The second object only pays for its distinct tail plus bookkeeping,
    // not for the shared 48 KiB prefix again.
    assert!(
        written_for_b < object_b.len() as u64 / 2,
        "second object wrote {} of {} bytes",
        written_for_b,
        object_b.len()
    );

    assert_eq!(read_object(&manager, &id_a).await, object_a);
    assert_eq!(read_object(&manager, &id_b).await, object_b);
}

// -------------------------------------------------------------------
// Write-back
// -------------------------------------------------------------------

#[tokio::test]
async fn test_write_back_matches_synchronous_mode() {
    let data_sets: Vec<Vec<u8>> = (0..10).map(|i| payload(200 + i, 20 * 1024)).collect();

    let (_, sync_manager) = new_manager(fixed_format(4096));
    let store = Arc::new(InMemory::new());
    let async_manager = ObjectManager::new(
        store,
        fixed_format(4096),
        Options {
            write_back: 3,
            trace: None,
        },
    )
    .unwrap();

    for data in &data_sets {
        let sync_id = write_object(&sync_manager, data).await;
        let async_id = write_object(&async_manager, data).await;
        assert_eq!(sync_id, async_id);

        // Interleaved open never observes a half-written object.
        assert_eq!(&read_object(&async_manager, &async_id).await, data);
    }

    async_manager.close().await.unwrap();
}

// -------------------------------------------------------------------
// Initialization + reopen with real credentials
// -------------------------------------------------------------------

#[tokio::test]
async fn test_initialize_and_reopen_repository() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let creds = MasterKey::new([42u8; 32]);

    let options = NewRepositoryOptions {
        max_block_size: 4096,
        min_block_size: 256,
        avg_block_size: 1024,
        splitter: Some("dynamic".to_string()),
        ..Default::default()
    };
    initialize(Arc::clone(&store), &options, &creds).await.unwrap();

    let id = {
        let repo = open_repository(Arc::clone(&store), &creds, Options::default())
            .await
            .unwrap();
        let mut writer = repo.objects.new_writer(WriterOptions::default());
        writer.write(&payload(77, 30 * 1024)).await.unwrap();
        let id = writer.result().await.unwrap();
        repo.close().await.unwrap();
        id
    };

    // Reopening with the same credentials decrypts the configuration and
    // reads the object back.
    let repo = open_repository(Arc::clone(&store), &creds, Options::default())
        .await
        .unwrap();
    let reparsed = ObjectId::parse(&id.to_string()).unwrap();
    let mut reader = repo.objects.open(&reparsed).await.unwrap();
    assert_eq!(reader.read_to_end().await.unwrap(), payload(77, 30 * 1024));

    // A second initialization over the populated store must fail.
    assert!(matches!(
        initialize(store, &NewRepositoryOptions::default(), &creds).await,
        Err(Error::AlreadyInitialized)
    ));
}
