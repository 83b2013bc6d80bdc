//! Integration test: block store on a real directory
//!
//! Exercises the on-disk layout (one compressed file per hash under the root),
//! staged writes, and corruption detection against files edited behind the
//! store's back.

use blksync_chunks::hash_block;
use blksync_core::config::{CodecConfig, ServerConfig};
use blksync_core::{Block, BlockHash, BLOCK_SIZE};
use blksync_storage::{BlockError, BlockStore};
use std::path::Path;
use tempfile::TempDir;

fn server_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        dictionary: dir.join("blocks"),
        ..Default::default()
    }
}

async fn open_store(dir: &Path) -> (BlockStore, ServerConfig) {
    let server = server_config(dir);
    let store = BlockStore::open(&server, &CodecConfig::default())
        .await
        .expect("open store");
    (store, server)
}

fn patterned_block(seed: u8) -> Block {
    let data: Vec<u8> = (0..BLOCK_SIZE)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    Block::try_from(data).unwrap()
}

#[tokio::test]
async fn block_file_is_named_by_hash() {
    let tmp = TempDir::new().unwrap();
    let (store, server) = open_store(tmp.path()).await;

    let block = patterned_block(1);
    let hash = store.put(&block).await.expect("put");

    let file = server.dictionary.join(hash.to_string());
    assert!(file.is_file(), "expected {} to exist", file.display());
    assert_eq!(hash.to_string().len(), 16);

    let on_disk = std::fs::read(&file).unwrap();
    assert_ne!(on_disk, block.as_bytes(), "raw bytes must never be persisted");

    assert_eq!(store.get(&hash).await.unwrap(), block);
}

#[tokio::test]
async fn dedup_collapses_to_one_file() {
    let tmp = TempDir::new().unwrap();
    let (store, server) = open_store(tmp.path()).await;

    let block = Block::zeroed();
    let first = store.put(&block).await.unwrap();
    let second = store.put(&block).await.unwrap();
    assert_eq!(first, second);

    let files: Vec<_> = std::fs::read_dir(&server.dictionary)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    assert_eq!(files.len(), 1, "identical blocks must share one file");
}

#[tokio::test]
async fn truncated_file_on_disk_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let (store, server) = open_store(tmp.path()).await;

    let hash = store.put(&patterned_block(5)).await.unwrap();
    let file = server.dictionary.join(hash.to_string());
    let len = std::fs::metadata(&file).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&file)
        .unwrap()
        .set_len(len - 1)
        .unwrap();

    assert!(matches!(
        store.get(&hash).await,
        Err(BlockError::CorruptBlock { .. })
    ));
}

#[tokio::test]
async fn unknown_hash_on_disk_store() {
    let tmp = TempDir::new().unwrap();
    let (store, _server) = open_store(tmp.path()).await;

    let hash: BlockHash = "deadbeefdeadbeef".parse().unwrap();
    assert!(matches!(
        store.get(&hash).await,
        Err(BlockError::NoSuchBlock(_))
    ));
    assert!(!store.exists(&hash).await.unwrap());
}

#[tokio::test]
async fn concurrent_identical_puts_leave_a_complete_file() {
    let tmp = TempDir::new().unwrap();
    let (store, server) = open_store(tmp.path()).await;
    let block = patterned_block(9);
    let expected = hash_block(&block);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let block = block.clone();
        handles.push(tokio::spawn(async move { store.put(&block).await }));
    }
    // Readers racing the writers see either nothing or the whole block
    for _ in 0..8 {
        match store.get(&expected).await {
            Ok(read) => assert_eq!(read, block),
            Err(BlockError::NoSuchBlock(_)) => {}
            Err(e) => panic!("reader observed a partial block: {e}"),
        }
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), expected);
    }

    assert_eq!(store.get(&expected).await.unwrap(), block);
    let staged = std::fs::read_dir(server.staging_dir()).unwrap().count();
    assert_eq!(staged, 0, "staging directory must be empty after writes");
}

#[tokio::test]
async fn reopen_sees_previous_blocks() {
    let tmp = TempDir::new().unwrap();
    let hash = {
        let (store, _) = open_store(tmp.path()).await;
        store.put(&patterned_block(2)).await.unwrap()
    };

    let (store, _) = open_store(tmp.path()).await;
    assert!(store.exists(&hash).await.unwrap());
    assert_eq!(store.get(&hash).await.unwrap(), patterned_block(2));
}
