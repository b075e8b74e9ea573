mod common;

use common::{config, image, sync_in_process};
use iblocksync::chain::increment_path;
use iblocksync::restore::{restore, restore_to_path};
use proptest::prelude::*;
use std::path::Path;
use tempfile::TempDir;

async fn restored(base: &Path, seq: usize) -> Vec<u8> {
    let mut out = Vec::new();
    restore(&increment_path(base, seq), &mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_restore_every_generation() {
    let tmp = TempDir::new().unwrap();
    let initial = b"aaaabbbbccccdddde".to_vec();
    let base = image(tmp.path(), "disk.img", &initial);
    let source = image(tmp.path(), "disk", &initial);
    let config = config(&source, &base, 4);

    let generations: [&[u8]; 4] = [
        b"aaaaBBBBccccdddde",
        b"aaaaBBBBccccddddE",
        b"AAAAbbbbccccddddE",
        b"AAAAbbbbccccddddE",
    ];

    for content in &generations {
        std::fs::write(&source, content).unwrap();
        let report = sync_in_process(&config).await.report.unwrap();
        assert_eq!(report.stats.same_blocks + report.stats.diff_blocks, 5);
    }

    for (seq, content) in generations.iter().enumerate() {
        assert_eq!(restored(&base, seq).await, *content, "generation {}", seq);
    }

    // the base image stays at the initial state
    assert_eq!(std::fs::read(&base).unwrap(), initial);
}

#[tokio::test]
async fn test_restore_to_file() {
    let tmp = TempDir::new().unwrap();
    let base = image(tmp.path(), "disk.img", b"0000111122");
    let source = image(tmp.path(), "disk", b"0000999922");
    sync_in_process(&config(&source, &base, 4)).await.report.unwrap();

    let dest = tmp.path().join("restored.img");
    let stats = restore_to_path(&increment_path(&base, 0), &dest, false)
        .await
        .unwrap();
    assert_eq!(stats.bytes, 10);
    assert_eq!(std::fs::read(&dest).unwrap(), b"0000999922");
}

#[tokio::test]
async fn test_restore_missing_increment() {
    let tmp = TempDir::new().unwrap();
    let base = image(tmp.path(), "disk.img", b"0000");
    let source = image(tmp.path(), "disk", b"1111");
    sync_in_process(&config(&source, &base, 4)).await.report.unwrap();

    let mut out = Vec::new();
    assert!(restore(&increment_path(&base, 3), &mut out).await.is_err());
    assert!(out.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any sequence of source mutations restores byte for byte at every
    /// generation.
    #[test]
    fn prop_sessions_restore_history(
        initial in proptest::collection::vec(any::<u8>(), 0..64),
        block_size in 1u64..9,
        edits in proptest::collection::vec(
            proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..6),
            1..5,
        ),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let tmp = TempDir::new().unwrap();
            let base = image(tmp.path(), "disk.img", &initial);
            let source = image(tmp.path(), "disk", &initial);
            let config = config(&source, &base, block_size);

            let mut content = initial.clone();
            let mut history = Vec::new();
            for generation in &edits {
                if !content.is_empty() {
                    for (index, byte) in generation {
                        let at = index.index(content.len());
                        content[at] = *byte;
                    }
                }
                std::fs::write(&source, &content).unwrap();
                sync_in_process(&config).await.report.unwrap();
                history.push(content.clone());
            }

            for (seq, expected) in history.iter().enumerate() {
                assert_eq!(&restored(&base, seq).await, expected);
            }
        });
    }
}
