use proptest::prelude::*;

use dog_chunks::{
    bytes_stream, AddChunkRequest, ChunkFile, ChunkManager, ChunkOrdering, ChunkSettings, Disks,
    MemoryStore,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn create_manager(base: i64) -> (ChunkManager, MemoryStore) {
    let store = MemoryStore::new();
    let settings = ChunkSettings::new().with_index(base).with_auto_merge(false);
    let manager = ChunkManager::new(settings, Disks::new(store.clone())).unwrap();
    (manager, store)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Stored indexes are always the contiguous run starting at the base
    #[test]
    fn test_sequencer_keeps_contiguous_run(
        base in 0i64..=1,
        attempts in prop::collection::vec(0i64..8, 0..24),
    ) {
        let (manager, _store) = create_manager(base);
        let rt = runtime();

        let accepted = rt.block_on(async {
            let mut accepted = 0i64;
            for index in &attempts {
                let file = ChunkFile::new("clip.bin", bytes_stream("x"));
                if manager.add_chunk(file, *index, "clip").await.is_ok() {
                    prop_assert_eq!(*index, base + accepted);
                    accepted += 1;
                }
            }
            Ok::<_, TestCaseError>(accepted)
        })?;

        let stored = rt.block_on(manager.chunks("clip")).unwrap();
        let indexes: Vec<i64> = stored.iter().map(|c| c.index()).collect();
        let expected: Vec<i64> = (base..base + accepted).collect();
        prop_assert_eq!(indexes, expected);
    }

    /// Chunk count is the rounded-up quotient, never below one
    #[test]
    fn test_last_index_matches_formula(total in 0u64..1_000_000, chunk in 1u64..10_000) {
        let (manager, _store) = create_manager(0);
        let last = manager.compute_last_index(total, chunk).unwrap();

        prop_assert_eq!(last, std::cmp::max(1, (total + chunk - 1) / chunk));
        prop_assert!(manager.compute_last_index(total + 1, chunk).unwrap() >= last);
    }

    /// Exactly one index of an upload is reported as last
    #[test]
    fn test_single_last_index(base in 0i64..=1, total in 1u64..5_000, chunk in 1u64..500) {
        let count = ChunkOrdering::last_index(total, chunk).unwrap() as i64;
        let lasts: Vec<i64> = (base..base + count)
            .filter(|index| ChunkOrdering::is_last(*index, total, chunk, base).unwrap())
            .collect();

        prop_assert_eq!(lasts, vec![base + count - 1]);
    }

    /// Uploading every part flags only the final chunk
    #[test]
    fn test_upload_flags_final_chunk(base in 0i64..=1, parts in 1usize..6, chunk in 1u64..8) {
        let (manager, _store) = create_manager(base);
        let total = chunk * parts as u64;
        let body = "y".repeat(chunk as usize);

        let flags = runtime().block_on(async {
            let mut flags = Vec::new();
            for offset in 0..parts as i64 {
                let request = AddChunkRequest::new(
                    base + offset,
                    ChunkFile::new("data.bin", bytes_stream(body.clone())),
                    chunk,
                    total,
                );
                flags.push(manager.handle(request, None).await.unwrap().is_last());
            }
            flags
        });

        let expected: Vec<bool> = (0..parts).map(|i| i + 1 == parts).collect();
        prop_assert_eq!(flags, expected);
    }
}
