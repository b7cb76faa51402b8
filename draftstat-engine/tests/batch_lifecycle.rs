use draftstat_engine::{
    DocumentKey, DocumentStore, DraftShape, EngineConfig, EngineError, GameEndRecord,
    IndicatorEngine, IngestRequest, Ledger, MatrixKind, MemoryStore, PatchSwitch, PlayerLog,
    PoolUpdate, RetryPolicy, RotationOutcome, Snapshot, VersionError, VersionState,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const TOKEN: &str = "rotate-token";

fn engine(store: Arc<MemoryStore>) -> IndicatorEngine<Arc<MemoryStore>> {
    let config = EngineConfig {
        admin_token: TOKEN.to_string(),
        retry: RetryPolicy::immediate(0),
        draft: DraftShape {
            rounds: 3,
            picks_per_round: 1,
        },
        ..EngineConfig::default()
    };
    IndicatorEngine::new(config, store).unwrap()
}

fn pool_update(patch: &str) -> PoolUpdate {
    PoolUpdate {
        patch_version: patch.to_string(),
        class_pool: vec![1, 2],
        card_pools: BTreeMap::from([(1, vec![10, 20, 30]), (2, vec![40, 50, 60])]),
        map_pool: vec![5],
        player_count_pool: vec![2],
        ..PoolUpdate::default()
    }
}

fn request(patch: &str, class_code: i32, cards: [i32; 3]) -> IngestRequest {
    IngestRequest {
        data: vec![GameEndRecord {
            game_id: Some(format!("{patch}-{class_code}")),
            patch_version: Some(format!("1.0.{patch}")),
            map_id: Some(5),
            player_count: Some(2),
            player_logs: vec![PlayerLog {
                class_code: Some(class_code),
                round1_set: vec![cards[0]],
                round2_set: vec![cards[1]],
                round3_set: vec![cards[2]],
                round_score: vec![1],
                ..PlayerLog::default()
            }],
        }],
    }
}

fn diagonal(store: &MemoryStore, batch: u32, class_code: i32, index: usize) -> u64 {
    let key = DocumentKey::new(Ledger::Pick, "3", batch, MatrixKind::Coexistence, class_code);
    store
        .get(&key)
        .unwrap()
        .unwrap()
        .aggregate()
        .unwrap()
        .diagonal(index)
}

#[test]
fn rotation_carries_counts_forward_and_freezes_the_prior_batch() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    engine.replace_pool(TOKEN, &pool_update("3")).unwrap();
    assert_eq!(
        engine.switch_patch(TOKEN, "3").unwrap(),
        PatchSwitch::Created { documents: 8 }
    );
    engine.ingest(&request("3", 1, [10, 20, 30])).unwrap();

    let outcome = engine.rotate().unwrap();
    assert_eq!(
        outcome,
        RotationOutcome::Rotated {
            patch_version: "3".to_string(),
            from: 1,
            to: 2,
            documents: 8,
        }
    );
    assert_eq!(store.len(), 16);
    assert_eq!(diagonal(&store, 2, 1, 0), 1);

    engine.ingest(&request("3", 1, [10, 20, 30])).unwrap();
    assert_eq!(diagonal(&store, 2, 1, 0), 2);
    assert_eq!(diagonal(&store, 1, 1, 0), 1);

    let rotated = engine.rotate_now(TOKEN).unwrap();
    assert!(rotated.rotated());
    assert_eq!(
        engine.version(),
        VersionState::Active {
            patch_version: "3".to_string(),
            batch: 3,
        }
    );
    assert_eq!(diagonal(&store, 3, 1, 0), 2);
}

#[test]
fn reports_use_the_batch_before_the_live_one() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store);
    engine.replace_pool(TOKEN, &pool_update("3")).unwrap();
    engine.switch_patch(TOKEN, "3").unwrap();
    engine.ingest(&request("3", 2, [40, 50, 60])).unwrap();

    assert!(engine.indicator().unwrap().is_cold_start());
    assert!(engine.rebalance_cards(2).unwrap().is_cold_start());

    engine.rotate().unwrap();
    // written after rotation, so invisible to reports until the next one
    engine.ingest(&request("3", 1, [10, 20, 30])).unwrap();

    let classes = engine.rebalance_classes().unwrap();
    let Snapshot::Ready { batch, data, .. } = classes else {
        panic!("expected a complete batch");
    };
    assert_eq!(batch, 1);
    assert_eq!(data[0].id, 2);
    assert_eq!(data[0].pick.count, 1);
    assert_eq!(data[1].pick.count, 0);

    let indicator = engine.indicator().unwrap();
    let docs = indicator.data().unwrap();
    assert_eq!(docs.pick.len(), 4);
    assert_eq!(docs.win.len(), 4);
}

#[test]
fn restart_reattaches_at_the_latest_batch() {
    let store = Arc::new(MemoryStore::new());
    let first = engine(store.clone());
    first.replace_pool(TOKEN, &pool_update("3")).unwrap();
    first.switch_patch(TOKEN, "3").unwrap();
    first.ingest(&request("3", 1, [10, 20, 30])).unwrap();
    first.rotate().unwrap();
    first.rotate().unwrap();
    drop(first);

    let second = engine(store.clone());
    second.replace_pool(TOKEN, &pool_update("3")).unwrap();
    assert_eq!(
        second.switch_patch(TOKEN, "3").unwrap(),
        PatchSwitch::Reattached { batch: 3 }
    );
    assert_eq!(store.len(), 24);
    assert_eq!(second.status().complete_batch, Some(2));
    assert_eq!(
        second.switch_patch(TOKEN, "3").unwrap(),
        PatchSwitch::Unchanged
    );
}

#[test]
fn patch_switch_requires_a_matching_pool() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    engine.replace_pool(TOKEN, &pool_update("3")).unwrap();
    engine.switch_patch(TOKEN, "3").unwrap();

    let err = engine.switch_patch(TOKEN, "4").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Version(VersionError::PoolNotConfirmed { .. })
    ));
    assert_eq!(engine.version().patch_version(), Some("3"));

    engine.replace_pool(TOKEN, &pool_update("4")).unwrap();
    assert_eq!(
        engine.switch_patch(TOKEN, "4").unwrap(),
        PatchSwitch::Created { documents: 8 }
    );
    // games of the old patch are now skipped
    let summary = engine.ingest(&request("3", 1, [10, 20, 30])).unwrap();
    assert_eq!(summary.games_skipped_version, 1);
    assert!(engine.rotate().unwrap().rotated());
    assert!(store.exists_for_patch(Ledger::Win, "4").unwrap());
}
