use std::collections::BTreeSet;

use shoal_core::integrity::hash_piece;
use shoal_core::store::save_snapshot;
use shoal_core::{
    restore, AssemblyEngine, BlockSource, EngineConfig, InfoHash, RecheckReason, RestorePlan,
    ResumeSnapshot, ResumeStore, SaveBatcher, TorrentMetadata,
};
use shoal_host::{logging, open_store, Config, FileBlockSource};

const PIECE_LEN: usize = 16;

fn content() -> Vec<u8> {
    (0..PIECE_LEN * 4 + 5).map(|i| (i * 7) as u8).collect()
}

fn metadata(id: InfoHash) -> TorrentMetadata {
    let data = content();
    let hashes = data.chunks(PIECE_LEN).map(hash_piece).collect();
    TorrentMetadata::new(Some(id), PIECE_LEN as u32, data.len() as u64, hashes)
}

fn config(dir: &std::path::Path) -> Config {
    toml::from_str(&format!(
        "resume_dir = {:?}\n[engine]\nblock_size = 8\nverification = \"inline\"\n[resume]\nspot_check_samples = 10\nsave_every_pieces = 1",
        dir.join("resume")
    ))
    .unwrap()
}

#[test]
fn restart_from_disk() {
    logging::init_for_tests();
    let dir = tempfile::tempdir().unwrap();
    let id = InfoHash::from_bytes([0x42; 20]);
    let meta = metadata(id);
    let cfg = config(dir.path());
    let data = content();
    let data_path = dir.path().join("payload");

    {
        let store = open_store(&cfg).unwrap();
        let source = FileBlockSource::open(&data_path, &meta).unwrap();
        let engine = AssemblyEngine::new(&meta, cfg.engine.clone());
        let mut snapshot = ResumeSnapshot::new(id, meta.piece_count());
        let mut batcher = SaveBatcher::from_config(&cfg.resume);
        for i in [0usize, 2, 4] {
            let piece = &data[i * PIECE_LEN..((i + 1) * PIECE_LEN).min(data.len())];
            for (n, block) in piece.chunks(8).enumerate() {
                engine.handle_fragment(i, (n * 8) as u32, block);
            }
            source
                .write_block(i, 0, &engine.piece_data(i).unwrap())
                .unwrap();
            if batcher.piece_verified() {
                batcher.save(&engine, &mut snapshot, &store).unwrap();
            }
        }
    }

    let store = open_store(&cfg).unwrap();
    let source = FileBlockSource::open(&data_path, &meta).unwrap();
    let plan = restore(&store, &id, &meta, &source, &cfg.resume);
    assert!(matches!(plan, RestorePlan::Seed { .. }), "{plan:?}");
    let engine = AssemblyEngine::new(&meta, cfg.engine.clone());
    assert_eq!(plan.apply(&engine, &meta, &source), 3);
    assert_eq!(engine.verified_pieces(), BTreeSet::from([0, 2, 4]));

    // damage the payload on disk; the next restore must not trust the snapshot
    source.write_block(2, 0, b"xxxx").unwrap();
    let plan = restore(&store, &id, &meta, &source, &cfg.resume);
    let RestorePlan::Recheck { reason, checkpoint } = &plan else {
        panic!("expected recheck, got {plan:?}");
    };
    assert!(matches!(reason, RecheckReason::SpotCheckFailed(f) if f == &vec![2]));
    assert!(checkpoint.is_some());
    let engine = AssemblyEngine::new(&meta, EngineConfig::inline(8));
    plan.apply(&engine, &meta, &source);
    assert_eq!(engine.verified_pieces(), BTreeSet::from([0, 4]));

    store.remove(&id).unwrap();
    assert!(matches!(
        restore(&store, &id, &meta, &source, &cfg.resume),
        RestorePlan::Fresh
    ));
}

#[test]
fn crash_after_moving_blob_aside_keeps_progress() {
    let dir = tempfile::tempdir().unwrap();
    let id = InfoHash::from_bytes([0x17; 20]);
    let meta = metadata(id);
    let cfg = config(dir.path());
    let data = content();
    let source = FileBlockSource::open(&dir.path().join("payload"), &meta).unwrap();
    let store = open_store(&cfg).unwrap();

    source.write_block(0, 0, &data[..PIECE_LEN]).unwrap();
    let mut snapshot = ResumeSnapshot::new(id, meta.piece_count());
    snapshot.set_verified([0usize]);
    save_snapshot(&store, &snapshot).unwrap();

    // only the checkpoint is left on disk
    let current = cfg.resume_dir.join(format!("{}.resume", id.to_hex()));
    let previous = cfg.resume_dir.join(format!("{}.resume.prev", id.to_hex()));
    std::fs::rename(&current, &previous).unwrap();

    let plan = restore(&store, &id, &meta, &source, &cfg.resume);
    let RestorePlan::Seed { verified, .. } = plan else {
        panic!("expected seed plan, got {plan:?}");
    };
    assert_eq!(verified, BTreeSet::from([0]));
}
