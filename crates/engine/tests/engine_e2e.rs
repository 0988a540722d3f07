use silo_engine::SearchEngine;
use silo_protocol::{EngineDefaults, SearchPreset, SiloConfig, WatcherState};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn silo_config(name: &str, root: &Path, db_dir: &Path) -> SiloConfig {
    init_logging();
    SiloConfig {
        name: name.to_string(),
        directories: vec![root.to_path_buf()],
        extensions: vec!["md".into(), "rs".into(), "txt".into()],
        ignore_patterns: vec![],
        ignore_file_patterns: vec![],
        model_id: "hash-32".to_string(),
        db_path: db_dir.join(format!("{name}.db")),
        description: None,
        color: None,
        icon: None,
        stopped: false,
    }
}

async fn wait_for_idle(engine: &SearchEngine, name: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = engine
            .list_silos()
            .into_iter()
            .find(|s| s.name == name)
            .expect("silo listed");
        if status.watcher_state == WatcherState::Idle {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "silo `{name}` never reached idle (state: {:?}, error: {:?})",
            status.watcher_state,
            status.error_message
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn silo_indexes_and_serves_function_name_queries() {
    let corpus = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(
        &corpus.path().join("src/files.rs"),
        "fn process_batch(paths: &[String]) {\n    for p in paths { index(p); }\n}\n",
    );
    write(
        &corpus.path().join("src/other.rs"),
        "fn unrelated_helper() {\n    cleanup();\n}\n",
    );
    write(&corpus.path().join("notes.md"), "# Design\nwatcher and queue notes\n");

    let engine = SearchEngine::new(EngineDefaults::default());
    engine
        .create_silo(silo_config("code", corpus.path(), state.path()))
        .await
        .unwrap();
    wait_for_idle(&engine, "code").await;

    let status = &engine.list_silos()[0];
    assert_eq!(status.indexed_file_count, 3);
    assert!(status.chunk_count >= 3);
    assert!(status.db_size_bytes > 0);
    assert!(!status.model_mismatch);

    for preset in [SearchPreset::Balanced, SearchPreset::Keyword, SearchPreset::Code] {
        let results = engine
            .search("process_batch", None, Some(5), Some(preset))
            .await
            .unwrap();
        assert!(!results.is_empty(), "{preset:?} found nothing");
        assert!(
            results[0].file_path.ends_with("src/files.rs"),
            "{preset:?} ranked {} first",
            results[0].file_path
        );
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
        assert!(!results[0].chunks.is_empty());
    }

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_silo_results_are_calibrated() {
    let corpus_a = TempDir::new().unwrap();
    let corpus_b = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(
        &corpus_a.path().join("alpha.md"),
        "# Alpha\nthe shared magicterm appears here\n",
    );
    for i in 0..4 {
        write(
            &corpus_a.path().join(format!("filler{i}.md")),
            &format!("# Filler {i}\nunrelated content number {i}\n"),
        );
    }
    write(
        &corpus_b.path().join("beta.md"),
        "# Beta\nthe shared magicterm appears here too\n",
    );

    let engine = SearchEngine::new(EngineDefaults::default());
    engine
        .create_silo(silo_config("big", corpus_a.path(), state.path()))
        .await
        .unwrap();
    engine
        .create_silo(silo_config("small", corpus_b.path(), state.path()))
        .await
        .unwrap();
    wait_for_idle(&engine, "big").await;
    wait_for_idle(&engine, "small").await;

    let results = engine
        .search("magicterm", None, Some(10), None)
        .await
        .unwrap();
    let silos: Vec<&str> = results.iter().map(|r| r.silo_name.as_str()).collect();
    assert!(silos.contains(&"big") && silos.contains(&"small"), "{silos:?}");
    for result in &results {
        assert!(result.score <= 1.0 + f32::EPSILON);
    }
    // Each silo's best hit is calibrated to 1.0.
    let top_scores: Vec<f32> = results
        .iter()
        .filter(|r| r.file_path.ends_with("alpha.md") || r.file_path.ends_with("beta.md"))
        .map(|r| r.score)
        .collect();
    assert_eq!(top_scores.len(), 2);
    for score in top_scores {
        assert!((score - 1.0).abs() < 1e-6);
    }

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn model_change_blocks_indexing_until_rebuild() {
    let corpus = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(&corpus.path().join("doc.md"), "# Doc\nsearchable content\n");

    let engine = SearchEngine::new(EngineDefaults::default());
    let config = silo_config("notes", corpus.path(), state.path());
    engine.create_silo(config.clone()).await.unwrap();
    wait_for_idle(&engine, "notes").await;

    // Reconfigure to a different model and restart.
    engine.stop_silo("notes").unwrap();
    let mut changed = config.clone();
    changed.model_id = "hash-64".to_string();
    engine.update_silo("notes", changed).await.unwrap();
    engine.wake_silo("notes").await.unwrap();

    let status = engine
        .list_silos()
        .into_iter()
        .find(|s| s.name == "notes")
        .unwrap();
    assert!(status.model_mismatch, "mismatch flag not raised");
    assert_eq!(status.watcher_state, WatcherState::Idle);

    // Reads still work against the old index.
    let results = engine
        .search("searchable", Some("notes"), Some(5), None)
        .await
        .unwrap();
    assert!(!results.is_empty());

    // Rebuild clears the mismatch and reindexes under the new model.
    engine.rebuild_silo("notes").await.unwrap();
    wait_for_idle(&engine, "notes").await;
    let status = engine
        .list_silos()
        .into_iter()
        .find(|s| s.name == "notes")
        .unwrap();
    assert!(!status.model_mismatch);
    assert_eq!(status.indexed_file_count, 1);

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn watcher_picks_up_live_edits() {
    let corpus = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(&corpus.path().join("first.txt"), "initial file\n");

    let engine = SearchEngine::new(EngineDefaults::default());
    engine
        .create_silo(silo_config("live", corpus.path(), state.path()))
        .await
        .unwrap();
    wait_for_idle(&engine, "live").await;

    write(&corpus.path().join("second.txt"), "a brand new notion appears\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let results = engine
            .search("notion", Some("live"), Some(5), None)
            .await
            .unwrap();
        if results.iter().any(|r| r.file_path.ends_with("second.txt")) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher never indexed the new file"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let activity = engine.activity_recent(20);
    assert!(activity
        .iter()
        .any(|e| e.file_path.ends_with("second.txt")));

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_operations_behave() {
    let corpus = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(&corpus.path().join("a.txt"), "content a\n");

    let engine = SearchEngine::new(EngineDefaults::default());
    let config = silo_config("first", corpus.path(), state.path());
    engine.create_silo(config.clone()).await.unwrap();
    wait_for_idle(&engine, "first").await;

    // Duplicate names are rejected.
    assert!(engine.create_silo(config).await.is_err());

    engine.rename_silo("first", "renamed").unwrap();
    assert!(engine.list_silos().iter().any(|s| s.name == "renamed"));

    engine.stop_silo("renamed").unwrap();
    let status = engine
        .list_silos()
        .into_iter()
        .find(|s| s.name == "renamed")
        .unwrap();
    assert_eq!(status.watcher_state, WatcherState::Stopped);

    let db_path = status.db_path.clone();
    engine.delete_silo("renamed").unwrap();
    assert!(engine.list_silos().is_empty());
    assert!(!db_path.exists(), "database file survived delete");

    let server = engine.server_status();
    assert!(server.available_models.contains(&"hash-256".to_string()));
    assert_eq!(server.total_indexed_files, 0);
}
