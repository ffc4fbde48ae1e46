//! SQLite-backed `Store` persistence tests, grounded on the teacher's
//! `runtimes_runner.rs` use of `tempfile::tempdir()` to back a real on-disk
//! checkpointer rather than an in-memory one.

#![cfg(feature = "sqlite")]

use rollback_agent::store::sqlite::SqliteStore;
use rollback_agent::store::Store;

fn db_url(dir: &tempfile::TempDir, name: &str) -> String {
    format!("sqlite://{}/{name}?mode=rwc", dir.path().display())
}

#[tokio::test]
async fn connect_seeds_rootusr_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let url = db_url(&dir, "rollback_agent.db");

    let store = SqliteStore::connect(&url).await.unwrap();
    let root = store
        .find_user_by_username("rootusr")
        .await
        .unwrap()
        .expect("rootusr seeded on first connect");
    assert!(root.is_admin);
    assert!(root.verify_password("1234"));

    // Reconnecting (simulating a process restart against the same file)
    // must not error or duplicate the row.
    let store2 = SqliteStore::connect(&url).await.unwrap();
    let users = store2.find_all_users().await.unwrap();
    let root_count = users.iter().filter(|u| u.username == "rootusr").count();
    assert_eq!(root_count, 1);
}

#[tokio::test]
async fn outer_session_and_checkpoint_round_trip_through_disk() {
    use rollback_agent::store::model::{new_graph_session_id, Checkpoint, InnerSession, OuterSession};

    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::connect(&db_url(&dir, "round_trip.db")).await.unwrap();

    let root = store.find_user_by_username("rootusr").await.unwrap().unwrap();
    let outer = store
        .create_outer_session(OuterSession::new(root.id.unwrap(), "disk test"))
        .await
        .unwrap();

    let mut inner = InnerSession::new(outer.id.unwrap());
    inner.graph_session_id = new_graph_session_id();
    inner.is_current = true;
    let inner = store.create_inner_session(inner).await.unwrap();

    let mut checkpoint = Checkpoint {
        id: None,
        inner_session_id: inner.id.unwrap(),
        name: Some("manual".to_string()),
        state_snapshot: Default::default(),
        transcript_snapshot: Default::default(),
        tool_invocations_snapshot: Vec::new(),
        is_auto: false,
        created_at: chrono::Utc::now(),
        user_id: root.id,
        metadata: Default::default(),
    };
    checkpoint.set_tool_track_position(3);
    let saved = store.create_checkpoint(checkpoint).await.unwrap();

    let reloaded = store.get_checkpoint_by_id(saved.id.unwrap()).await.unwrap().unwrap();
    assert_eq!(reloaded.tool_track_position(), 3);
    assert_eq!(reloaded.name.as_deref(), Some("manual"));
    assert!(!reloaded.is_auto);
}
