mod common;

use std::sync::Arc;

use aocn_sync::{CommandStatus, Invoker};
use common::{board, config, member, notifier, write_cache, FakeLeaderboard, RecordingSink};
use tempfile::tempdir;

fn read_mapping(dir: &std::path::Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(dir.join("mapping.json")).expect("mapping file"))
        .expect("mapping json")
}

#[tokio::test]
async fn link_creates_mapping_file_on_first_use() {
    let dir = tempdir().expect("tempdir");
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();
    assert!(!dir.path().join("mapping.json").exists());

    let reply = handler.link(&Invoker::new("1001", "ada"), 7).await;

    assert_eq!(reply.status, CommandStatus::Success);
    assert_eq!(reply.content, "Linked ada with AoC User ID 7!");
    assert_eq!(read_mapping(dir.path()), serde_json::json!({ "7": "1001" }));
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn linking_a_finished_member_announces_and_grants_role() {
    let dir = tempdir().expect("tempdir");
    write_cache(dir.path(), &board(vec![member("42", Some("ada"), 1..=25, &[])]));
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();

    let reply = handler.link(&Invoker::new("1001", "ada"), 42).await;

    assert_eq!(reply.status, CommandStatus::Success);
    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("<@1001> linked their account.\n"));
    assert!(messages[0].contains("They have been given the <@&555> role."));
    assert_eq!(
        sink.roles(),
        vec![("900".to_string(), "1001".to_string(), "555".to_string())]
    );
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn unfinished_member_links_quietly() {
    let dir = tempdir().expect("tempdir");
    write_cache(dir.path(), &board(vec![member("42", Some("ada"), 1..=24, &[25])]));
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();

    let reply = handler.link(&Invoker::new("1001", "ada"), 42).await;

    assert_eq!(reply.status, CommandStatus::Success);
    assert!(sink.messages().is_empty());
    assert!(sink.roles().is_empty());
}

#[tokio::test]
async fn corrupt_cache_does_not_fail_the_link() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("cache.json"), b"garbage").expect("cache");
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();

    let reply = handler.link(&Invoker::new("1001", "ada"), 42).await;

    assert_eq!(reply.status, CommandStatus::Success);
    assert_eq!(read_mapping(dir.path()), serde_json::json!({ "42": "1001" }));
}

#[tokio::test]
async fn corrupt_mapping_fails_link_without_overwriting() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("mapping.json"), b"{\"7\": ").expect("mapping");
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();

    let reply = handler.link(&Invoker::new("1001", "ada"), 42).await;

    assert_eq!(reply.status, CommandStatus::Failed);
    assert_eq!(reply.content, "Failed to link! Logs printed to console.");
    assert_eq!(
        std::fs::read(dir.path().join("mapping.json")).expect("mapping"),
        b"{\"7\": "
    );

    let reply = handler.unlink(&Invoker::new("1001", "ada")).await;
    assert_eq!(reply.status, CommandStatus::Failed);
    assert_eq!(reply.content, "Failed to unlink! Logs printed to console.");
}

#[tokio::test]
async fn unlink_reports_missing_link_then_removes_existing_one() {
    let dir = tempdir().expect("tempdir");
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();
    let ada = Invoker::new("1001", "ada");

    let reply = handler.unlink(&ada).await;
    assert_eq!(reply.status, CommandStatus::NotLinked);
    assert_eq!(reply.content, "Your account wasn't linked in the first place!");

    handler.link(&ada, 7).await;
    handler.link(&Invoker::new("1002", "bob"), 8).await;
    let reply = handler.unlink(&ada).await;
    assert_eq!(reply.status, CommandStatus::Success);
    assert_eq!(reply.content, "Unlinked ada from AoC User ID 7!");
    assert_eq!(read_mapping(dir.path()), serde_json::json!({ "8": "1002" }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_links_and_cycle_share_one_lock() {
    let dir = tempdir().expect("tempdir");
    let source = Arc::new(FakeLeaderboard::serving(board(vec![member("1", Some("ada"), 1..=1, &[])])));
    let sink = Arc::new(RecordingSink::default());
    let notifier = Arc::new(notifier(config(dir.path(), true), &source, &sink));
    let handler = Arc::new(notifier.link_handler());

    let mut tasks = Vec::new();
    for i in 0..24u64 {
        let handler = Arc::clone(&handler);
        tasks.push(tokio::spawn(async move {
            handler
                .link(&Invoker::new(format!("user-{i}"), format!("u{i}")), 1000 + i)
                .await
        }));
    }
    let cycle = {
        let notifier = Arc::clone(&notifier);
        tokio::spawn(async move { notifier.run_cycle().await })
    };

    for task in tasks {
        assert_eq!(task.await.expect("join").status, CommandStatus::Success);
    }
    cycle.await.expect("join").expect("cycle");

    let mapping = read_mapping(dir.path());
    let entries = mapping.as_object().expect("object");
    assert_eq!(entries.len(), 24);
    for i in 0..24u64 {
        assert_eq!(entries[&(1000 + i).to_string()], format!("user-{i}"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn links_from_independent_notifiers_all_persist() {
    let dir = tempdir().expect("tempdir");
    let source = Arc::new(FakeLeaderboard::default());
    let sink = Arc::new(RecordingSink::default());

    // Each handler owns its own mapping store, like separate `aocn link` processes.
    let mut tasks = Vec::new();
    for i in 0..32u64 {
        let handler = notifier(config(dir.path(), true), &source, &sink).link_handler();
        tasks.push(tokio::spawn(async move {
            handler
                .link(&Invoker::new(format!("user-{i}"), format!("u{i}")), 2000 + i)
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("join").status, CommandStatus::Success);
    }

    let mapping = read_mapping(dir.path());
    assert_eq!(mapping.as_object().expect("object").len(), 32);
}
