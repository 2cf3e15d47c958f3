use eventboard_core::{EntityId, Fields};
use eventboard_engine::{Outcome, RemoteError};
use eventboard_harness::*;

fn comment_args(event_id: &str) -> Fields {
    Fields::new().with("eventId", event_id)
}

fn comment_fields(event_id: &str, content: &str) -> Fields {
    Fields::new().with("eventId", event_id).with("content", content)
}

// ============================================================================
// merge_pushed_update
// ============================================================================

#[test]
fn push_to_uncached_parent_is_a_miss() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-7"])?;
    let before = client.events();

    let outcome = client.engine.merge_pushed_update(
        &EntityId::from("event-1"),
        comment("cm-1", "event-1", "hi"),
        COMMENTS,
    );
    assert_eq!(outcome, Outcome::CacheMiss);
    assert_eq!(client.events(), before);
    assert!(client.cached("event-1").is_none());
    Ok(())
}

#[test]
fn pushed_child_lands_in_parent_and_views() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1", "event-2"])?;

    let parent = EntityId::from("event-1");
    let outcome = client
        .engine
        .merge_pushed_update(&parent, comment("cm-1", "event-1", "hi"), COMMENTS);
    assert_eq!(outcome, Outcome::Applied);

    let cached = client.cached("event-1").ok_or("parent not cached")?;
    assert_eq!(cached.relation(COMMENTS).len(), 1);
    assert_eq!(cached.relation(COMMENTS)[0].fields.text("content"), Some("hi"));
    assert!(client.cached("cm-1").is_some());

    // The list view sees the same parent record.
    let view = client.events().ok_or("events not cached")?;
    assert_eq!(view.entities()[0].relation(COMMENTS).len(), 1);
    Ok(())
}

#[test]
fn repeated_push_is_deduplicated() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    let parent = EntityId::from("event-1");

    let child = comment("cm-1", "event-1", "hi");
    assert_eq!(
        client.engine.merge_pushed_update(&parent, child.clone(), COMMENTS),
        Outcome::Applied
    );
    assert_eq!(
        client.engine.merge_pushed_update(&parent, child, COMMENTS),
        Outcome::DuplicateDelivery
    );

    let cached = client.cached("event-1").ok_or("parent not cached")?;
    assert_eq!(cached.relation(COMMENTS).len(), 1);
    Ok(())
}

#[tokio::test]
async fn merged_comment_survives_refresh() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    let parent = EntityId::from("event-1");

    let outcome = client
        .engine
        .merge_pushed_update(&parent, comment("cm-1", "event-1", "hi"), COMMENTS);
    assert_eq!(outcome, Outcome::Applied);

    // The list query does not select comments.
    client.engine.refresh(EVENTS).await?;

    let cached = client.cached("event-1").ok_or("parent not cached")?;
    assert_eq!(cached.relation(COMMENTS).len(), 1);
    let view = client.events().ok_or("events not cached")?;
    assert_eq!(view.entities()[0].relation(COMMENTS).len(), 1);
    Ok(())
}

// ============================================================================
// Watchers
// ============================================================================

#[tokio::test]
async fn watcher_merges_pushed_comments() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    let parent = EntityId::from("event-1");

    let watcher = client
        .engine
        .watch_relation(EVENT_COMMENTS_FEED, &comment_args("event-1"), &parent, COMMENTS)
        .await?;
    assert!(watcher.is_active());
    assert_eq!(client.remote.subscriber_count(), 1);

    let delivered = client
        .remote
        .push(EVENT_COMMENTS_FEED, comment("cm-1", "event-1", "first"));
    assert_eq!(delivered, 1);
    // Comment on another event is filtered by the subscription arguments.
    let delivered = client
        .remote
        .push(EVENT_COMMENTS_FEED, comment("cm-2", "event-9", "elsewhere"));
    assert_eq!(delivered, 0);

    assert_eq!(watcher.merged_count(), 1);
    let cached = client.cached("event-1").ok_or("parent not cached")?;
    assert_eq!(cached.relation(COMMENTS).len(), 1);

    watcher.cancel();
    Ok(())
}

#[tokio::test]
async fn own_comment_echo_is_absorbed() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    let parent = EntityId::from("event-1");

    let watcher = client
        .engine
        .watch_relation(EVENT_COMMENTS_FEED, &comment_args("event-1"), &parent, COMMENTS)
        .await?;

    let added = client
        .engine
        .add_child(&parent, COMMENTS, COMMENT_ON_EVENT, comment_fields("event-1", "see you there"))
        .await?;
    assert_eq!(added.parent, Some(parent.clone()));

    // The server pushed the new comment back to us as well.
    assert_eq!(watcher.merged_count(), 1);
    let cached = client.cached("event-1").ok_or("parent not cached")?;
    assert_eq!(cached.relation(COMMENTS).len(), 1);
    assert_eq!(cached.relation(COMMENTS)[0].key, added.key);

    let server = client.remote.server_entity(&parent).ok_or("parent not on server")?;
    assert_eq!(server.relation(COMMENTS).len(), 1);

    watcher.cancel();
    Ok(())
}

#[tokio::test]
async fn stream_error_leaves_cache_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    let parent = EntityId::from("event-1");
    let before = client.cached("event-1");

    let watcher = client
        .engine
        .watch_relation(EVENT_COMMENTS_FEED, &comment_args("event-1"), &parent, COMMENTS)
        .await?;
    client
        .remote
        .push_error(EVENT_COMMENTS_FEED, RemoteError::StreamClosed);

    assert_eq!(watcher.last_error(), Some(RemoteError::StreamClosed));
    assert_eq!(watcher.merged_count(), 0);
    assert_eq!(client.cached("event-1"), before);

    watcher.cancel();
    Ok(())
}

#[tokio::test]
async fn cancelled_watcher_stops_merging() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    let parent = EntityId::from("event-1");

    let watcher = client
        .engine
        .watch_relation(EVENT_COMMENTS_FEED, &comment_args("event-1"), &parent, COMMENTS)
        .await?;
    watcher.cancel();
    assert_eq!(client.remote.subscriber_count(), 0);

    let delivered = client
        .remote
        .push(EVENT_COMMENTS_FEED, comment("cm-1", "event-1", "late"));
    assert_eq!(delivered, 0);
    let cached = client.cached("event-1").ok_or("parent not cached")?;
    assert!(cached.relation(COMMENTS).is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_subscribe_reports_remote_error() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;
    client
        .remote
        .fail_subscriptions(RemoteError::Unavailable("no socket".into()));

    let result = client
        .engine
        .watch_relation(
            EVENT_COMMENTS_FEED,
            &comment_args("event-1"),
            &EntityId::from("event-1"),
            COMMENTS,
        )
        .await;
    let err = result.err().ok_or("subscribe should fail")?;
    assert_eq!(err.remote(), Some(&RemoteError::Unavailable("no socket".into())));
    assert_eq!(client.remote.subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn comment_on_missing_event_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["event-1"])?;

    let result = client
        .engine
        .add_child(
            &EntityId::from("event-404"),
            COMMENTS,
            COMMENT_ON_EVENT,
            comment_fields("event-404", "hello?"),
        )
        .await;
    assert!(matches!(
        result.err().and_then(|e| e.remote().cloned()),
        Some(RemoteError::Rejected { .. })
    ));
    Ok(())
}
