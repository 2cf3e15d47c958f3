use futures::FutureExt;

use eventboard_core::{CollectionView, Entity};
use eventboard_engine::{EngineConfig, PageOutcome, RemoteError};
use eventboard_harness::*;
use eventboard_storage::CacheStore;

fn server_events(count: usize) -> Vec<Entity> {
    (1..=count).map(|n| event(&format!("event-{n}"))).collect()
}

#[tokio::test]
async fn refresh_loads_first_page() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.remote.seed(EVENTS, server_events(25));

    let outcome = client.engine.refresh(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 20, has_more: true });

    let view = client.events().ok_or("events not cached")?;
    assert_eq!(view.len(), EngineConfig::default().page_size);
    assert_eq!(view.continuation_token.as_deref(), Some("offset:20"));
    assert!(!view.is_refreshing);
    Ok(())
}

#[tokio::test]
async fn next_page_appends_and_exhausts() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.remote.seed(EVENTS, server_events(25));

    client.engine.refresh(EVENTS).await?;
    let outcome = client.engine.load_next_page(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 5, has_more: false });

    let view = client.events().ok_or("events not cached")?;
    assert_eq!(view.len(), 25);
    assert_eq!(keys(&view).last().map(String::as_str), Some("event-25"));
    assert_eq!(view.continuation_token, None);

    assert_eq!(client.engine.load_next_page(EVENTS).await?, PageOutcome::Exhausted);
    Ok(())
}

#[tokio::test]
async fn next_page_skips_entities_already_cached() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.remote.seed(EVENTS, server_events(22));

    client.engine.refresh(EVENTS).await?;
    // event-21 arrived through a create confirmation before the next page.
    client.engine.with_store(|store| {
        store.update(EVENTS, |mut view| {
            view.push(event("event-21"));
            view
        })
    })?;

    let outcome = client.engine.load_next_page(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 1, has_more: false });
    let view = client.events().ok_or("events not cached")?;
    assert_eq!(view.len(), 22);
    Ok(())
}

#[tokio::test]
async fn concurrent_load_reports_in_progress() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.remote.seed(EVENTS, server_events(25));
    client.engine.refresh(EVENTS).await?;
    client.remote.stall_next_page(EVENTS);

    let mut first = Box::pin(client.engine.refresh(EVENTS));
    assert!(futures::poll!(&mut first).is_pending());
    assert!(client.engine.is_loading(EVENTS));
    assert_eq!(client.engine.refresh(EVENTS).await?, PageOutcome::InProgress);
    assert_eq!(client.engine.load_next_page(EVENTS).await?, PageOutcome::InProgress);
    drop(first);

    let outcome = client.engine.load_next_page(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 5, has_more: false });
    Ok(())
}

#[tokio::test]
async fn abandoned_refresh_does_not_wedge_the_view() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.remote.seed(EVENTS, server_events(3));
    client.remote.stall_next_page(EVENTS);

    // The view that asked for the refresh went away mid-fetch.
    let abandoned = client.engine.refresh(EVENTS).now_or_never();
    assert!(abandoned.is_none());
    assert!(!client.engine.is_loading(EVENTS));
    assert_eq!(client.events().map(|v| v.is_refreshing), Some(false));

    let outcome = client.engine.refresh(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 3, has_more: false });
    Ok(())
}

#[tokio::test]
async fn saved_refreshing_flag_is_ignored_after_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::on_disk()?;
    client.remote.seed(EVENTS, server_events(2));
    client.engine.with_store(|store| {
        let mut view = CollectionView::default();
        view.is_refreshing = true;
        store.set(EVENTS, view)
    })?;

    let outcome = client.engine.refresh(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 2, has_more: false });
    let view = client.events().ok_or("events not cached")?;
    assert!(!view.is_refreshing);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_clears_flag() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.seed_events(&["A", "B"])?;
    client
        .remote
        .fail_next(EVENTS, RemoteError::Unavailable("offline".into()));

    assert!(client.engine.refresh(EVENTS).await.is_err());

    let view = client.events().ok_or("events not cached")?;
    assert!(!view.is_refreshing);
    assert_eq!(keys(&view), vec!["A", "B"]);

    // The next attempt goes through.
    assert!(matches!(
        client.engine.refresh(EVENTS).await?,
        PageOutcome::Loaded { added: 2, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn next_page_without_view_refreshes() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new();
    client.remote.seed(EVENTS, server_events(2));

    let outcome = client.engine.load_next_page(EVENTS).await?;
    assert_eq!(outcome, PageOutcome::Loaded { added: 2, has_more: false });
    assert_eq!(client.events().map(|v| v.len()), Some(2));
    Ok(())
}
