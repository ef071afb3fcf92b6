//! Service lifecycle over an in-memory store
//!
//! Wires the whole core from `Settings` and exercises the ingest →
//! retrieve path the way a hook pipeline would drive it, with embeddings
//! disabled or pointed at an unreachable worker so the run never leaves
//! the process.

use anyhow::Result;
use chrono::Utc;
use recall::{
    MemoryService, NewObservation, NewPendingEvent, ProducerKind, SearchFilters, Settings,
};

fn disabled_settings() -> Settings {
    Settings {
        disable_embeddings: true,
        ..Settings::default()
    }
}

fn observation(title: &str, content: &str) -> NewObservation {
    NewObservation {
        title: title.to_string(),
        content: content.to_string(),
        project: "recall".to_string(),
        session_id: Some("sess-1".to_string()),
        timestamp: Utc::now().timestamp_millis(),
    }
}

#[tokio::test]
async fn remember_then_find_by_keyword() -> Result<()> {
    let service = MemoryService::open_in_memory(&disabled_settings())?;

    let id = service
        .remember(observation("limiter fix", "details about the token bucket"))
        .await?;
    assert!(service.get(id)?.is_some());
    // Disabled embeddings: the row exists, the vector does not.
    assert_eq!(service.store().embedding_count()?, 0);
    assert!(!service.embeddings().is_enabled());

    let hits = service.search("token bucket", 5, &SearchFilters::new()).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    Ok(())
}

#[tokio::test]
async fn unreachable_worker_still_ingests_and_searches() -> Result<()> {
    let settings = Settings {
        embedding_producer: ProducerKind::Worker,
        worker_addr: Some("127.0.0.1:1".to_string()),
        ..Settings::default()
    };
    let service = MemoryService::open_in_memory(&settings)?;

    let id = service
        .remember(observation("offline note", "written while the worker is down"))
        .await?;
    assert_eq!(service.store().embedding_count()?, 0);

    let hits = service.search("worker is down", 5, &SearchFilters::new()).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    Ok(())
}

#[tokio::test]
async fn pending_events_stage_in_order() -> Result<()> {
    let service = MemoryService::open_in_memory(&disabled_settings())?;

    for tool in ["Read", "Edit", "Bash"] {
        service.record_event(NewPendingEvent {
            session_id: "sess-1".to_string(),
            project: "recall".to_string(),
            tool_name: tool.to_string(),
            compressed: format!("{tool} output"),
            timestamp: Utc::now().timestamp_millis(),
        })?;
    }

    let events = service.pending_events("sess-1")?;
    let tools: Vec<&str> = events.iter().map(|e| e.tool_name.as_str()).collect();
    assert_eq!(tools, vec!["Read", "Edit", "Bash"]);
    Ok(())
}

#[tokio::test]
async fn recent_returns_newest_first() -> Result<()> {
    let service = MemoryService::open_in_memory(&disabled_settings())?;
    let now = Utc::now().timestamp_millis();

    for (title, age_days) in [("oldest", 10), ("middle", 5), ("newest", 0)] {
        let mut row = observation(title, "timeline entry");
        row.timestamp = now - age_days * 86_400_000;
        service.remember(row).await?;
    }

    let rows = service.recent(2, &SearchFilters::new())?;
    let titles: Vec<&str> = rows.iter().map(|o| o.title.as_str()).collect();
    assert_eq!(titles, vec!["newest", "middle"]);
    Ok(())
}

#[tokio::test]
async fn scored_search_without_vectors_is_unscored() -> Result<()> {
    let service = MemoryService::open_in_memory(&disabled_settings())?;
    service.remember(observation("note", "iota content")).await?;

    let hits = service.search_scored("iota", 5, &SearchFilters::new()).await?;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].similarity.is_none());
    Ok(())
}
