//! Demo: hybrid memory search over an ephemeral store
//!
//! Runs entirely offline: embeddings are disabled, so retrieval degrades
//! to the keyword path exactly as it does when no provider is reachable.
//!
//! Run with:
//! ```
//! cargo run --example demo_memory_search
//! ```

use anyhow::Result;
use chrono::Utc;
use recall::{MemoryService, NewObservation, SearchFilters, Settings};

const DAY_MS: i64 = 86_400_000;

#[tokio::main]
async fn main() -> Result<()> {
    println!("╔══════════════════════════════════════════╗");
    println!("║   Recall Memory Search Demo              ║");
    println!("╚══════════════════════════════════════════╝\n");

    let settings = Settings {
        disable_embeddings: true,
        ..Settings::default()
    };
    let service = MemoryService::open_in_memory(&settings)?;
    let now = Utc::now().timestamp_millis();

    println!("📚 Step 1: Remembering sample observations...\n");

    let samples = [
        (
            "Fixed flaky limiter test",
            "The token bucket test raced the refill interval; widened the margins in src/limiter.rs.",
            "recall",
            now - 2 * DAY_MS,
        ),
        (
            "Worker protocol decision",
            "Settled on newline-delimited JSON with correlation ids so responses can arrive out of order.",
            "recall",
            now - 30 * DAY_MS,
        ),
        (
            "Deploy pipeline notes",
            "Staging deploys now run the migration step before the service restart.",
            "infra",
            now - 10 * DAY_MS,
        ),
    ];
    for (title, content, project, timestamp) in samples {
        let id = service
            .remember(NewObservation {
                title: title.to_string(),
                content: content.to_string(),
                project: project.to_string(),
                session_id: Some("demo-session".to_string()),
                timestamp,
            })
            .await?;
        println!("  [{id}] {title}");
    }

    println!("\n🔍 Step 2: Searching for \"correlation ids\"...\n");
    for obs in service.search("correlation ids", 5, &SearchFilters::new()).await? {
        println!("  [{}] {} ({})", obs.id, obs.title, obs.project);
    }

    println!("\n🔍 Step 3: Same search, filtered to project \"recall\"...\n");
    let filters = SearchFilters::new().with_project("recall");
    for obs in service.search("the", 5, &filters).await? {
        println!("  [{}] {} ({})", obs.id, obs.title, obs.project);
    }

    println!("\n🕑 Step 4: Most recent observations...\n");
    for obs in service.recent(2, &SearchFilters::new())? {
        println!("  [{}] {}", obs.id, obs.title);
    }

    println!("\nDone.");
    Ok(())
}
