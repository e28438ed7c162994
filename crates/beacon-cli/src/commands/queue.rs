use std::path::Path;

use beacon_core::db::Partition;
use beacon_core::models::{GroupAction, StatusPayload};
use beacon_core::AlertPayload;

use crate::commands::common::{
    load_config, open_store, outbound_queue, queued_entries, snapshot_cache, QueuedEntry,
};
use crate::error::CliError;

pub async fn pending_entries(db_path: &Path) -> Result<Vec<QueuedEntry>, CliError> {
    let config = load_config()?;
    let store = open_store(db_path).await?;

    let alerts = outbound_queue::<AlertPayload>(&store, &config).items().await?;
    let statuses = outbound_queue::<StatusPayload>(&store, &config)
        .items()
        .await?;
    let groups = outbound_queue::<GroupAction>(&store, &config).items().await?;

    let mut entries = queued_entries("alerts", &alerts, |alert| alert.title.clone());
    entries.extend(queued_entries("status", &statuses, |status| {
        format!("{} check-in #{}", status.status, status.check_in_id)
    }));
    entries.extend(queued_entries("groups", &groups, |action| {
        let kind = format!("{:?}", action.kind).to_lowercase();
        format!("{kind} {}", action.group_id)
    }));
    entries.extend(
        snapshot_cache(&store, &config)
            .list()
            .await?
            .into_iter()
            .map(|cached| QueuedEntry {
                queue: "map snapshots".to_string(),
                id: cached.alert_id,
                enqueued_at: cached.timestamp,
                retry_count: cached.retry_count,
                description: format!(
                    "map at {:.5},{:.5}",
                    cached.snapshot.latitude, cached.snapshot.longitude
                ),
            }),
    );
    Ok(entries)
}

/// Empty every outbound queue and the map snapshots waiting on them
pub async fn clear_queues(db_path: &Path) -> Result<usize, CliError> {
    let config = load_config()?;
    let store = open_store(db_path).await?;

    let mut cleared = 0;
    for queue in Partition::ALL.into_iter().filter(|partition| partition.is_queue()) {
        cleared += store.clear_queue(queue).await?;
    }
    let snapshots = snapshot_cache(&store, &config);
    for cached in snapshots.list().await? {
        snapshots.discard(&cached.alert_id).await?;
        cleared += 1;
    }
    tracing::info!("Cleared {cleared} queued items");
    Ok(cleared)
}

pub async fn run_queue(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let entries = pending_entries(db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Nothing waiting to be delivered.");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{:<14} {:<24} retries {}  {}",
            entry.queue, entry.id, entry.retry_count, entry.description
        );
    }
    Ok(())
}
