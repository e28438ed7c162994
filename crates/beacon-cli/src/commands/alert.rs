use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use beacon_core::models::MapSnapshot;
use beacon_core::queue::EnqueueOutcome;
use beacon_core::AlertPayload;

use crate::commands::common::{load_config, open_store, outbound_queue, snapshot_cache};
use crate::error::CliError;

pub fn normalize_title(title_parts: &[String]) -> Result<String, CliError> {
    let title = title_parts.join(" ");
    let title = title.trim();
    if title.is_empty() {
        return Err(CliError::EmptyTitle);
    }
    Ok(title.to_string())
}

/// Read an image file into a base64 data URL
pub fn encode_map_image(path: &Path) -> Result<String, CliError> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);
    let mime = match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => return Err(CliError::UnsupportedImage(path.display().to_string())),
    };
    let bytes = std::fs::read(path)?;
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

pub async fn run_alert(
    title_parts: &[String],
    message: Option<String>,
    location: Option<(f64, f64)>,
    map_image: Option<&Path>,
    db_path: &Path,
) -> Result<(), CliError> {
    let title = normalize_title(title_parts)?;
    let snapshot = match (map_image, location) {
        (Some(path), Some((lat, lon))) => {
            Some(MapSnapshot::at(lat, lon).with_image(encode_map_image(path)?))
        }
        (Some(_), None) => return Err(CliError::MapImageWithoutLocation),
        (None, _) => None,
    };

    let mut alert = AlertPayload::new(title);
    if let Some(message) = message {
        alert = alert.with_message(message);
    }
    if let Some((lat, lon)) = location {
        alert = alert.with_location(lat, lon);
    }

    let config = load_config()?;
    let store = open_store(db_path).await?;
    let outcome = outbound_queue::<AlertPayload>(&store, &config)
        .enqueue(alert)
        .await?;

    let snapshots = snapshot_cache(&store, &config);
    if let EnqueueOutcome::Queued { evicted, .. } = &outcome {
        for evicted_id in evicted {
            snapshots.discard(evicted_id).await?;
        }
    }
    if let Some(snapshot) = snapshot {
        snapshots.store(outcome.id(), snapshot).await?;
    }

    match outcome {
        EnqueueOutcome::Queued { id, evicted } => {
            println!("Alert queued as {id}");
            if !evicted.is_empty() {
                println!("Queue was full; dropped {} older alerts", evicted.len());
            }
        }
        EnqueueOutcome::Duplicate { existing_id } => {
            println!("Same alert is already queued as {existing_id}");
        }
    }
    Ok(())
}
