use std::path::Path;

use beacon_core::models::CheckInFilter;
use chrono::Utc;

use crate::commands::common::{check_in_to_item, format_check_in_lines, open_store, CheckInItem};
use crate::error::CliError;

pub async fn run_history(
    limit: usize,
    unsynced: bool,
    clear: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    if clear {
        let cleared = store.clear_history().await?;
        println!("Cleared {cleared} check-ins");
        return Ok(());
    }

    let filter = CheckInFilter {
        synced: unsynced.then_some(false),
        limit: Some(limit),
        ..CheckInFilter::default()
    };
    let records = store.check_ins(&filter).await?;

    if as_json {
        let now_ms = Utc::now().timestamp_millis();
        let items = records
            .iter()
            .map(|record| check_in_to_item(record, now_ms))
            .collect::<Vec<CheckInItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No check-ins recorded.");
        return Ok(());
    }
    for line in format_check_in_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
