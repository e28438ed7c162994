use std::path::Path;

use beacon_core::models::StatusPayload;
use beacon_core::{CheckInRecord, CheckInStatus};

use crate::cli::StatusArg;
use crate::commands::common::{load_config, open_store, outbound_queue};
use crate::error::CliError;

impl From<StatusArg> for CheckInStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Safe => Self::Safe,
            StatusArg::Help => Self::Help,
        }
    }
}

/// Store the check-in and queue its copy for the next sync
pub async fn record_check_in(
    status: StatusArg,
    location: Option<(f64, f64)>,
    user: Option<String>,
    db_path: &Path,
) -> Result<CheckInRecord, CliError> {
    let config = load_config()?;
    let store = open_store(db_path).await?;

    let mut record = CheckInRecord::new(status.into());
    if let Some((lat, lon)) = location {
        record = record.with_location(lat, lon);
    }
    if let Some(user) = user {
        record = record.with_user(user);
    }

    let id = store.add_check_in(&record).await?;
    let record = CheckInRecord { id, ..record };
    outbound_queue::<StatusPayload>(&store, &config)
        .enqueue(record.to_payload())
        .await?;
    Ok(record)
}

pub async fn run_checkin(
    status: StatusArg,
    location: Option<(f64, f64)>,
    user: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let record = record_check_in(status, location, user, db_path).await?;
    println!(
        "Recorded {} check-in #{}; it will be sent on the next sync",
        record.status, record.id
    );
    Ok(())
}
