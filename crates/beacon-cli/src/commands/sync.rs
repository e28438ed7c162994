use std::path::Path;

use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_notice, open_context};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let context = open_context(db_path).await?;
    let outcome = context.sync_now().await;
    context.dispose().await;
    let report = outcome?;

    for summary in report.flushes.iter().filter_map(|flush| flush.summary()) {
        println!("{summary}");
    }
    println!(
        "Sync completed: {} check-ins pushed, {} pulled, {} contacts",
        report.replication.pushed, report.replication.pulled, report.contacts
    );
    if report.replication.conflicts > 0 {
        println!(
            "{} check-ins already existed on the server; kept the server copy",
            report.replication.conflicts
        );
    }
    if report.replication.refused > 0 {
        println!(
            "{} check-ins were refused by the server and will not be sent again",
            report.replication.refused
        );
    }
    Ok(())
}

pub async fn run_watch(db_path: &Path) -> Result<(), CliError> {
    let context = open_context(db_path).await?;
    let mut notices = context.subscribe();
    println!("Watching for connectivity; press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    if let Some(line) = format_notice(&notice) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {skipped} sync notices");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    context.dispose().await;
    println!("Stopped");
    Ok(())
}
