//! Map snapshots waiting to be attached to their alerts.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::db::Partition;
use crate::error::{Error, Result};
use crate::models::{CachedMapSnapshot, MapSnapshot, MAX_SNAPSHOT_IMAGE_BYTES};
use crate::queue::{Delivery, FlushReport};
use crate::remote::{RemoteAuthority, RemoteError};
use crate::services::LocalStore;
use crate::util::now_millis;

#[derive(Clone)]
pub struct MapSnapshotCache {
    store: LocalStore,
    max_retries: u32,
    attempt_timeout: Duration,
}

impl MapSnapshotCache {
    pub const fn new(store: LocalStore, max_retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            store,
            max_retries,
            attempt_timeout,
        }
    }

    /// Cache a snapshot for an alert, replacing any earlier one
    pub async fn store(&self, alert_id: &str, snapshot: MapSnapshot) -> Result<()> {
        if alert_id.trim().is_empty() {
            return Err(Error::InvalidInput("alert id must not be empty".into()));
        }
        if let Some(image) = &snapshot.image_base64 {
            let size = decoded_image_len(image)?;
            if size > MAX_SNAPSHOT_IMAGE_BYTES {
                return Err(Error::InvalidInput(format!(
                    "map snapshot image is {size} bytes (limit {MAX_SNAPSHOT_IMAGE_BYTES})"
                )));
            }
        }

        self.store
            .put_snapshot(&CachedMapSnapshot {
                alert_id: alert_id.to_string(),
                snapshot,
                timestamp: now_millis(),
                retry_count: 0,
            })
            .await
    }

    pub async fn get(&self, alert_id: &str) -> Result<Option<CachedMapSnapshot>> {
        self.store.snapshot(alert_id).await
    }

    pub async fn list(&self) -> Result<Vec<CachedMapSnapshot>> {
        self.store.snapshots().await
    }

    /// Re-key a snapshot once its alert has a server id
    pub async fn remap(&self, temp_id: &str, server_id: &str) -> Result<bool> {
        let moved = self.store.rekey_snapshot(temp_id, server_id).await?;
        if moved {
            tracing::debug!("Map snapshot for {temp_id} now keyed by {server_id}");
        }
        Ok(moved)
    }

    /// Drop the snapshot of an alert that will never reach the server
    pub async fn discard(&self, alert_id: &str) -> Result<()> {
        if self.store.snapshot(alert_id).await?.is_some() {
            self.store.delete_snapshot(alert_id).await?;
            tracing::debug!("Discarded map snapshot for abandoned alert {alert_id}");
        }
        Ok(())
    }

    /// Upload every cached snapshot.
    ///
    /// A 404 means the alert has not reached the server yet; that snapshot is
    /// kept without spending a retry.
    pub async fn flush<R: RemoteAuthority>(&self, remote: &R) -> Result<FlushReport> {
        let mut report = FlushReport::new(Partition::MapSnapshots);

        for cached in self.store.snapshots().await? {
            if cached.retry_count >= self.max_retries {
                self.store.delete_snapshot(&cached.alert_id).await?;
                report.exhausted += 1;
                report.abandoned.push(cached.alert_id.clone());
                tracing::warn!(
                    "Dropping map snapshot for {} after {} failed uploads",
                    cached.alert_id,
                    cached.retry_count
                );
                continue;
            }

            let attempt = tokio::time::timeout(
                self.attempt_timeout,
                remote.post_map_snapshot(&cached.alert_id, &cached.snapshot),
            )
            .await
            .unwrap_or_else(|_| Err(RemoteError::Transient("snapshot upload timed out".into())));

            match attempt {
                Ok(()) => {
                    self.store.delete_snapshot(&cached.alert_id).await?;
                    report.deliveries.push(Delivery {
                        local_id: cached.alert_id,
                        server_id: None,
                    });
                }
                Err(RemoteError::NotYetAvailable(_)) => {
                    tracing::debug!("Alert {} not on the server yet; keeping snapshot", cached.alert_id);
                    report.deferred += 1;
                }
                Err(RemoteError::Rejected { status, message }) => {
                    self.store.delete_snapshot(&cached.alert_id).await?;
                    report.rejected += 1;
                    report.abandoned.push(cached.alert_id.clone());
                    tracing::warn!(
                        "Server rejected map snapshot for {} ({status}): {message}",
                        cached.alert_id
                    );
                }
                Err(RemoteError::Transient(message)) => {
                    self.store.increment_snapshot_retry(&cached.alert_id).await?;
                    report.retried += 1;
                    tracing::debug!("Map snapshot upload for {} failed: {message}", cached.alert_id);
                }
            }
        }

        report.remaining = self.store.partition_len(Partition::MapSnapshots).await?;
        Ok(report)
    }
}

/// Decoded byte length of a base64 image, with or without a data-URL prefix
fn decoded_image_len(image: &str) -> Result<usize> {
    let encoded = image
        .split_once(";base64,")
        .map_or(image, |(_, data)| data)
        .trim();
    STANDARD
        .decode(encoded)
        .map(|bytes| bytes.len())
        .map_err(|error| Error::InvalidInput(format!("map snapshot image is not base64: {error}")))
}
