use crate::db::Partition;

/// A queued item that reached the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub local_id: String,
    pub server_id: Option<String>,
}

/// Outcome of one flush of one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub queue: Partition,
    pub deliveries: Vec<Delivery>,
    /// Transient failures; the items stay queued
    pub retried: usize,
    /// Definitive rejections; the items were dropped
    pub rejected: usize,
    /// Items dropped after using up their retries
    pub exhausted: usize,
    /// Items waiting on a parent record
    pub deferred: usize,
    /// Ids of the rejected and exhausted items
    pub abandoned: Vec<String>,
    /// Items still queued after the flush
    pub remaining: usize,
    /// Another flush of this queue was already running
    pub coalesced: bool,
}

impl FlushReport {
    pub const fn new(queue: Partition) -> Self {
        Self {
            queue,
            deliveries: Vec::new(),
            retried: 0,
            rejected: 0,
            exhausted: 0,
            deferred: 0,
            abandoned: Vec::new(),
            remaining: 0,
            coalesced: false,
        }
    }

    pub(crate) const fn coalesced(queue: Partition) -> Self {
        let mut report = Self::new(queue);
        report.coalesced = true;
        report
    }

    pub fn delivered(&self) -> usize {
        self.deliveries.len()
    }

    /// Nothing was attempted
    pub fn is_idle(&self) -> bool {
        self.deliveries.is_empty()
            && self.retried == 0
            && self.rejected == 0
            && self.exhausted == 0
            && self.deferred == 0
    }

    /// Toast-worthy text, or `None` when there is nothing to say
    pub fn summary(&self) -> Option<String> {
        if self.is_idle() {
            return None;
        }
        let label = self.queue.label();
        let mut parts = Vec::new();
        if !self.deliveries.is_empty() {
            parts.push(format!("{} {label} delivered", self.delivered()));
        }
        let dropped = self.rejected + self.exhausted;
        if dropped > 0 {
            parts.push(format!("{dropped} could not be delivered"));
        }
        let waiting = self.retried + self.deferred;
        if waiting > 0 {
            parts.push(format!("{waiting} will be retried"));
        } else if self.deliveries.is_empty() && self.remaining > 0 {
            parts.push(format!("{} still queued", self.remaining));
        }
        if self.deliveries.is_empty() {
            return Some(format!("{label}: {}", parts.join(", ")));
        }
        Some(parts.join(", "))
    }
}
