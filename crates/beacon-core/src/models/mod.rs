//! Data models for Beacon

mod alert;
mod check_in;
mod contact;
mod group;
mod map_snapshot;
mod queued_item;

pub use alert::{AlertPayload, DUPLICATE_COORDINATE_TOLERANCE, DUPLICATE_WINDOW_MS};
pub use check_in::{CheckInFilter, CheckInRecord, CheckInStatus, StatusDocument, StatusPayload};
pub use contact::{EmergencyContact, MAX_CONTACTS};
pub use group::{GroupAction, GroupActionKind, GroupMembership};
pub use map_snapshot::{CachedMapSnapshot, MapSnapshot, MAX_SNAPSHOT_IMAGE_BYTES};
pub use queued_item::QueuedItem;
