//! Long-lived services shared by the sync components

mod store;

pub use store::{LocalStore, StoreLimits};
