pub mod alert;
pub mod auth;
pub mod checkin;
pub mod common;
pub mod completions;
pub mod contacts;
pub mod history;
pub mod queue;
pub mod saved;
pub mod sync;
