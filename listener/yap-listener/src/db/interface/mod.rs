//! Interface methods for interacting with the listener's tables

pub mod contract_events;
pub mod contract_listeners;
pub mod cursors;
pub mod derived_activity;
pub mod failed_tasks;
pub mod jobs;
pub mod stores;
