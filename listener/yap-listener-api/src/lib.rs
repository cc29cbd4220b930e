//! The yap listener API
//!
//! Shared type definitions consumed by the listener service, the task queue
//! producers & consumers, and the external HTTP API layer.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::needless_pass_by_ref_mut)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod routes;
pub mod types;
