//! The yap listener's library definitions
//!
//! The listener ingests contract event logs across multiple chains, records
//! them durably against user-defined jobs, and derives per-yapper
//! address-activity clusters used downstream for reward computation.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::needless_pass_by_ref_mut)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod abi;
pub mod alert;
pub mod cli;
pub mod db;
pub mod enrichment;
pub mod lifecycle;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod router;
pub mod transport;
pub mod types;
pub mod worker;
