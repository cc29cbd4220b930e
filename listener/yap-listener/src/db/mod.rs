//! Database schema & interface definitions

#[allow(missing_docs)]
#[allow(clippy::missing_docs_in_private_items)]
pub mod schema;

pub mod client;
pub mod error;
pub mod interface;
pub mod models;
mod utils;
