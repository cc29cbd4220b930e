//! HTTP route definitions for the yap listener API

/// The path for the healthcheck route
pub const HEALTHCHECK_PATH: &str = "healthcheck";

/// The path for the job subscription route
pub const SUBSCRIBE_PATH: &str = "jobs/subscribe";

/// The path for the job unsubscription route
pub const UNSUBSCRIBE_PATH: &str = "jobs/unsubscribe";
