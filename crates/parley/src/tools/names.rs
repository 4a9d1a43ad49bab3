//! Canonical tool name constants.
//!
//! Tool names reach the model, the logs, and the status snapshot; keep the
//! literals here so a rename touches one file.

pub const WEB_SEARCH: &str = "web_search";
pub const METRICS_QUERY: &str = "metrics_query";
