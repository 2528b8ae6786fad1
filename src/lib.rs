// mentionwatch: forward Twitter mentions of one account to a webhook.
//
// This is the library root. `ingest` finds mentions (polling or filtered
// stream), `webhook` delivers them, and `engine` wires the two together.

pub mod backoff;
pub mod check;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod mention;
pub mod twitter;
pub mod webhook;

#[cfg(feature = "health")]
pub mod health;
