// Twitter API v2 access: search, filtered stream, and the seams the
// ingestion sources program against.

pub mod client;
pub mod error;
pub mod stream;
pub mod traits;
pub mod types;
