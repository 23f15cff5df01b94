//! Usage data: types, remote API access and the external snapshot file.

pub mod api_client;
pub mod fetcher;
pub mod parse;
pub mod snapshot_file;
pub mod types;
pub mod window;

pub use api_client::{ClaudeApi, Transport, UreqTransport};
pub use fetcher::UsageFetcher;
pub use types::{UsageHistoryPoint, UsageSnapshot};
pub use window::{format_countdown, PaceStatus, UsageWindow};
