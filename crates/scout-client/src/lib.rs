pub mod api_client;
#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod discovery;
pub mod extractor;
pub mod fetcher;
pub mod openreview;

pub use api_client::{GithubClient, RetryPolicy};
#[cfg(feature = "browser")]
pub use browser::ChromiumRenderer;
pub use config::{ClientConfig, FetchConfig};
pub use discovery::{DiscoveryParams, FollowDiscovery, FollowTab};
pub use extractor::HtmdExtractor;
pub use fetcher::ReqwestFetcher;
pub use openreview::{ForumAuthor, ForumInfo, OpenReviewClient};
