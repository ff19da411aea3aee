pub mod content;
pub mod error;
pub mod models;
pub mod progress;
pub mod runner;
pub mod task;
pub mod token_pool;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use content::{ContentFetcher, FetchSettings};
pub use error::AppError;
pub use models::{DiscoveryResult, FetchResult, compute_hash};
pub use progress::ProgressTracker;
pub use runner::{RunOutcome, RunStats, TaskHandler, TaskRunner};
pub use task::{CrawlTask, NewTask, TaskOutcome, TaskStatus, TaskTarget};
pub use token_pool::TokenPool;
pub use traits::{
    ContentStore, LoginStore, OpenReviewStore, PageFetcher, ProfileApi, Renderer, TaskStore,
    TextExtractor,
};
